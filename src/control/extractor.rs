//! Background, cached lookup of the function enclosing a line

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::source::ResolvedSource;

/// Bodies longer than this are cut
pub const MAX_BODY_CHARS: usize = 3000;

/// The innermost `def`/`class` block around a line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionContext {
    /// Dotted path through enclosing blocks, e.g. `Parser.parse`
    pub name: String,
    /// Header line(s) up to and including the colon
    pub signature: String,
    pub start_line: u32,
    pub end_line: u32,
    pub body: String,
    pub truncated: bool,
}

/// Result of a non-blocking lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Parsing has been scheduled or is still running
    Pending,
    /// `None` means the line is at module level
    Ready(Option<FunctionContext>),
}

/// Broadcast when a background parse finishes
#[derive(Debug, Clone)]
pub struct ExtractionDone {
    pub file: PathBuf,
    pub line: u32,
    pub context: Option<FunctionContext>,
}

type CacheKey = (PathBuf, u32, String);

#[derive(Debug, Clone)]
enum Entry {
    Pending,
    Ready(Option<FunctionContext>),
}

/// Cache keyed by file, line and content hash; parsing runs on the blocking pool
#[derive(Clone)]
pub struct FunctionContextExtractor {
    cache: Arc<Mutex<HashMap<CacheKey, Entry>>>,
    done_tx: broadcast::Sender<ExtractionDone>,
}

impl Default for FunctionContextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionContextExtractor {
    pub fn new() -> Self {
        let (done_tx, _) = broadcast::channel(64);
        Self {
            cache: Arc::new(Mutex::new(HashMap::new())),
            done_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExtractionDone> {
        self.done_tx.subscribe()
    }

    /// Cached result, or `Pending` after scheduling a parse. Never blocks on parsing.
    pub fn lookup(&self, file: &Path, line: u32, source: &ResolvedSource) -> Lookup {
        let key: CacheKey = (file.to_path_buf(), line, source.digest().to_string());
        {
            let mut cache = self.cache.lock();
            match cache.get(&key) {
                Some(Entry::Ready(context)) => return Lookup::Ready(context.clone()),
                Some(Entry::Pending) => return Lookup::Pending,
                None => {
                    cache.insert(key.clone(), Entry::Pending);
                }
            }
        }

        let cache = Arc::clone(&self.cache);
        let done_tx = self.done_tx.clone();
        let text = source.text.clone();
        tokio::task::spawn_blocking(move || {
            let context = parse_function_context(&text, line);
            cache.lock().insert(key.clone(), Entry::Ready(context.clone()));
            tracing::debug!(file = %key.0.display(), line, found = context.is_some(), "Function context ready");
            let _ = done_tx.send(ExtractionDone {
                file: key.0,
                line,
                context,
            });
        });
        Lookup::Pending
    }

    /// Cached result without scheduling anything
    pub fn cached(&self, file: &Path, line: u32, source: &ResolvedSource) -> Option<Lookup> {
        let key: CacheKey = (file.to_path_buf(), line, source.digest().to_string());
        self.cache.lock().get(&key).map(|entry| match entry {
            Entry::Pending => Lookup::Pending,
            Entry::Ready(context) => Lookup::Ready(context.clone()),
        })
    }

    /// Parse synchronously, bypassing the cache
    pub fn extract_now(source: &ResolvedSource, line: u32) -> Option<FunctionContext> {
        parse_function_context(&source.text, line)
    }
}

fn block_header() -> Option<&'static Regex> {
    static HEADER: OnceLock<Option<Regex>> = OnceLock::new();
    HEADER
        .get_or_init(|| {
            Regex::new(r"^[ \t]*(?:async[ \t]+)?(?:def|class)[ \t]+(?P<name>[A-Za-z_][A-Za-z0-9_]*)").ok()
        })
        .as_ref()
}

fn indent_width(line: &str) -> usize {
    line.chars()
        .take_while(|c| *c == ' ' || *c == '\t')
        .map(|c| if c == '\t' { 8 } else { 1 })
        .sum()
}

fn is_blank_or_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.is_empty() || trimmed.starts_with('#')
}

struct Header {
    index: usize,
    indent: usize,
    name: String,
}

/// Find the innermost `def`/`class` block containing the one-based `line`
pub fn parse_function_context(text: &str, line: u32) -> Option<FunctionContext> {
    let header = block_header()?;
    let lines: Vec<&str> = text.lines().collect();
    let target = (line as usize).checked_sub(1)?;
    if target >= lines.len() {
        return None;
    }

    // Walk up collecting the chain of enclosing headers, innermost first
    let mut chain: Vec<Header> = Vec::new();
    let mut limit = if is_blank_or_comment(lines[target]) {
        usize::MAX
    } else {
        indent_width(lines[target]) + 1
    };
    for index in (0..=target).rev() {
        let candidate = lines[index];
        if is_blank_or_comment(candidate) {
            continue;
        }
        let indent = indent_width(candidate);
        if indent >= limit {
            continue;
        }
        if let Some(caps) = header.captures(candidate) {
            let last = block_end(&lines, index, indent);
            if index == target || target <= last {
                chain.push(Header {
                    index,
                    indent,
                    name: caps["name"].to_string(),
                });
            }
        }
        limit = indent;
        if indent == 0 {
            break;
        }
    }

    let innermost = chain.first()?;
    let name = chain
        .iter()
        .rev()
        .map(|h| h.name.as_str())
        .collect::<Vec<_>>()
        .join(".");
    let end = block_end(&lines, innermost.index, innermost.indent);
    let header = signature_end(&lines, innermost.index);
    let signature = (innermost.index..=header.line)
        .map(|index| {
            let line = lines[index];
            if index == header.line {
                line[..header.end].trim()
            } else {
                line.trim()
            }
        })
        .collect::<Vec<_>>()
        .join(" ");

    let full = lines[innermost.index..=end].join("\n");
    let truncated = full.chars().count() > MAX_BODY_CHARS;
    let body = if truncated {
        full.chars().take(MAX_BODY_CHARS).collect()
    } else {
        full
    };

    Some(FunctionContext {
        name,
        signature,
        start_line: innermost.index as u32 + 1,
        end_line: end as u32 + 1,
        body,
        truncated,
    })
}

/// Last line belonging to the block whose header is at `start`
fn block_end(lines: &[&str], start: usize, indent: usize) -> usize {
    let mut end = signature_end(lines, start).line;
    for (index, line) in lines.iter().enumerate().skip(end + 1) {
        if is_blank_or_comment(line) {
            continue;
        }
        if indent_width(line) <= indent {
            break;
        }
        end = index;
    }
    end
}

/// Where a block header stops: the line holding its colon and the byte just past it
struct HeaderEnd {
    line: usize,
    end: usize,
}

/// Headers may wrap across lines; the first colon outside brackets and strings closes them
fn signature_end(lines: &[&str], start: usize) -> HeaderEnd {
    let mut depth: i32 = 0;
    let mut quote: Option<char> = None;
    for (index, line) in lines.iter().enumerate().skip(start) {
        let mut chars = line.char_indices();
        while let Some((at, c)) = chars.next() {
            if let Some(open) = quote {
                if c == '\\' {
                    chars.next();
                } else if c == open {
                    quote = None;
                }
                continue;
            }
            match c {
                '\'' | '"' => quote = Some(c),
                '#' => break,
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => depth -= 1,
                ':' if depth <= 0 => {
                    return HeaderEnd {
                        line: index,
                        end: at + 1,
                    }
                }
                _ => {}
            }
        }
    }
    HeaderEnd {
        line: start,
        end: lines[start].len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceOrigin;
    use std::time::Duration;

    const PROGRAM: &str = "\
import math

class Shape:
    def __init__(self, r):
        self.r = r

    def area(self,
             scale=1):
        # area of a circle
        a = math.pi * self.r ** 2

        return a * scale

def main():
    s = Shape(2)
    print(s.area())

main()
";

    fn source(text: &str) -> ResolvedSource {
        ResolvedSource::new("/t/shape.py", text.to_string(), SourceOrigin::Disk)
    }

    #[test]
    fn test_innermost_method_with_qualified_name() {
        let ctx = parse_function_context(PROGRAM, 10).unwrap();
        assert_eq!(ctx.name, "Shape.area");
        assert_eq!(ctx.signature, "def area(self, scale=1):");
        assert_eq!(ctx.start_line, 7);
        assert_eq!(ctx.end_line, 12);
        assert!(ctx.body.contains("return a * scale"));
        assert!(!ctx.truncated);
    }

    #[test]
    fn test_blank_line_inside_body_belongs_to_function() {
        let ctx = parse_function_context(PROGRAM, 11).unwrap();
        assert_eq!(ctx.name, "Shape.area");
    }

    #[test]
    fn test_header_line_is_its_own_context() {
        let ctx = parse_function_context(PROGRAM, 14).unwrap();
        assert_eq!(ctx.name, "main");
        assert_eq!(ctx.end_line, 16);
    }

    #[test]
    fn test_one_line_def_ends_at_its_colon() {
        let text = "def f(x): return x\n\nclass A:\n    def g(self, s=\"a:b\"):  # g: note\n        return s\n";

        let ctx = parse_function_context(text, 1).unwrap();
        assert_eq!(ctx.name, "f");
        assert_eq!(ctx.signature, "def f(x):");
        assert_eq!((ctx.start_line, ctx.end_line), (1, 1));
        assert_eq!(ctx.body, "def f(x): return x");

        let ctx = parse_function_context(text, 5).unwrap();
        assert_eq!(ctx.name, "A.g");
        assert_eq!(ctx.signature, "def g(self, s=\"a:b\"):");
        assert_eq!((ctx.start_line, ctx.end_line), (4, 5));
    }

    #[test]
    fn test_module_level_has_no_context() {
        assert_eq!(parse_function_context(PROGRAM, 1), None);
        assert_eq!(parse_function_context(PROGRAM, 18), None);
        assert_eq!(parse_function_context(PROGRAM, 0), None);
        assert_eq!(parse_function_context(PROGRAM, 500), None);
    }

    #[test]
    fn test_long_body_is_truncated() {
        let mut text = String::from("def big():\n");
        for i in 0..400 {
            text.push_str(&format!("    value_{i} = {i}\n"));
        }
        let ctx = parse_function_context(&text, 200).unwrap();
        assert!(ctx.truncated);
        assert_eq!(ctx.body.chars().count(), MAX_BODY_CHARS);
    }

    #[tokio::test]
    async fn test_lookup_is_pending_then_ready() {
        let extractor = FunctionContextExtractor::new();
        let mut done = extractor.subscribe();
        let src = source(PROGRAM);
        let file = src.file.clone();

        assert_eq!(extractor.lookup(&file, 15, &src), Lookup::Pending);

        let event = tokio::time::timeout(Duration::from_secs(5), done.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.line, 15);
        assert_eq!(event.context.as_ref().unwrap().name, "main");

        match extractor.lookup(&file, 15, &src) {
            Lookup::Ready(Some(ctx)) => assert_eq!(ctx.name, "main"),
            other => panic!("expected ready context, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_changed_content_is_a_new_key() {
        let extractor = FunctionContextExtractor::new();
        let mut done = extractor.subscribe();
        let first = source("def a():\n    x = 1\n");
        let second = source("def b():\n    x = 1\n");
        let file = first.file.clone();

        extractor.lookup(&file, 2, &first);
        tokio::time::timeout(Duration::from_secs(5), done.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(extractor.lookup(&file, 2, &second), Lookup::Pending);
        assert!(matches!(
            extractor.cached(&file, 2, &first),
            Some(Lookup::Ready(Some(_)))
        ));
    }
}
