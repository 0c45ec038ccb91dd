//! Spelling out code syntax for a speech engine
//!
//! TTS engines skip most punctuation, so `f(a[0])` and `f a 0` sound the
//! same. [`speakable`] replaces brackets and operators with words and
//! numbers bracket pairs by nesting level. String literals are read as they
//! are and a `#` comment becomes "comment" followed by its text.

use std::sync::OnceLock;

use regex::{Captures, Regex};

fn syntax_tokens() -> Option<&'static Regex> {
    static TOKENS: OnceLock<Option<Regex>> = OnceLock::new();
    TOKENS
        .get_or_init(|| Regex::new(r"\*\*|//|==|!=|<=|>=|->|[-+*/%<>=:;,()\[\]{}]").ok())
        .as_ref()
}

fn operator_word(token: &str) -> Option<&'static str> {
    let word = match token {
        "**" => "power",
        "//" => "floor divide",
        "==" => "equals equals",
        "!=" => "not equals",
        "<=" => "less than or equal to",
        ">=" => "greater than or equal to",
        "->" => "arrow",
        "<" => "less than",
        ">" => "greater than",
        "=" => "equals",
        "+" => "plus",
        "-" => "minus",
        "*" => "times",
        "/" => "divide",
        "%" => "modulo",
        ":" => "colon",
        ";" => "semicolon",
        "," => "comma",
        _ => return None,
    };
    Some(word)
}

/// Open bracket counts per kind, carried across string literals
#[derive(Debug, Default)]
struct Nesting {
    paren: u32,
    bracket: u32,
    brace: u32,
}

impl Nesting {
    fn speak(&mut self, token: &str) -> Option<String> {
        let (name, depth, opening) = match token {
            "(" => ("paren", &mut self.paren, true),
            ")" => ("paren", &mut self.paren, false),
            "[" => ("bracket", &mut self.bracket, true),
            "]" => ("bracket", &mut self.bracket, false),
            "{" => ("brace", &mut self.brace, true),
            "}" => ("brace", &mut self.brace, false),
            _ => return None,
        };
        if opening {
            *depth += 1;
            Some(format!(" open {name} level {depth} "))
        } else if *depth > 0 {
            let spoken = format!(" close {name} level {depth} ");
            *depth -= 1;
            Some(spoken)
        } else {
            Some(format!(" close {name} "))
        }
    }
}

fn spell(tokens: &Regex, code: &str, nesting: &mut Nesting) -> String {
    tokens
        .replace_all(code, |caps: &Captures| {
            let token = &caps[0];
            nesting
                .speak(token)
                .unwrap_or_else(|| format!(" {} ", operator_word(token).unwrap_or(token)))
        })
        .into_owned()
}

/// Rewrite one line of code, or a value's repr, into words a speech engine reads out
pub fn speakable(text: &str) -> String {
    let Some(tokens) = syntax_tokens() else {
        return text.to_string();
    };
    let mut nesting = Nesting::default();
    let mut out = String::with_capacity(text.len() * 2);
    let mut code = String::new();
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                out.push_str(&spell(tokens, &code, &mut nesting));
                code.clear();
                out.push(c);
                while let Some(inner) = chars.next() {
                    out.push(inner);
                    if inner == '\\' {
                        if let Some(escaped) = chars.next() {
                            out.push(escaped);
                        }
                    } else if inner == c {
                        break;
                    }
                }
            }
            '#' => {
                out.push_str(&spell(tokens, &code, &mut nesting));
                code.clear();
                out.push_str(" comment ");
                out.push_str(chars.as_str().trim());
                break;
            }
            _ => code.push(c),
        }
    }
    out.push_str(&spell(tokens, &code, &mut nesting));

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}
