//! Per-stop variable capture and activation-scoped deltas

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};

use super::diff::{compute_delta, Bindings, VariableDelta};
use super::value::{CapturedValue, SummaryCause};
use crate::dap::{DebuggeeLink, LinkError, StackFrame, StoppedEvent, Variable};
use crate::data::{ErrorDetails, LineStatus};
use crate::util::normalize_path;

/// Adapter-synthesized entries that are not program state
const HIDDEN_NAMES: &[&str] = &[
    "special variables",
    "function variables",
    "class variables",
    "protected variables",
    "len()",
];

const MAPPING_TYPES: &[&str] = &["dict", "OrderedDict", "defaultdict", "Counter", "mappingproxy"];

/// Bounds on how much of the debuggee's state one capture reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureLimits {
    /// Nesting depth expanded below each top-level binding
    pub max_depth: usize,
    /// Children kept per container before marking it truncated
    pub max_children: usize,
    /// Stack depth at which a step is flagged as a warning
    pub recursion_warning_depth: u32,
}

impl Default for CaptureLimits {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_children: 100,
            recursion_warning_depth: 200,
        }
    }
}

/// One live function call: thread plus `(function, file)` frames from the outermost
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivationKey {
    pub thread_id: i64,
    pub frames: Vec<(String, String)>,
}

impl ActivationKey {
    fn from_frames(thread_id: i64, frames: &[StackFrame]) -> Self {
        Self {
            thread_id,
            frames: frames
                .iter()
                .rev()
                .map(|f| (f.name.clone(), f.path.clone().unwrap_or_default()))
                .collect(),
        }
    }

    /// True while `self` is still on the stack described by `current`
    fn is_live_in(&self, current: &ActivationKey) -> bool {
        self.thread_id != current.thread_id || current.frames.starts_with(&self.frames)
    }
}

/// Where the debuggee stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopPoint {
    pub file: PathBuf,
    pub line: u32,
    pub function: String,
    pub frame_id: i64,
    /// Number of frames on the stack
    pub depth: u32,
    pub thread_id: i64,
    pub reason: String,
    pub activation: ActivationKey,
}

/// Everything recorded about one stop
#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    pub point: StopPoint,
    pub variables: Bindings,
    pub delta: VariableDelta,
    pub status: LineStatus,
    pub error: Option<ErrorDetails>,
}

impl Capture {
    /// Stand-in for a stop whose stack could not be read.
    ///
    /// The position is unknown, so the report lands on line 0 of `file`.
    pub fn unreadable(stop: &StoppedEvent, file: PathBuf, cause: &LinkError) -> Self {
        Self {
            point: StopPoint {
                file,
                line: 0,
                function: String::new(),
                frame_id: 0,
                depth: 0,
                thread_id: stop.thread_id,
                reason: stop.reason.clone(),
                activation: ActivationKey {
                    thread_id: stop.thread_id,
                    frames: Vec::new(),
                },
            },
            variables: Bindings::new(),
            delta: VariableDelta::default(),
            status: if stop.is_exception() {
                LineStatus::Error
            } else {
                LineStatus::Warning
            },
            error: Some(unreadable_details(cause)),
        }
    }
}

fn unreadable_details(cause: &LinkError) -> ErrorDetails {
    ErrorDetails {
        kind: None,
        message: Some(format!("stop state unreadable: {cause}")),
        stack_trace: None,
    }
}

/// Reads frame state through a link and diffs it per activation.
///
/// Holds only the previous bindings of each live activation.
#[derive(Debug, Default)]
pub struct CaptureEngine {
    limits: CaptureLimits,
    previous: HashMap<ActivationKey, Bindings>,
}

impl CaptureEngine {
    pub fn new(limits: CaptureLimits) -> Self {
        Self {
            limits,
            previous: HashMap::new(),
        }
    }

    pub fn limits(&self) -> &CaptureLimits {
        &self.limits
    }

    /// Number of activations with a remembered capture
    pub fn tracked_activations(&self) -> usize {
        self.previous.len()
    }

    /// Capture the top frame of a stopped thread
    pub async fn capture<L>(&mut self, link: &mut L, stop: &StoppedEvent) -> Result<Capture, LinkError>
    where
        L: DebuggeeLink + ?Sized,
    {
        let frames = link.stack_trace(stop.thread_id).await?;
        let top = frames.first().ok_or_else(|| LinkError::Rejected {
            command: "stackTrace".into(),
            message: format!("thread {} has no frames", stop.thread_id),
        })?;

        let activation = ActivationKey::from_frames(stop.thread_id, &frames);
        let point = StopPoint {
            file: top
                .path
                .as_deref()
                .map(|p| normalize_path(Path::new(p)))
                .unwrap_or_else(|| PathBuf::from(format!("<{}>", top.name))),
            line: top.line,
            function: top.name.clone(),
            frame_id: top.id,
            depth: frames.len() as u32,
            thread_id: stop.thread_id,
            reason: stop.reason.clone(),
            activation,
        };

        let (variables, unreadable) = match self.read_bindings(&mut *link, point.frame_id).await {
            Ok(variables) => (variables, None),
            Err(e) if !e.is_fatal() => {
                tracing::warn!(
                    file = %point.file.display(),
                    line = point.line,
                    error = %e,
                    "Bindings unreadable"
                );
                (Bindings::new(), Some(e))
            }
            Err(e) => return Err(e),
        };

        let (status, error) = if stop.is_exception() {
            let details = self.error_details(&mut *link, stop, &frames).await?;
            (LineStatus::Error, Some(details))
        } else if let Some(e) = &unreadable {
            (LineStatus::Warning, Some(unreadable_details(e)))
        } else if point.depth >= self.limits.recursion_warning_depth {
            (LineStatus::Warning, None)
        } else {
            (LineStatus::Success, None)
        };

        self.previous
            .retain(|key, _| key.is_live_in(&point.activation));
        // Missing bindings say nothing about what changed
        let delta = if unreadable.is_some() {
            VariableDelta::default()
        } else {
            let delta = compute_delta(self.previous.get(&point.activation), &variables);
            self.previous
                .insert(point.activation.clone(), variables.clone());
            delta
        };

        tracing::debug!(
            file = %point.file.display(),
            line = point.line,
            depth = point.depth,
            status = %status,
            variables = variables.len(),
            changed = delta.changed.len(),
            "Captured stop"
        );

        Ok(Capture {
            point,
            variables,
            delta,
            status,
            error,
        })
    }

    async fn read_bindings<L>(&self, link: &mut L, frame_id: i64) -> Result<Bindings, LinkError>
    where
        L: DebuggeeLink + ?Sized,
    {
        let mut bindings = BTreeMap::new();
        for scope in link.scopes(frame_id).await? {
            if scope.expensive || scope.variables_reference == 0 {
                continue;
            }
            let vars = match link.variables(scope.variables_reference).await {
                Ok(vars) => vars,
                Err(e) if !e.is_fatal() => {
                    tracing::warn!(scope = %scope.name, error = %e, "Skipping unreadable scope");
                    continue;
                }
                Err(e) => return Err(e),
            };
            for var in vars {
                if is_hidden(&var.name) || bindings.contains_key(&var.name) {
                    continue;
                }
                let mut path = Vec::new();
                let value = self.describe(&mut *link, &var, 0, &mut path).await?;
                bindings.insert(var.name, value);
            }
        }
        Ok(bindings)
    }

    /// Describe one variable, expanding children up to the depth limit
    fn describe<'a, L>(
        &'a self,
        link: &'a mut L,
        var: &'a Variable,
        depth: usize,
        path: &'a mut Vec<String>,
    ) -> BoxFuture<'a, Result<CapturedValue, LinkError>>
    where
        L: DebuggeeLink + ?Sized,
    {
        async move {
            let type_name = var.type_name.clone();
            if var.variables_reference == 0 {
                return Ok(CapturedValue::scalar(var.value.clone(), type_name));
            }

            let identity = var
                .memory_reference
                .clone()
                .unwrap_or_else(|| format!("ref:{}", var.variables_reference));
            if path.contains(&identity) {
                return Ok(CapturedValue::summary(
                    var.value.clone(),
                    type_name,
                    SummaryCause::Cycle,
                ));
            }
            if depth >= self.limits.max_depth {
                return Ok(CapturedValue::summary(
                    var.value.clone(),
                    type_name,
                    SummaryCause::DepthLimit,
                ));
            }

            let children = match link.variables(var.variables_reference).await {
                Ok(children) => children,
                Err(e) if !e.is_fatal() => {
                    tracing::debug!(name = %var.name, error = %e, "Child listing refused");
                    return Ok(CapturedValue::summary(
                        var.value.clone(),
                        type_name,
                        SummaryCause::Unreadable,
                    ));
                }
                Err(e) => return Err(e),
            };
            let mut children: Vec<Variable> =
                children.into_iter().filter(|c| !is_hidden(&c.name)).collect();
            if children.is_empty() {
                return Ok(CapturedValue::scalar(var.value.clone(), type_name));
            }
            let truncated = children.len() > self.limits.max_children;
            children.truncate(self.limits.max_children);

            let as_sequence = !type_name
                .as_deref()
                .is_some_and(|t| MAPPING_TYPES.contains(&t))
                && children.iter().all(|c| c.name.parse::<usize>().is_ok());

            path.push(identity);
            let mut described = Vec::with_capacity(children.len());
            for child in &children {
                let value = self.describe(&mut *link, child, depth + 1, &mut *path).await;
                match value {
                    Ok(value) => described.push((child.name.as_str(), value)),
                    Err(e) => {
                        path.pop();
                        return Err(e);
                    }
                }
            }
            path.pop();

            if as_sequence {
                Ok(CapturedValue::Sequence {
                    type_name,
                    items: described.into_iter().map(|(_, v)| v).collect(),
                    truncated,
                })
            } else {
                Ok(CapturedValue::Mapping {
                    type_name,
                    entries: described
                        .into_iter()
                        .map(|(name, v)| (unquote(name).to_string(), v))
                        .collect(),
                    truncated,
                })
            }
        }
        .boxed()
    }

    async fn error_details<L>(
        &self,
        link: &mut L,
        stop: &StoppedEvent,
        frames: &[StackFrame],
    ) -> Result<ErrorDetails, LinkError>
    where
        L: DebuggeeLink + ?Sized,
    {
        let stack_trace = frames
            .iter()
            .map(|f| format!("{}:{}", f.path.as_deref().unwrap_or(&f.name), f.line))
            .collect::<Vec<_>>()
            .join("\n");

        let (kind, message) = match link.exception_info(stop.thread_id).await {
            Ok(info) => (
                Some(info.exception_id),
                info.message.or(info.description).or_else(|| stop.description.clone()),
            ),
            Err(e) if !e.is_fatal() => {
                tracing::debug!(error = %e, "exceptionInfo refused, using stop event text");
                (stop.text.clone(), stop.description.clone())
            }
            Err(e) => return Err(e),
        };

        Ok(ErrorDetails {
            kind,
            message,
            stack_trace: Some(stack_trace),
        })
    }
}

fn is_hidden(name: &str) -> bool {
    HIDDEN_NAMES.contains(&name) || (name.len() > 4 && name.starts_with("__") && name.ends_with("__"))
}

/// `'key'` -> `key`; other names unchanged
fn unquote(name: &str) -> &str {
    for quote in ['\'', '"'] {
        if name.len() >= 2 && name.starts_with(quote) && name.ends_with(quote) {
            return &name[1..name.len() - 1];
        }
    }
    name
}
