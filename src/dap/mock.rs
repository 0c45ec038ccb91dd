//! Scripted debuggee for deterministic testing
//!
//! Implements `DebuggeeLink` over a fixed list of stops without spawning a
//! debug adapter. Every request is recorded so tests can assert on the
//! exact conversation the controller had with the link.
//!
//! # Example
//! ```no_run
//! use stepwise::dap::mock::{MockDebuggee, MockStop, MockValue};
//!
//! let program = vec![
//!     MockStop::at("/tmp/t.py", 1).var("x", MockValue::int(1)),
//!     MockStop::at("/tmp/t.py", 2).var("x", MockValue::int(2)),
//! ];
//! let link = MockDebuggee::new(program);
//! let handle = link.handle();
//! // Drive `link` with a controller, then inspect `handle.requests()`.
//! ```

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::link::{
    DebuggeeLink, ExceptionInfo, LinkError, LinkEvent, Scope, StackFrame, StoppedEvent, Variable,
};

/// A value as the adapter would expose it
#[derive(Debug, Clone, PartialEq)]
pub enum MockValue {
    Scalar { value: String, type_name: String },
    List(Vec<MockValue>),
    Dict(Vec<(String, MockValue)>),
    Object {
        type_name: String,
        fields: Vec<(String, MockValue)>,
    },
    /// Refers back to the enclosing container (a reference cycle)
    Parent,
}

impl MockValue {
    pub fn int(value: i64) -> Self {
        MockValue::Scalar {
            value: value.to_string(),
            type_name: "int".into(),
        }
    }

    pub fn str(value: &str) -> Self {
        MockValue::Scalar {
            value: format!("'{value}'"),
            type_name: "str".into(),
        }
    }

    fn type_name(&self) -> &str {
        match self {
            MockValue::Scalar { type_name, .. } | MockValue::Object { type_name, .. } => type_name,
            MockValue::List(_) => "list",
            MockValue::Dict(_) => "dict",
            MockValue::Parent => "object",
        }
    }

    fn rendering(&self) -> String {
        match self {
            MockValue::Scalar { value, .. } => value.clone(),
            MockValue::List(items) => {
                let parts: Vec<_> = items.iter().map(MockValue::rendering).collect();
                format!("[{}]", parts.join(", "))
            }
            MockValue::Dict(entries) => {
                let parts: Vec<_> = entries
                    .iter()
                    .map(|(k, v)| format!("'{k}': {}", v.rendering()))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            MockValue::Object { type_name, .. } => format!("<{type_name} object>"),
            MockValue::Parent => "[...]".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MockException {
    pub kind: String,
    pub message: String,
}

/// One place the scripted program stops
#[derive(Debug, Clone)]
pub struct MockStop {
    pub file: PathBuf,
    pub line: u32,
    /// Enclosing functions, innermost first; the innermost is the stopping frame
    pub functions: Vec<String>,
    pub locals: Vec<(String, MockValue)>,
    pub globals: Vec<(String, MockValue)>,
    pub exception: Option<MockException>,
    pub thread_id: i64,
    /// The adapter rejects `scopes` for this stop's frames
    pub scopes_rejected: bool,
}

impl MockStop {
    pub fn at(file: impl Into<PathBuf>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
            functions: vec!["<module>".into()],
            locals: Vec::new(),
            globals: Vec::new(),
            exception: None,
            thread_id: 1,
            scopes_rejected: false,
        }
    }

    pub fn var(mut self, name: &str, value: MockValue) -> Self {
        self.locals.push((name.to_string(), value));
        self
    }

    pub fn global(mut self, name: &str, value: MockValue) -> Self {
        self.globals.push((name.to_string(), value));
        self
    }

    /// Call chain, innermost first (e.g. `["inner", "outer", "<module>"]`)
    pub fn in_functions(mut self, functions: &[&str]) -> Self {
        self.functions = functions.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn raising(mut self, kind: &str, message: &str) -> Self {
        self.exception = Some(MockException {
            kind: kind.into(),
            message: message.into(),
        });
        self
    }

    pub fn with_unreadable_scopes(mut self) -> Self {
        self.scopes_rejected = true;
        self
    }

    fn stop_reason(&self, default: &str) -> String {
        if self.exception.is_some() {
            "exception".into()
        } else {
            default.into()
        }
    }
}

/// Shared view of what the controller asked for
#[derive(Debug, Default)]
struct MockState {
    requests: Vec<String>,
    disconnected: bool,
}

/// Handle for inspecting a `MockDebuggee` after it was moved into a controller
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    /// Every request in order (`next`, `continue`, `variables`, ...)
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().requests.clone()
    }

    /// Number of requests with the given command
    pub fn count(&self, command: &str) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.as_str() == command)
            .count()
    }

    pub fn disconnected(&self) -> bool {
        self.state.lock().disconnected
    }
}

/// Scripted implementation of `DebuggeeLink`
pub struct MockDebuggee {
    program: Vec<MockStop>,
    position: Option<usize>,
    events: VecDeque<LinkEvent>,
    exit_code: i64,
    /// Fail with a lost connection on this (zero-based) step request
    fail_on_step: Option<usize>,
    steps_taken: usize,
    step_delay: Duration,
    /// variablesReference -> children, rebuilt at each stop
    registry: HashMap<i64, Vec<Variable>>,
    next_ref: i64,
    state: Arc<Mutex<MockState>>,
}

const FRAME_ID_BASE: i64 = 1000;

impl MockDebuggee {
    /// The program starts stopped on its first entry
    pub fn new(program: Vec<MockStop>) -> Self {
        let mut events = VecDeque::new();
        match program.first() {
            Some(first) => events.push_back(LinkEvent::Stopped(StoppedEvent {
                thread_id: first.thread_id,
                reason: first.stop_reason("entry"),
                description: None,
                text: None,
            })),
            None => events.push_back(LinkEvent::Terminated { exit_code: Some(0) }),
        }
        Self {
            position: if program.is_empty() { None } else { Some(0) },
            program,
            events,
            exit_code: 0,
            fail_on_step: None,
            steps_taken: 0,
            step_delay: Duration::ZERO,
            registry: HashMap::new(),
            next_ref: 1,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    pub fn with_exit_code(mut self, code: i64) -> Self {
        self.exit_code = code;
        self
    }

    /// Lose the connection on the given zero-based step request
    pub fn failing_on_step(mut self, step: usize) -> Self {
        self.fail_on_step = Some(step);
        self
    }

    /// Simulate a slow debuggee
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: self.state.clone(),
        }
    }

    fn record(&self, command: &str) {
        self.state.lock().requests.push(command.to_string());
    }

    fn current(&self) -> Result<&MockStop, LinkError> {
        self.position
            .and_then(|i| self.program.get(i))
            .ok_or_else(|| LinkError::Rejected {
                command: "stackTrace".into(),
                message: "debuggee is not stopped".into(),
            })
    }

    fn advance_to(&mut self, index: Option<usize>, reason: &str) {
        self.registry.clear();
        match index.and_then(|i| self.program.get(i).map(|stop| (i, stop))) {
            Some((i, stop)) => {
                self.position = Some(i);
                self.events.push_back(LinkEvent::Stopped(StoppedEvent {
                    thread_id: stop.thread_id,
                    reason: stop.stop_reason(reason),
                    description: stop.exception.as_ref().map(|e| e.message.clone()),
                    text: stop.exception.as_ref().map(|e| e.kind.clone()),
                }));
            }
            None => {
                self.position = None;
                self.events.push_back(LinkEvent::Terminated {
                    exit_code: Some(self.exit_code),
                });
            }
        }
    }

    fn register(&mut self, value: &MockValue, parent: Option<(i64, String)>) -> (i64, Option<String>) {
        let children = match value {
            MockValue::Scalar { .. } => return (0, None),
            MockValue::Parent => {
                return parent
                    .map(|(reference, memory)| (reference, Some(memory)))
                    .unwrap_or((0, None));
            }
            MockValue::List(items) => {
                let mut named: Vec<(String, MockValue)> = items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (i.to_string(), v.clone()))
                    .collect();
                named.push(("len()".into(), MockValue::int(items.len() as i64)));
                named
            }
            MockValue::Dict(entries) => {
                let mut named: Vec<(String, MockValue)> = entries
                    .iter()
                    .map(|(k, v)| (format!("'{k}'"), v.clone()))
                    .collect();
                named.push(("len()".into(), MockValue::int(entries.len() as i64)));
                named
            }
            MockValue::Object { fields, .. } => {
                let mut named = vec![(
                    "special variables".to_string(),
                    MockValue::Object {
                        type_name: "special".into(),
                        fields: vec![("__doc__".into(), MockValue::str("none"))],
                    },
                )];
                named.extend(fields.iter().cloned());
                named
            }
        };

        let reference = self.next_ref;
        self.next_ref += 1;
        let memory = format!("0x{:x}", 0x7f00_0000 + reference);
        let variables = self.materialize(&children, Some((reference, memory.clone())));
        self.registry.insert(reference, variables);
        (reference, Some(memory))
    }

    fn materialize(
        &mut self,
        named: &[(String, MockValue)],
        parent: Option<(i64, String)>,
    ) -> Vec<Variable> {
        named
            .iter()
            .map(|(name, value)| {
                let (variables_reference, memory_reference) = self.register(value, parent.clone());
                Variable {
                    name: name.clone(),
                    value: value.rendering(),
                    type_name: Some(value.type_name().to_string()),
                    variables_reference,
                    memory_reference,
                }
            })
            .collect()
    }
}

#[async_trait]
impl DebuggeeLink for MockDebuggee {
    async fn wait_for_stop(&mut self) -> Result<LinkEvent, LinkError> {
        self.events
            .pop_front()
            .ok_or_else(|| LinkError::ConnectionLost("mock debuggee has no pending event".into()))
    }

    async fn step(&mut self, _thread_id: i64) -> Result<(), LinkError> {
        self.record("stepIn");
        if !self.step_delay.is_zero() {
            tokio::time::sleep(self.step_delay).await;
        }
        if self.fail_on_step == Some(self.steps_taken) {
            return Err(LinkError::ConnectionLost("mock connection dropped".into()));
        }
        self.steps_taken += 1;
        let next = match self.position {
            Some(i) if self.program[i].exception.is_some() => None,
            Some(i) => Some(i + 1),
            None => None,
        };
        self.advance_to(next, "step");
        Ok(())
    }

    async fn resume(&mut self, _thread_id: i64) -> Result<(), LinkError> {
        self.record("continue");
        let next = match self.position {
            Some(i) if self.program[i].exception.is_none() => self
                .program
                .iter()
                .enumerate()
                .skip(i + 1)
                .find(|(_, stop)| stop.exception.is_some())
                .map(|(index, _)| index),
            _ => None,
        };
        self.advance_to(next, "breakpoint");
        Ok(())
    }

    async fn stack_trace(&mut self, _thread_id: i64) -> Result<Vec<StackFrame>, LinkError> {
        self.record("stackTrace");
        let stop = self.current()?;
        let path = stop.file.to_string_lossy().to_string();
        Ok(stop
            .functions
            .iter()
            .enumerate()
            .map(|(i, name)| StackFrame {
                id: FRAME_ID_BASE + i as i64,
                name: name.clone(),
                path: Some(path.clone()),
                line: if i == 0 { stop.line } else { 1 },
            })
            .collect())
    }

    async fn scopes(&mut self, frame_id: i64) -> Result<Vec<Scope>, LinkError> {
        self.record("scopes");
        let stop = self.current()?.clone();
        if stop.scopes_rejected {
            return Err(LinkError::Rejected {
                command: "scopes".into(),
                message: format!("frame {frame_id} is not available"),
            });
        }
        if frame_id != FRAME_ID_BASE {
            return Ok(Vec::new());
        }
        let locals = self.materialize(&stop.locals, None);
        let globals = self.materialize(&stop.globals, None);
        let locals_ref = self.next_ref;
        let globals_ref = self.next_ref + 1;
        self.next_ref += 2;
        self.registry.insert(locals_ref, locals);
        self.registry.insert(globals_ref, globals);
        Ok(vec![
            Scope {
                name: "Locals".into(),
                variables_reference: locals_ref,
                expensive: false,
            },
            Scope {
                name: "Globals".into(),
                variables_reference: globals_ref,
                expensive: false,
            },
        ])
    }

    async fn variables(&mut self, variables_reference: i64) -> Result<Vec<Variable>, LinkError> {
        self.record("variables");
        self.registry
            .get(&variables_reference)
            .cloned()
            .ok_or_else(|| LinkError::Rejected {
                command: "variables".into(),
                message: format!("unknown variablesReference {variables_reference}"),
            })
    }

    async fn exception_info(&mut self, _thread_id: i64) -> Result<ExceptionInfo, LinkError> {
        self.record("exceptionInfo");
        let stop = self.current()?;
        match &stop.exception {
            Some(exception) => Ok(ExceptionInfo {
                exception_id: exception.kind.clone(),
                description: Some(exception.message.clone()),
                message: Some(exception.message.clone()),
            }),
            None => Err(LinkError::Rejected {
                command: "exceptionInfo".into(),
                message: "no exception".into(),
            }),
        }
    }

    async fn disconnect(&mut self) -> Result<(), LinkError> {
        self.record("disconnect");
        self.state.lock().disconnected = true;
        Ok(())
    }
}
