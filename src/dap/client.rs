//! DAP client over an async byte stream (TCP in production)

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::link::{
    DebuggeeLink, ExceptionInfo, LinkError, LinkEvent, Scope, StackFrame, StoppedEvent, Variable,
};
use super::transport::{read_message, write_message};

type SharedWriter = Arc<tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;
type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<Value>>>>;

/// A request sent but not yet answered
pub struct PendingResponse {
    command: String,
    rx: oneshot::Receiver<Value>,
}

/// Client side of one DAP connection.
///
/// A reader task routes responses to their waiting request by `request_seq`,
/// queues events, and refuses reverse requests.
pub struct DapClient {
    writer: SharedWriter,
    pending: PendingMap,
    seq: Arc<AtomicI64>,
    events: mpsc::UnboundedReceiver<Value>,
    /// Events received while waiting for something else
    backlog: VecDeque<Value>,
    closed_reason: Arc<Mutex<Option<String>>>,
    reader_task: JoinHandle<()>,
    exit_code: Option<i64>,
    last_thread_id: Option<i64>,
    disconnected: bool,
    adapter: Option<Child>,
}

impl DapClient {
    /// Wrap a connected stream
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(Box::new(write_half)));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let seq = Arc::new(AtomicI64::new(1));
        let closed_reason = Arc::new(Mutex::new(None));
        let (event_tx, events) = mpsc::unbounded_channel();

        let reader_task = tokio::spawn(reader_loop(
            BufReader::new(read_half),
            writer.clone(),
            pending.clone(),
            seq.clone(),
            event_tx,
            closed_reason.clone(),
        ));

        Self {
            writer,
            pending,
            seq,
            events,
            backlog: VecDeque::new(),
            closed_reason,
            reader_task,
            exit_code: None,
            last_thread_id: None,
            disconnected: false,
            adapter: None,
        }
    }

    /// Keep the adapter process alive for as long as the client
    pub fn with_adapter_process(mut self, child: Child) -> Self {
        self.adapter = Some(child);
        self
    }

    fn connection_lost(&self) -> LinkError {
        let reason = self
            .closed_reason
            .lock()
            .clone()
            .unwrap_or_else(|| "adapter closed the connection".to_string());
        LinkError::ConnectionLost(reason)
    }

    /// Send a request without waiting for its response
    pub async fn send_request(
        &mut self,
        command: &str,
        arguments: Value,
    ) -> Result<PendingResponse, LinkError> {
        if self.reader_task.is_finished() {
            return Err(self.connection_lost());
        }
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(seq, tx);

        let message = json!({
            "seq": seq,
            "type": "request",
            "command": command,
            "arguments": arguments,
        });
        tracing::trace!(seq, command, "DAP request");
        let result = {
            let mut writer = self.writer.lock().await;
            write_message(&mut *writer, &message).await
        };
        if let Err(e) = result {
            self.pending.lock().remove(&seq);
            return Err(e);
        }
        // The reader may have shut down before our waiter was registered
        let closed = self.closed_reason.lock().is_some();
        if closed && self.pending.lock().remove(&seq).is_some() {
            return Err(self.connection_lost());
        }
        Ok(PendingResponse {
            command: command.to_string(),
            rx,
        })
    }

    /// Wait for a previously sent request; returns the response body
    pub async fn await_response(&mut self, pending: PendingResponse) -> Result<Value, LinkError> {
        let response = match pending.rx.await {
            Ok(response) => response,
            Err(_) => return Err(self.connection_lost()),
        };
        if response.get("success").and_then(Value::as_bool) == Some(true) {
            return Ok(response.get("body").cloned().unwrap_or(Value::Null));
        }
        let message = response
            .pointer("/body/error/format")
            .and_then(Value::as_str)
            .or_else(|| response.get("message").and_then(Value::as_str))
            .unwrap_or("request failed")
            .to_string();
        Err(LinkError::Rejected {
            command: pending.command,
            message,
        })
    }

    /// Send a request and wait for its response body
    pub async fn request(&mut self, command: &str, arguments: Value) -> Result<Value, LinkError> {
        let pending = self.send_request(command, arguments).await?;
        self.await_response(pending).await
    }

    async fn next_event(&mut self) -> Result<Value, LinkError> {
        if let Some(event) = self.backlog.pop_front() {
            return Ok(event);
        }
        match self.events.recv().await {
            Some(event) => Ok(event),
            None => Err(self.connection_lost()),
        }
    }

    /// Wait for a named event, keeping any others for later
    pub async fn wait_for_event(&mut self, name: &str) -> Result<Value, LinkError> {
        if let Some(index) = self
            .backlog
            .iter()
            .position(|event| event.get("event").and_then(Value::as_str) == Some(name))
        {
            if let Some(event) = self.backlog.remove(index) {
                return Ok(event);
            }
        }
        loop {
            let event = match self.events.recv().await {
                Some(event) => event,
                None => return Err(self.connection_lost()),
            };
            if event.get("event").and_then(Value::as_str) == Some(name) {
                return Ok(event);
            }
            self.backlog.push_back(event);
        }
    }
}

#[async_trait]
impl DebuggeeLink for DapClient {
    async fn wait_for_stop(&mut self) -> Result<LinkEvent, LinkError> {
        loop {
            let event = self.next_event().await?;
            let name = event.get("event").and_then(Value::as_str).unwrap_or_default();
            let body = event.get("body").cloned().unwrap_or(Value::Null);
            match name {
                "stopped" => {
                    let thread_id = body
                        .get("threadId")
                        .and_then(Value::as_i64)
                        .or(self.last_thread_id)
                        .ok_or_else(|| LinkError::Malformed("stopped event without threadId".into()))?;
                    self.last_thread_id = Some(thread_id);
                    return Ok(LinkEvent::Stopped(StoppedEvent {
                        thread_id,
                        reason: str_field(&body, "reason").unwrap_or_else(|| "unknown".into()),
                        description: str_field(&body, "description"),
                        text: str_field(&body, "text"),
                    }));
                }
                "exited" => {
                    self.exit_code = body.get("exitCode").and_then(Value::as_i64);
                    tracing::debug!(exit_code = ?self.exit_code, "Debuggee exited");
                }
                "terminated" => {
                    return Ok(LinkEvent::Terminated {
                        exit_code: self.exit_code,
                    });
                }
                "output" => {
                    if let Some(output) = body.get("output").and_then(Value::as_str) {
                        let category = body
                            .get("category")
                            .and_then(|v| v.as_str())
                            .unwrap_or("console");
                        tracing::debug!(
                            category,
                            output = output.trim_end(),
                            "Debuggee output"
                        );
                    }
                }
                other => {
                    tracing::trace!(event = other, "Ignoring DAP event");
                }
            }
        }
    }

    async fn step(&mut self, thread_id: i64) -> Result<(), LinkError> {
        self.request("stepIn", json!({ "threadId": thread_id })).await?;
        Ok(())
    }

    async fn resume(&mut self, thread_id: i64) -> Result<(), LinkError> {
        self.request("continue", json!({ "threadId": thread_id })).await?;
        Ok(())
    }

    async fn stack_trace(&mut self, thread_id: i64) -> Result<Vec<StackFrame>, LinkError> {
        let body = self
            .request(
                "stackTrace",
                json!({ "threadId": thread_id, "startFrame": 0, "levels": 0 }),
            )
            .await?;
        Ok(parse_stack_frames(&body))
    }

    async fn scopes(&mut self, frame_id: i64) -> Result<Vec<Scope>, LinkError> {
        let body = self.request("scopes", json!({ "frameId": frame_id })).await?;
        Ok(parse_scopes(&body))
    }

    async fn variables(&mut self, variables_reference: i64) -> Result<Vec<Variable>, LinkError> {
        let body = self
            .request(
                "variables",
                json!({ "variablesReference": variables_reference }),
            )
            .await?;
        Ok(parse_variables(&body))
    }

    async fn exception_info(&mut self, thread_id: i64) -> Result<ExceptionInfo, LinkError> {
        let body = self
            .request("exceptionInfo", json!({ "threadId": thread_id }))
            .await?;
        Ok(ExceptionInfo {
            exception_id: str_field(&body, "exceptionId").unwrap_or_else(|| "Exception".into()),
            description: str_field(&body, "description"),
            message: body
                .pointer("/details/message")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    async fn disconnect(&mut self) -> Result<(), LinkError> {
        if self.disconnected {
            return Ok(());
        }
        self.disconnected = true;
        let result = self
            .request("disconnect", json!({ "terminateDebuggee": true }))
            .await;
        if let Some(mut child) = self.adapter.take() {
            if let Err(e) = child.kill().await {
                tracing::debug!(error = %e, "Adapter process already gone");
            }
        }
        match result {
            Ok(_) => Ok(()),
            // The adapter may drop the socket before answering
            Err(LinkError::ConnectionLost(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for DapClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn reader_loop<R>(
    mut reader: BufReader<R>,
    writer: SharedWriter,
    pending: PendingMap,
    seq: Arc<AtomicI64>,
    events: mpsc::UnboundedSender<Value>,
    closed_reason: Arc<Mutex<Option<String>>>,
) where
    R: AsyncRead + Unpin,
{
    let reason = loop {
        let message = match read_message(&mut reader).await {
            Ok(Some(message)) => message,
            Ok(None) => break "adapter closed the connection".to_string(),
            Err(e) => break e.to_string(),
        };

        match message.get("type").and_then(Value::as_str) {
            Some("response") => {
                let Some(request_seq) = message.get("request_seq").and_then(Value::as_i64) else {
                    tracing::warn!("DAP response without request_seq");
                    continue;
                };
                let waiter = pending.lock().remove(&request_seq);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(message);
                    }
                    None => tracing::debug!(request_seq, "Unsolicited DAP response"),
                }
            }
            Some("event") => {
                if events.send(message).is_err() {
                    break "client dropped".to_string();
                }
            }
            Some("request") => {
                let command = message
                    .get("command")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                tracing::debug!(command = %command, "Refusing reverse request");
                let reply = json!({
                    "seq": seq.fetch_add(1, Ordering::SeqCst),
                    "type": "response",
                    "request_seq": message.get("seq").cloned().unwrap_or(Value::Null),
                    "command": command,
                    "success": false,
                    "message": format!("{command} is not supported by this client"),
                });
                let mut writer = writer.lock().await;
                if let Err(e) = write_message(&mut *writer, &reply).await {
                    break e.to_string();
                }
            }
            other => tracing::debug!(kind = ?other, "Ignoring DAP message"),
        }
    };

    tracing::debug!(reason = %reason, "DAP reader stopped");
    *closed_reason.lock() = Some(reason);
    // Dropping the senders wakes every waiting request with an error
    pending.lock().clear();
}

fn str_field(body: &Value, key: &str) -> Option<String> {
    body.get(key).and_then(Value::as_str).map(str::to_string)
}

fn parse_stack_frames(body: &Value) -> Vec<StackFrame> {
    body.get("stackFrames")
        .and_then(Value::as_array)
        .map(|frames| {
            frames
                .iter()
                .filter_map(|frame| {
                    Some(StackFrame {
                        id: frame.get("id")?.as_i64()?,
                        name: str_field(frame, "name").unwrap_or_default(),
                        path: frame
                            .pointer("/source/path")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        line: frame.get("line").and_then(Value::as_u64).unwrap_or(0) as u32,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_scopes(body: &Value) -> Vec<Scope> {
    body.get("scopes")
        .and_then(Value::as_array)
        .map(|scopes| {
            scopes
                .iter()
                .map(|scope| Scope {
                    name: str_field(scope, "name").unwrap_or_default(),
                    variables_reference: scope
                        .get("variablesReference")
                        .and_then(Value::as_i64)
                        .unwrap_or(0),
                    expensive: scope
                        .get("expensive")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_variables(body: &Value) -> Vec<Variable> {
    body.get("variables")
        .and_then(Value::as_array)
        .map(|vars| {
            vars.iter()
                .map(|var| Variable {
                    name: str_field(var, "name").unwrap_or_default(),
                    value: str_field(var, "value").unwrap_or_default(),
                    type_name: str_field(var, "type"),
                    variables_reference: var
                        .get("variablesReference")
                        .and_then(Value::as_i64)
                        .unwrap_or(0),
                    memory_reference: str_field(var, "memoryReference"),
                })
                .collect()
        })
        .unwrap_or_default()
}
