//! Spawning the Python debug adapter and bringing a launch session up

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::Command;

use super::client::DapClient;
use super::link::LinkError;

/// How to start the debug adapter
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    /// Interpreter that has `debugpy` installed; found on PATH when unset
    pub python: Option<PathBuf>,
    pub host: String,
    /// How long to keep retrying the initial connection
    pub connect_timeout: Duration,
    /// Only step through user code
    pub just_my_code: bool,
    /// Where debugpy writes its own logs, if anywhere
    pub log_dir: Option<PathBuf>,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            python: None,
            host: "127.0.0.1".to_string(),
            connect_timeout: Duration::from_secs(15),
            just_my_code: true,
            log_dir: None,
        }
    }
}

impl AdapterSettings {
    /// Configured interpreter, else `python3`, else `python`
    pub fn resolve_python(&self) -> Option<PathBuf> {
        if let Some(path) = &self.python {
            return Some(path.clone());
        }
        which::which("python3")
            .or_else(|_| which::which("python"))
            .ok()
    }
}

/// The program to debug
#[derive(Debug, Clone)]
pub struct LaunchTarget {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl LaunchTarget {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        let cwd = program
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            program,
            args: Vec::new(),
            cwd,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

/// Ask the OS for a port nobody is listening on
fn free_port(host: &str) -> Result<u16, LinkError> {
    let listener = std::net::TcpListener::bind((host, 0))?;
    Ok(listener.local_addr()?.port())
}

async fn connect_with_retry(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, LinkError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match TcpStream::connect((host, port)).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) if tokio::time::Instant::now() < deadline => {
                tracing::trace!(error = %e, port, "Adapter not listening yet");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Err(e) => {
                return Err(LinkError::ConnectionLost(format!(
                    "could not connect to debug adapter on {host}:{port}: {e}"
                )))
            }
        }
    }
}

/// Spawn `python -m debugpy.adapter`, connect, and launch the target.
///
/// On success the debuggee is configured and about to hit its entry stop.
pub async fn launch(settings: &AdapterSettings, target: &LaunchTarget) -> Result<DapClient, LinkError> {
    let python = settings.resolve_python().ok_or_else(|| {
        LinkError::Io("no python interpreter found (set adapter.python in config.toml)".into())
    })?;
    let port = free_port(&settings.host)?;

    let mut cmd = Command::new(&python);
    cmd.arg("-m")
        .arg("debugpy.adapter")
        .arg("--host")
        .arg(&settings.host)
        .arg("--port")
        .arg(port.to_string());
    cmd.env("PYTHONUNBUFFERED", "1");
    if let Some(log_dir) = &settings.log_dir {
        cmd.env("DEBUGPY_LOG_DIR", log_dir);
    }
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::null());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    tracing::info!(
        python = %python.display(),
        host = %settings.host,
        port,
        program = %target.program.display(),
        "Starting debug adapter"
    );
    let mut child = cmd.spawn()?;

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(target: "stepwise::adapter", "{}", line);
            }
        });
    }

    let stream = connect_with_retry(&settings.host, port, settings.connect_timeout).await?;
    let mut client = DapClient::from_stream(stream).with_adapter_process(child);

    client
        .request(
            "initialize",
            json!({
                "clientID": "stepwise",
                "clientName": "stepwise",
                "adapterID": "python",
                "pathFormat": "path",
                "linesStartAt1": true,
                "columnsStartAt1": true,
                "locale": "en-US",
                "supportsVariableType": true,
                "supportsRunInTerminalRequest": false,
            }),
        )
        .await?;

    // debugpy answers `launch` only after `configurationDone`
    let launch = client
        .send_request(
            "launch",
            json!({
                "name": "stepwise",
                "type": "python",
                "request": "launch",
                "program": target.program,
                "args": target.args,
                "cwd": target.cwd,
                "console": "internalConsole",
                "redirectOutput": true,
                "stopOnEntry": true,
                "justMyCode": settings.just_my_code,
            }),
        )
        .await?;

    client.wait_for_event("initialized").await?;
    client
        .request(
            "setExceptionBreakpoints",
            json!({ "filters": ["raised", "uncaught"] }),
        )
        .await?;
    client.request("configurationDone", json!({})).await?;
    client.await_response(launch).await?;

    tracing::info!(program = %target.program.display(), "Debuggee launched");
    Ok(client)
}
