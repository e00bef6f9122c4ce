//! Stdio transport: one long-lived child process speaking newline-delimited JSON-RPC.

use std::collections::BTreeMap;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::Transport;
use crate::config::ServerConfig;
use crate::error::{RelayError, Result};
use crate::jsonrpc::{self, RequestEnvelope, RequestIdSequence};
use crate::reassembly::ResponseBuffer;

/// Time the child gets to come up before it is checked for an early exit.
const STARTUP_GRACE: Duration = Duration::from_millis(500);
/// Upper bound on one wait for output inside the response loop.
const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Window for collecting output left over from earlier exchanges.
const STALE_DRAIN_WINDOW: Duration = Duration::from_millis(10);
/// How long to keep reading a dead child's pipes for diagnostics.
const CAPTURE_WAIT: Duration = Duration::from_millis(500);
/// Graceful exit window after stdin is closed, before the child is killed.
const CLOSE_WAIT: Duration = Duration::from_secs(2);
/// Captured output in error messages is cut at this many characters.
const DIAGNOSTIC_CHARS: usize = 2000;
/// Retained stderr is capped at this many bytes; older output is dropped.
const STDERR_CAP: usize = 64 * 1024;
/// Size of one read from either pipe.
const READ_CHUNK: usize = 64 * 1024;

/// MCP over a child process's stdin/stdout.
///
/// The process is spawned lazily by [`Transport::start`] and respawned by
/// [`Transport::send_request`] if it has died. At most one process is alive
/// per transport.
pub struct StdioTransport {
    command_line: String,
    env: BTreeMap<String, String>,
    timeout: Duration,
    process: Option<ProcessHandle>,
    ids: RequestIdSequence,
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("command_line", &self.command_line)
            .field("process_id", &self.process_id())
            .field("last_request_id", &self.ids.current())
            .finish()
    }
}

impl StdioTransport {
    /// Validate `config` and build the transport. No process is spawned here.
    ///
    /// `command` is checked before `env`.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let command_line = config
            .command
            .as_deref()
            .map(build_command_line)
            .filter(|line| !line.trim().is_empty())
            .ok_or_else(|| {
                RelayError::ServerConfiguration(
                    "The \"command\" configuration is required for stdio transport".into(),
                )
            })?;

        let env = config.env.clone().ok_or_else(|| {
            RelayError::ServerConfiguration(
                "The \"env\" configuration is required for stdio transport".into(),
            )
        })?;

        Ok(Self {
            command_line,
            env,
            timeout: config.timeout(),
            process: None,
            ids: RequestIdSequence::new(),
        })
    }

    /// The shell command line the child is started with.
    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// OS process id of the current child, if one has been spawned.
    pub fn process_id(&self) -> Option<u32> {
        self.process.as_ref().and_then(|process| process.child.id())
    }

    /// The id used by the most recent request, `0` before the first one.
    pub fn last_request_id(&self) -> u64 {
        self.ids.current()
    }

    /// Whether a child process exists and has not exited.
    pub fn is_running(&mut self) -> bool {
        self.process
            .as_mut()
            .is_some_and(|process| process.exit_status().is_none())
    }

    fn is_usable(&mut self) -> bool {
        self.process
            .as_mut()
            .is_some_and(|process| process.stdin.is_some() && process.exit_status().is_none())
    }

    async fn spawn_process(&mut self) -> Result<()> {
        // Drop any dead or unwritable child first; kill_on_drop reaps it.
        self.process = None;

        let mut process = ProcessHandle::spawn(&self.command_line, &self.env)?;
        tokio::time::sleep(STARTUP_GRACE).await;

        if let Some(status) = process.exit_status() {
            let (stdout, stderr) = process.collect_remaining(CAPTURE_WAIT).await;
            drop(process);
            warn!(
                command = %self.command_line,
                exit_code = %exit_code(status),
                "stdio MCP server exited during startup"
            );
            return Err(RelayError::transport(format!(
                "Failed to start stdio process (exit code: {}). Error output: {}. Standard output: {}",
                exit_code(status),
                truncate_diagnostic(&String::from_utf8_lossy(&stderr)),
                truncate_diagnostic(&String::from_utf8_lossy(&stdout)),
            )));
        }

        // The ping primes the channel; it does not consume a request id.
        let ping = RequestEnvelope::ping(self.ids.next());
        self.ids.rollback();
        process.write_line(&ping.encode_line()?).await?;

        debug!(
            pid = ?process.child.id(),
            command = %self.command_line,
            "stdio MCP server started"
        );
        self.process = Some(process);
        Ok(())
    }

    async fn await_response(&mut self, id: &str) -> Result<Value> {
        let mut buffer = ResponseBuffer::new();
        let deadline = Instant::now() + self.timeout;

        loop {
            if let Some(result) = take_correlated(&mut buffer, id)? {
                return Ok(result);
            }

            let process = self.process.as_mut().ok_or_else(|| {
                RelayError::transport("Process terminated unexpectedly and is no longer available")
            })?;

            if let Some(status) = process.exit_status() {
                let (stdout, stderr) = process.collect_remaining(CAPTURE_WAIT).await;
                buffer.push(&stdout);
                // A reply written just before exiting still counts.
                let late = take_correlated(&mut buffer, id);
                self.process = None;
                if let Some(result) = late? {
                    return Ok(result);
                }

                warn!(id, exit_code = %exit_code(status), "stdio MCP server terminated");
                return Err(RelayError::transport(format!(
                    "MCP process terminated unexpectedly (exit code: {}). Error output: {}",
                    exit_code(status),
                    truncate_diagnostic(&String::from_utf8_lossy(&stderr)),
                )));
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(id, buffered = buffer.len(), "stdio MCP response timed out");
                return Err(RelayError::Timeout {
                    seconds: self.timeout.as_secs(),
                    preview: buffer.preview(),
                });
            }

            let chunk = process.read_output(POLL_INTERVAL.min(deadline - now)).await;
            if !chunk.is_empty() {
                tracing::trace!(id, bytes = chunk.len(), "stdio output received");
                buffer.push(&chunk);
            }
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    /// Spawn the child process unless one is already running and writable.
    async fn start(&mut self) -> Result<()> {
        if self.is_usable() {
            return Ok(());
        }
        self.spawn_process().await
    }

    async fn send_request(&mut self, method: &str, params: Value) -> Result<Value> {
        self.start().await?;

        let params = jsonrpc::normalize_params(params)?;
        let id = self.ids.next();
        let line = RequestEnvelope::request(id.clone(), method, params).encode_line()?;

        let process = self
            .process
            .as_mut()
            .ok_or_else(|| RelayError::transport("Failed to start or access the process"))?;

        let stale = process.drain_stale().await;
        if !stale.is_empty() {
            debug!(bytes = stale.len(), "discarding stale stdio output");
        }
        process.stderr_buf.clear();

        debug!(pid = ?process.child.id(), method, id = %id, "sending MCP request");
        process.write_line(&line).await?;

        self.await_response(&id).await
    }

    /// Close stdin, give the child [`CLOSE_WAIT`] to exit, then kill it.
    async fn close(&mut self) -> Result<()> {
        let Some(mut process) = self.process.take() else {
            return Ok(());
        };

        drop(process.stdin.take());

        match tokio::time::timeout(CLOSE_WAIT, process.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(exit_code = %exit_code(ProcessExit::Exited(status)), "stdio MCP server exited");
                Ok(())
            }
            Ok(Err(e)) => Err(RelayError::transport_with_source(
                format!("Failed to close stdio transport: {e}"),
                e,
            )),
            Err(_) => {
                debug!(pid = ?process.child.id(), "stdio MCP server did not exit, killing");
                process.child.kill().await.map_err(|e| {
                    RelayError::transport_with_source(
                        format!("Failed to close stdio transport: {e}"),
                        e,
                    )
                })
            }
        }
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        let Some(process) = self.process.as_mut() else {
            return;
        };
        if process.exit_status().is_some() {
            return;
        }
        if let Err(e) = process.child.start_kill() {
            warn!(error = %e, pid = ?process.child.id(), "failed to kill stdio MCP server on drop");
        }
    }
}

/// Check the buffer for the response to `id`, tools-list shortcut first.
fn take_correlated(buffer: &mut ResponseBuffer, id: &str) -> Result<Option<Value>> {
    if let Some(result) = buffer.take_tools_list(id)? {
        return Ok(Some(result));
    }
    buffer.take_response(id)
}

/// A spawned child and its pipes.
struct ProcessHandle {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: ChildStdout,
    stderr: ChildStderr,
    stdout_open: bool,
    stderr_open: bool,
    stderr_buf: Vec<u8>,
    stdout_chunk: Vec<u8>,
    stderr_chunk: Vec<u8>,
}

impl ProcessHandle {
    fn spawn(command_line: &str, env: &BTreeMap<String, String>) -> Result<Self> {
        let mut command = shell_command(command_line);
        command
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            RelayError::transport_with_source(format!("Failed to start stdio process: {e}"), e)
        })?;

        let missing = || RelayError::transport("Failed to start stdio process: pipes unavailable");
        let stdin = child.stdin.take().ok_or_else(missing)?;
        let stdout = child.stdout.take().ok_or_else(missing)?;
        let stderr = child.stderr.take().ok_or_else(missing)?;

        Ok(Self {
            child,
            stdin: Some(stdin),
            stdout,
            stderr,
            stdout_open: true,
            stderr_open: true,
            stderr_buf: Vec::new(),
            stdout_chunk: vec![0; READ_CHUNK],
            stderr_chunk: vec![0; READ_CHUNK],
        })
    }

    /// How the child ended, if it has. Errors while checking count as exited
    /// with an unknown status.
    fn exit_status(&mut self) -> Option<ProcessExit> {
        match self.child.try_wait() {
            Ok(status) => status.map(ProcessExit::Exited),
            Err(e) => {
                warn!(error = %e, "failed to query stdio MCP server status");
                Some(ProcessExit::Unknown)
            }
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| RelayError::transport("Input stream not initialized"))?;

        let written = match stdin.write_all(line.as_bytes()).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };

        written.map_err(|e| {
            self.stdin = None;
            RelayError::transport_with_source(
                format!("Failed to write to stdio process: {e}"),
                e,
            )
        })
    }

    /// Wait up to `wait` for stdout data, collecting stderr meanwhile.
    ///
    /// Returns as soon as one stdout chunk arrives. An empty result means the
    /// wait elapsed or a pipe just closed.
    async fn read_output(&mut self, wait: Duration) -> Vec<u8> {
        let sleep = tokio::time::sleep(wait);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                read = self.stdout.read(&mut self.stdout_chunk), if self.stdout_open => match read {
                    Ok(0) | Err(_) => {
                        self.stdout_open = false;
                        return Vec::new();
                    }
                    Ok(n) => return self.stdout_chunk[..n].to_vec(),
                },
                read = self.stderr.read(&mut self.stderr_chunk), if self.stderr_open => match read {
                    Ok(0) | Err(_) => {
                        self.stderr_open = false;
                        return Vec::new();
                    }
                    Ok(n) => {
                        self.stderr_buf.extend_from_slice(&self.stderr_chunk[..n]);
                        if self.stderr_buf.len() > STDERR_CAP {
                            let excess = self.stderr_buf.len() - STDERR_CAP;
                            self.stderr_buf.drain(..excess);
                        }
                    }
                },
                () = &mut sleep => return Vec::new(),
            }
        }
    }

    /// Collect output that arrives within [`STALE_DRAIN_WINDOW`].
    async fn drain_stale(&mut self) -> Vec<u8> {
        self.read_until(Instant::now() + STALE_DRAIN_WINDOW).await
    }

    /// Read both pipes until they close or `wait` elapses.
    ///
    /// Returns `(stdout, stderr)`; stderr includes what was retained earlier.
    async fn collect_remaining(&mut self, wait: Duration) -> (Vec<u8>, Vec<u8>) {
        let stdout = self.read_until(Instant::now() + wait).await;
        (stdout, std::mem::take(&mut self.stderr_buf))
    }

    async fn read_until(&mut self, deadline: Instant) -> Vec<u8> {
        let mut collected = Vec::new();
        loop {
            let now = Instant::now();
            if now >= deadline || (!self.stdout_open && !self.stderr_open) {
                return collected;
            }
            let chunk = self.read_output(deadline - now).await;
            collected.extend_from_slice(&chunk);
        }
    }
}

/// Render the argument vector as one shell command line.
///
/// Strings are used verbatim, arrays and objects are JSON-encoded, numbers
/// and booleans are displayed, and nulls are dropped.
pub fn build_command_line(command: &[Value]) -> String {
    command
        .iter()
        .filter_map(|part| match part {
            Value::Null => None,
            Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(windows)]
fn shell_command(command_line: &str) -> Command {
    let mut command = Command::new("cmd");
    command.arg("/C").arg(command_line);
    command
}

#[cfg(not(windows))]
fn shell_command(command_line: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(command_line);
    command
}

/// How a child process ended, as reported in diagnostics.
#[derive(Debug, Clone, Copy)]
enum ProcessExit {
    Exited(ExitStatus),
    /// The status could not be queried.
    Unknown,
}

/// The exit code, or `unknown` when there is none (killed by a signal, or
/// the status could not be read).
fn exit_code(exit: ProcessExit) -> String {
    match exit {
        ProcessExit::Exited(status) => status
            .code()
            .map_or_else(|| "unknown".to_string(), |code| code.to_string()),
        ProcessExit::Unknown => "unknown".to_string(),
    }
}

fn truncate_diagnostic(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() <= DIAGNOSTIC_CHARS {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(DIAGNOSTIC_CHARS).collect();
    truncated.push_str("...(truncated)");
    truncated
}
