//! Wire transports for MCP: newline-delimited JSON over a subprocess's stdio,
//! or an SSE event stream paired with HTTP POSTs.
//!
//! Both transports feed responses into a shared pending map keyed by
//! request id; the client owns id allocation and waits on the oneshot.

use crate::protocol::JsonRpcResponse;
use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use stagehand_core::{StagehandError, StagehandResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Requests awaiting a response, keyed by JSON-RPC id.
pub type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// A bidirectional JSON-RPC channel to one tool server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one serialized message to the server.
    async fn send(&self, message: &serde_json::Value) -> StagehandResult<()>;

    /// Whether the inbound side is still open.
    fn is_alive(&self) -> bool;

    /// Stop background readers and release the connection.
    async fn close(&self);
}

/// Hand a raw inbound message to whoever is waiting on its id.
///
/// Returns `false` for notifications, unknown ids and non-JSON-RPC text.
pub fn route_response(pending: &PendingMap, raw: &str) -> bool {
    let raw = raw.trim();
    if raw.is_empty() {
        return false;
    }
    match serde_json::from_str::<JsonRpcResponse>(raw) {
        Ok(resp) => {
            let Some(id) = resp.id else {
                return false;
            };
            let waiter = pending.lock().remove(&id);
            match waiter {
                Some(tx) => tx.send(resp).is_ok(),
                None => {
                    debug!(id, "Response for unknown request id");
                    false
                }
            }
        }
        Err(e) => {
            debug!(line = %raw, error = %e, "Non-JSON-RPC message from tool server");
            false
        }
    }
}

// ---------------------------------------------------------------------------
// stdio
// ---------------------------------------------------------------------------

/// Tool server running as a child process speaking JSON lines on stdio.
pub struct StdioTransport {
    stdin: tokio::sync::Mutex<ChildStdin>,
    child: tokio::sync::Mutex<Child>,
    alive: Arc<AtomicBool>,
}

impl StdioTransport {
    /// Spawn the server and start the stdout reader.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        pending: PendingMap,
    ) -> StagehandResult<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            StagehandError::ToolInvocation(format!("Failed to spawn tool server '{command}': {e}"))
        })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            StagehandError::ToolInvocation("Tool server stdin not available".into())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            StagehandError::ToolInvocation("Tool server stdout not available".into())
        })?;

        let alive = Arc::new(AtomicBool::new(true));
        let alive_reader = alive.clone();
        let server = command.to_string();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        debug!(server = %server, "Tool server stdout closed");
                        break;
                    }
                    Ok(_) => {
                        route_response(&pending, &line);
                    }
                    Err(e) => {
                        error!(server = %server, error = %e, "Error reading tool server stdout");
                        break;
                    }
                }
            }
            alive_reader.store(false, Ordering::SeqCst);
            // Wake every waiter; their senders drop with the map entries.
            pending.lock().clear();
        });

        Ok(Self {
            stdin: tokio::sync::Mutex::new(stdin),
            child: tokio::sync::Mutex::new(child),
            alive,
        })
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, message: &serde_json::Value) -> StagehandResult<()> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await.map_err(|e| {
            StagehandError::ToolInvocation(format!("Failed to write to tool server stdin: {e}"))
        })?;
        stdin.flush().await.map_err(|e| {
            StagehandError::ToolInvocation(format!("Failed to flush tool server stdin: {e}"))
        })?;
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        let mut child = self.child.lock().await;
        if let Err(e) = child.start_kill() {
            debug!(error = %e, "Tool server already exited");
        }
        let _ = child.wait().await;
        self.alive.store(false, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// SSE
// ---------------------------------------------------------------------------

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name, `message` when the stream omits it.
    pub event: String,
    /// Data lines joined with newlines.
    pub data: String,
}

/// Incremental `text/event-stream` parser.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    /// Parser with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event completed by it.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(SseEvent {
                        event: self.event.take().unwrap_or_else(|| "message".to_string()),
                        data: self.data.join("\n"),
                    });
                    self.data.clear();
                } else {
                    self.event = None;
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }

        events
    }
}

/// Tool server reached through an SSE stream plus POSTed requests.
///
/// Responses are correlated whether they arrive as `message` events on the
/// stream or directly in the POST response body.
pub struct SseTransport {
    http: reqwest::Client,
    endpoint: reqwest::Url,
    pending: PendingMap,
    alive: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl SseTransport {
    /// Open the stream and wait for the server to announce its POST endpoint.
    pub async fn connect(
        url: &str,
        pending: PendingMap,
        handshake_timeout: Duration,
    ) -> StagehandResult<Self> {
        let base = reqwest::Url::parse(url)
            .map_err(|e| StagehandError::Config(format!("Invalid tool server url '{url}': {e}")))?;
        let http = reqwest::Client::new();

        let resp = http
            .get(base.clone())
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| StagehandError::Http(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(StagehandError::ToolInvocation(format!(
                "SSE stream '{url}' returned {}",
                resp.status()
            )));
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();
        let alive = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();

        let reader_pending = pending.clone();
        let reader_alive = alive.clone();
        let reader_cancel = cancel.clone();
        let server = url.to_string();
        let mut stream = resp.bytes_stream();
        tokio::spawn(async move {
            let mut parser = SseParser::new();
            let mut endpoint_tx = Some(endpoint_tx);
            loop {
                let chunk = tokio::select! {
                    _ = reader_cancel.cancelled() => break,
                    chunk = stream.next() => chunk,
                };
                let bytes = match chunk {
                    Some(Ok(bytes)) => bytes,
                    Some(Err(e)) => {
                        warn!(server = %server, error = %e, "SSE stream read error");
                        break;
                    }
                    None => {
                        debug!(server = %server, "SSE stream closed");
                        break;
                    }
                };
                for event in parser.feed(&String::from_utf8_lossy(&bytes)) {
                    match event.event.as_str() {
                        "endpoint" => {
                            if let Some(tx) = endpoint_tx.take() {
                                let _ = tx.send(event.data);
                            }
                        }
                        "message" => {
                            route_response(&reader_pending, &event.data);
                        }
                        other => debug!(server = %server, event = other, "Ignoring SSE event"),
                    }
                }
            }
            reader_alive.store(false, Ordering::SeqCst);
        });

        let announced = tokio::time::timeout(handshake_timeout, endpoint_rx)
            .await
            .map_err(|_| StagehandError::timeout(format!("SSE endpoint from {url}"), handshake_timeout))?
            .map_err(|_| {
                StagehandError::ToolInvocation(format!("SSE stream {url} closed before endpoint"))
            })?;
        let endpoint = base.join(announced.trim()).map_err(|e| {
            StagehandError::ToolInvocation(format!("Invalid SSE endpoint '{announced}': {e}"))
        })?;
        debug!(server = %url, endpoint = %endpoint, "SSE endpoint announced");

        Ok(Self {
            http,
            endpoint,
            pending,
            alive,
            cancel,
        })
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn send(&self, message: &serde_json::Value) -> StagehandResult<()> {
        let resp = self
            .http
            .post(self.endpoint.clone())
            .json(message)
            .send()
            .await
            .map_err(|e| StagehandError::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(StagehandError::ToolInvocation(format!(
                "Tool server rejected message with {status}"
            )));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| StagehandError::Http(e.to_string()))?;
        route_response(&self.pending, &body);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.cancel.cancel();
        self.alive.store(false, Ordering::SeqCst);
    }
}
