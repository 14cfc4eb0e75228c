// src/mcp/client.rs
// JSON-RPC 2.0 client over a child process's stdio
//
// Framing is one JSON object per line on stdout. A background reader task
// correlates responses to pending requests by id and emits id-less messages
// as notifications. Child exit (or close()) rejects every pending request
// and fails all further requests synchronously.

use serde_json::{Value, json};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, broadcast, oneshot};
use tracing::{debug, info, warn};

use super::manifest::McpServerConfig;
use crate::error::{GatehouseError, Result};

/// Default time to wait for a single JSON-RPC response.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Identity sent in the `initialize` handshake.
const CLIENT_NAME: &str = "gatehouse";
const PROTOCOL_VERSION: &str = "2024-11-05";

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

/// A running MCP server child process plus its JSON-RPC plumbing.
pub struct McpClient {
    server: McpServerConfig,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    pending: PendingMap,
    next_id: AtomicU64,
    started: AtomicBool,
    closed: Arc<AtomicBool>,
    notifications: broadcast::Sender<Value>,
}

impl McpClient {
    pub fn new(server: McpServerConfig) -> Self {
        let (notifications, _) = broadcast::channel(64);
        Self {
            server,
            child: Mutex::new(None),
            stdin: Mutex::new(None),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            started: AtomicBool::new(false),
            closed: Arc::new(AtomicBool::new(false)),
            notifications,
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Subscribe to server-initiated notifications.
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Value> {
        self.notifications.subscribe()
    }

    /// Spawn the child process and run the `initialize` handshake.
    /// Handshake failures are logged but leave the client usable; the first
    /// real request surfaces any persistent fault.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!(
            server = %self.server.id,
            command = %self.server.command,
            args = ?self.server.args,
            "Spawning MCP server child process"
        );

        let mut command = Command::new(&self.server.command);
        command
            .args(&self.server.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        for (key, value) in &self.server.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|e| {
            self.closed.store(true, Ordering::SeqCst);
            GatehouseError::Mcp(format!(
                "failed to spawn MCP server '{}': {e}",
                self.server.id
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| GatehouseError::Mcp("MCP child has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GatehouseError::Mcp("MCP child has no stdout".into()))?;

        *self.stdin.lock().await = Some(stdin);
        *self.child.lock().await = Some(child);

        // Reader task: owns stdout for the life of the child
        let pending = self.pending.clone();
        let closed = self.closed.clone();
        let notifications = self.notifications.clone();
        let server_id = self.server.id.clone();
        tokio::spawn(async move {
            read_loop(stdout, pending, closed, notifications, server_id).await;
        });

        // Handshake: initialize, then the initialized notification
        let init_params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": CLIENT_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
        });
        match self.request("initialize", Some(init_params)).await {
            Ok(result) => {
                debug!(
                    server = %self.server.id,
                    server_info = ?result.get("serverInfo"),
                    "MCP server initialized"
                );
            }
            Err(e) => {
                warn!(server = %self.server.id, error = %e, "MCP initialize failed (continuing)");
            }
        }
        if let Err(e) = self
            .send_notification("notifications/initialized", None)
            .await
        {
            warn!(server = %self.server.id, error = %e, "Failed to send initialized notification");
        }

        Ok(())
    }

    /// Issue a JSON-RPC request and await its response.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        if self.is_closed() {
            return Err(GatehouseError::Mcp(format!(
                "MCP client '{}' is closed",
                self.server.id
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let mut message = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
        });
        if let Some(params) = params {
            message["params"] = params;
        }

        if let Err(e) = self.write_line(&message).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(GatehouseError::Mcp(format!(
                "MCP client '{}' closed while awaiting '{method}'",
                self.server.id
            ))),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(GatehouseError::Mcp(format!(
                    "MCP request '{method}' to '{}' timed out",
                    self.server.id
                )))
            }
        }
    }

    /// Fire a JSON-RPC notification (no id, no response).
    pub async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<()> {
        let mut message = json!({"jsonrpc": "2.0", "method": method});
        if let Some(params) = params {
            message["params"] = params;
        }
        self.write_line(&message).await
    }

    async fn write_line(&self, message: &Value) -> Result<()> {
        let mut line = message.to_string();
        line.push('\n');
        let mut stdin_guard = self.stdin.lock().await;
        let stdin = stdin_guard
            .as_mut()
            .ok_or_else(|| GatehouseError::Mcp("MCP client not started".into()))?;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| GatehouseError::Mcp(format!("MCP write failed: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| GatehouseError::Mcp(format!("MCP flush failed: {e}")))?;
        Ok(())
    }

    /// Tear the client down: kill the child and reject all pending requests.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(server = %self.server.id, "Closing MCP client");

        drop(self.stdin.lock().await.take());
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
        }
        reject_all_pending(&self.pending, &self.server.id).await;
    }
}

/// Reject every pending request with a closed-client error.
async fn reject_all_pending(pending: &PendingMap, server_id: &str) {
    let mut pending = pending.lock().await;
    for (_, tx) in pending.drain() {
        let _ = tx.send(Err(GatehouseError::Mcp(format!(
            "MCP client '{server_id}' closed"
        ))));
    }
}

/// Background loop over the child's stdout: one JSON object per line.
async fn read_loop(
    stdout: tokio::process::ChildStdout,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
    notifications: broadcast::Sender<Value>,
    server_id: String,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let message: Value = match serde_json::from_str(trimmed) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(server = %server_id, error = %e, "Skipping unparseable MCP line");
                        continue;
                    }
                };
                dispatch_message(message, &pending, &notifications, &server_id).await;
            }
            Ok(None) => break, // EOF: child exited or closed stdout
            Err(e) => {
                warn!(server = %server_id, error = %e, "MCP stdout read error");
                break;
            }
        }
    }

    debug!(server = %server_id, "MCP stdout closed");
    closed.store(true, Ordering::SeqCst);
    reject_all_pending(&pending, &server_id).await;
}

async fn dispatch_message(
    message: Value,
    pending: &PendingMap,
    notifications: &broadcast::Sender<Value>,
    server_id: &str,
) {
    match message.get("id").and_then(Value::as_u64) {
        Some(id) => {
            let resolver = pending.lock().await.remove(&id);
            match resolver {
                Some(tx) => {
                    let outcome = if let Some(error) = message.get("error") {
                        Err(GatehouseError::Mcp(format_rpc_error(error)))
                    } else {
                        Ok(message.get("result").cloned().unwrap_or(Value::Null))
                    };
                    let _ = tx.send(outcome);
                }
                None => {
                    debug!(server = %server_id, id, "Dropping response with unknown id");
                }
            }
        }
        None => {
            // No id: server-initiated notification
            debug!(
                server = %server_id,
                method = message.get("method").and_then(|v| v.as_str()).unwrap_or("?"),
                "MCP notification"
            );
            let _ = notifications.send(message);
        }
    }
}

/// Normalize a JSON-RPC error object into a message string.
fn format_rpc_error(error: &Value) -> String {
    let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    match error.get("data") {
        Some(data) if !data.is_null() => format!("RPC error {code}: {message} ({data})"),
        _ => format!("RPC error {code}: {message}"),
    }
}
