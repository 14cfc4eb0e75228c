// src/mcp/registry.rs
// MCP server registry: manifest loading, lazy client spawning, and remote
// tool discovery

use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::client::McpClient;
use super::manifest::{McpServerConfig, load_manifests};
use crate::config::McpConfig;
use crate::error::{GatehouseError, Result};

/// A tool advertised by a remote MCP server.
#[derive(Debug, Clone)]
pub struct RemoteTool {
    pub server_id: String,
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    /// JSON-RPC method the proxy forwards to (defaults to tools/call)
    pub method: String,
}

impl RemoteTool {
    /// The name this tool is registered under locally.
    pub fn local_name(&self) -> String {
        format!(
            "mcp_{}_{}",
            sanitize_identifier(&self.server_id),
            sanitize_identifier(&self.name)
        )
    }
}

/// Owns the manifest set and at most one live client per server id.
pub struct McpRegistry {
    config: McpConfig,
    servers: RwLock<HashMap<String, McpServerConfig>>,
    clients: RwLock<HashMap<String, Arc<McpClient>>>,
}

impl McpRegistry {
    pub fn new(config: McpConfig) -> Self {
        Self {
            config,
            servers: RwLock::new(HashMap::new()),
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// (Re)load manifests from disk. Existing clients keep running; a
    /// removed server's client is closed.
    pub async fn refresh(&self) -> usize {
        let loaded = load_manifests(&self.config);
        let mut servers = self.servers.write().await;
        servers.clear();
        for server in loaded {
            servers.insert(server.id.clone(), server);
        }
        let count = servers.len();
        drop(servers);

        // Close clients whose server disappeared from the manifests
        let servers = self.servers.read().await;
        let mut clients = self.clients.write().await;
        let stale: Vec<String> = clients
            .keys()
            .filter(|id| !servers.contains_key(*id))
            .cloned()
            .collect();
        for id in stale {
            if let Some(client) = clients.remove(&id) {
                client.close().await;
            }
        }
        count
    }

    /// Known server configurations.
    pub async fn list_servers(&self) -> Vec<McpServerConfig> {
        let servers = self.servers.read().await;
        let mut list: Vec<McpServerConfig> = servers.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// Get the live client for a server, spawning it on first use.
    /// A client that died is replaced with a fresh spawn.
    pub async fn client(&self, server_id: &str) -> Result<Arc<McpClient>> {
        {
            let clients = self.clients.read().await;
            if let Some(client) = clients.get(server_id) {
                if !client.is_closed() {
                    return Ok(client.clone());
                }
            }
        }

        let server = {
            let servers = self.servers.read().await;
            servers.get(server_id).cloned().ok_or_else(|| {
                GatehouseError::Mcp(format!("MCP server '{server_id}' is not configured"))
            })?
        };

        let mut clients = self.clients.write().await;
        // Re-check under the write lock (another caller may have spawned)
        if let Some(client) = clients.get(server_id) {
            if !client.is_closed() {
                return Ok(client.clone());
            }
            clients.remove(server_id);
        }

        let client = Arc::new(McpClient::new(server));
        client.start().await?;
        clients.insert(server_id.to_string(), client.clone());
        Ok(client)
    }

    /// Issue a raw JSON-RPC request against a server.
    pub async fn call(
        &self,
        server_id: &str,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value> {
        let client = self.client(server_id).await?;
        client.request(method, params).await
    }

    /// Invoke a remote tool via the standard tools/call method.
    pub async fn call_tool(&self, server_id: &str, tool: &str, arguments: Value) -> Result<Value> {
        self.call(
            server_id,
            "tools/call",
            Some(json!({"name": tool, "arguments": arguments})),
        )
        .await
    }

    /// Discover the remote tools of every configured server.
    /// Servers that fail to spawn or answer are skipped with a warning.
    pub async fn discover_remote_tools(&self) -> Vec<RemoteTool> {
        let servers = self.list_servers().await;
        let mut tools = Vec::new();

        for server in servers {
            let listed = match self.call(&server.id, "tools/list", None).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(server = %server.id, error = %e, "Skipping MCP server during tool discovery");
                    continue;
                }
            };
            let entries = listed
                .get("tools")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let method = server
                .metadata
                .get("method")
                .and_then(Value::as_str)
                .unwrap_or("tools/call")
                .to_string();

            for entry in entries {
                let name = match entry.get("name").and_then(Value::as_str) {
                    Some(name) if !name.is_empty() => name.to_string(),
                    _ => continue,
                };
                tools.push(RemoteTool {
                    server_id: server.id.clone(),
                    description: entry
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    input_schema: entry
                        .get("inputSchema")
                        .cloned()
                        .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
                    method: method.clone(),
                    name,
                });
            }
        }

        if !tools.is_empty() {
            info!(count = tools.len(), "Discovered remote MCP tools");
        }
        tools
    }

    /// Close every live client (used by the shutdown signal handler).
    pub async fn shutdown_all(&self) {
        let mut clients = self.clients.write().await;
        for (id, client) in clients.drain() {
            info!(server = %id, "Shutting down MCP client");
            client.close().await;
        }
    }

    pub async fn has_servers(&self) -> bool {
        !self.servers.read().await.is_empty()
    }
}

/// Replace non-alphanumeric runs with a single underscore and trim.
pub fn sanitize_identifier(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_sep = false;
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep && !out.is_empty() {
            out.push('_');
            last_was_sep = true;
        }
    }
    out.trim_end_matches('_').to_string()
}
