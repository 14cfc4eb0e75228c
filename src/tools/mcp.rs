// src/tools/mcp.rs
// MCP-facing tools plus dynamic registration of remote tool proxies

use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

use super::context::ToolContext;
use super::registry::{ToolRegistry, handler};
use crate::llm::ToolCall;
use crate::mcp::McpRegistry;

/// List configured MCP servers and their live state.
pub async fn mcp_servers(_call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    let servers = ctx.mcp().list_servers().await;
    let entries: Vec<Value> = servers
        .iter()
        .map(|s| {
            json!({
                "id": s.id,
                "name": s.name,
                "description": s.description,
                "command": s.command,
                "args": s.args,
            })
        })
        .collect();
    serde_json::to_string(&entries).map_err(|e| e.to_string())
}

/// Invoke an arbitrary method (or tool) on a configured MCP server.
pub async fn mcp_call(call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    let server = call
        .str_arg(&["server", "server_id", "id"])
        .ok_or_else(|| "missing required argument: server".to_string())?;
    let params = call
        .arguments
        .get("params")
        .or_else(|| call.arguments.get("arguments"))
        .cloned();

    let result = if let Some(tool) = call.str_arg(&["tool", "tool_name"]) {
        ctx.mcp()
            .call_tool(&server, &tool, params.unwrap_or_else(|| json!({})))
            .await
    } else if let Some(method) = call.str_arg(&["method"]) {
        ctx.mcp().call(&server, &method, params).await
    } else {
        return Err("missing required argument: tool or method".to_string());
    };

    result
        .map(|v| v.to_string())
        .map_err(|e| e.to_string())
}

/// List (or release) sandbox sessions.
pub async fn sandbox_sessions(call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    if let Some(release) = call.str_arg(&["release", "release_id"]) {
        let released = ctx.sandbox().release_session(&release);
        return Ok(json!({"released": release, "found": released}).to_string());
    }
    let sessions = ctx.sandbox().list_sessions();
    serde_json::to_string(&sessions).map_err(|e| e.to_string())
}

/// Discover every remote MCP tool and register a local proxy for each as
/// `mcp_<server>_<tool>`. Returns the registered names.
pub async fn register_remote_tools(
    registry: &ToolRegistry,
    mcp: &Arc<McpRegistry>,
) -> Vec<String> {
    let remote_tools = mcp.discover_remote_tools().await;
    let mut registered = Vec::with_capacity(remote_tools.len());

    for remote in remote_tools {
        let local_name = remote.local_name();
        let description = if remote.description.is_empty() {
            format!("remote tool '{}' on MCP server '{}'", remote.name, remote.server_id)
        } else {
            remote.description.clone()
        };

        let server_id = remote.server_id.clone();
        let tool_name = remote.name.clone();
        let method = remote.method.clone();
        registry.register(
            &local_name,
            "mcp",
            &description,
            handler(move |call: ToolCall, ctx: ToolContext| {
                let server_id = server_id.clone();
                let tool_name = tool_name.clone();
                let method = method.clone();
                async move {
                    let arguments = Value::Object(call.arguments.clone());
                    let result = if method == "tools/call" {
                        ctx.mcp().call_tool(&server_id, &tool_name, arguments).await
                    } else {
                        // Non-standard method declared in the manifest:
                        // forward the argument mapping as params directly
                        ctx.mcp().call(&server_id, &method, Some(arguments)).await
                    };
                    result.map(render_remote_result).map_err(|e| e.to_string())
                }
            }),
        );
        registered.push(local_name);
    }

    if !registered.is_empty() {
        info!(count = registered.len(), "Registered remote MCP tool proxies");
    }
    registered
}

/// Flatten a tools/call reply into text where possible, else raw JSON.
fn render_remote_result(result: Value) -> String {
    if let Some(content) = result.get("content").and_then(Value::as_array) {
        let texts: Vec<&str> = content
            .iter()
            .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect();
        if !texts.is_empty() {
            return texts.join("\n");
        }
    }
    result.to_string()
}
