// src/tools/registry.rs
// Tool registry: named handlers, alias resolution, normalized execution
//
// Resolution order is exact name, then the lowercase shadow map, then the
// alias table. Execution never throws: unknown tools yield a 404 result,
// handler failures (and panics) a 500 result, so the agent loop always has
// a tool turn to append.

use serde_json::{Value, json};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, warn};

use super::context::ToolContext;
use crate::llm::ToolCall;
use crate::policy::PolicyDecision;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<String, String>> + Send>>;
pub type ToolHandler = Arc<dyn Fn(ToolCall, ToolContext) -> HandlerFuture + Send + Sync>;

/// Wrap an async fn into a boxed handler.
pub fn handler<F, Fut>(f: F) -> ToolHandler
where
    F: Fn(ToolCall, ToolContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, String>> + Send + 'static,
{
    Arc::new(move |call, ctx| Box::pin(f(call, ctx)) as HandlerFuture)
}

/// A registered tool.
#[derive(Clone)]
pub struct RegisteredTool {
    pub name: String,
    pub category: String,
    pub description: String,
    handler: ToolHandler,
}

/// Normalized outcome of executing (or denying) one tool call.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub ok: bool,
    pub status: u16,
    pub content: String,
    pub metadata: Value,
    pub error: Option<Value>,
}

impl ToolResult {
    pub fn success(content: String, metadata: Value) -> Self {
        Self {
            ok: true,
            status: 200,
            content,
            metadata,
            error: None,
        }
    }

    /// Build the tool result for a policy denial.
    pub fn denied(decision: &PolicyDecision, tool: &str) -> Self {
        let code = decision.code.clone().unwrap_or_else(|| "denied".to_string());
        let reason = decision
            .reason
            .clone()
            .unwrap_or_else(|| "denied by policy".to_string());
        Self {
            ok: false,
            status: decision.status,
            content: json!({"error": code, "reason": reason, "tool": tool}).to_string(),
            metadata: json!({"tool": tool, "denied": true}),
            error: Some(json!({"code": code, "message": reason})),
        }
    }
}

/// Case-folded synonyms clients commonly send for the built-in tools.
fn default_aliases() -> HashMap<String, String> {
    let pairs = [
        ("bash", "shell"),
        ("sh", "shell"),
        ("exec", "shell"),
        ("run_command", "shell"),
        ("terminal", "shell"),
        ("python", "python_exec"),
        ("py", "python_exec"),
        ("run_python", "python_exec"),
        ("grep", "workspace_search"),
        ("search", "workspace_search"),
        ("rg", "workspace_search"),
        ("read", "fs_read"),
        ("cat", "fs_read"),
        ("read_file", "fs_read"),
        ("file_read", "fs_read"),
        ("write", "fs_write"),
        ("write_file", "fs_write"),
        ("file_write", "fs_write"),
        ("patch", "edit_patch"),
        ("apply_patch", "edit_patch"),
        ("edit", "edit_patch"),
        ("ls", "workspace_list"),
        ("list_files", "workspace_list"),
        ("find_symbol", "workspace_symbol_search"),
        ("goto_definition", "workspace_goto_definition"),
        ("fetch", "web_fetch"),
        ("http_get", "web_fetch"),
        ("browse", "web_fetch"),
        ("git_status", "workspace_git_status"),
        ("git_diff", "workspace_diff"),
        ("git_commit", "workspace_git_commit"),
        ("run_tests", "workspace_test_run"),
        ("test", "workspace_test_run"),
    ];
    pairs
        .into_iter()
        .map(|(a, c)| (a.to_string(), c.to_string()))
        .collect()
}

/// Process-wide tool registry.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<RegisteredTool>>>,
    /// Lowercase shadow map: lowercased name -> canonical name
    lowercase: RwLock<HashMap<String, String>>,
    aliases: HashMap<String, String>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            lowercase: RwLock::new(HashMap::new()),
            aliases: default_aliases(),
        }
    }

    /// Register (or replace) a tool under its canonical name.
    pub fn register(
        &self,
        name: &str,
        category: &str,
        description: &str,
        tool_handler: ToolHandler,
    ) {
        let tool = Arc::new(RegisteredTool {
            name: name.to_string(),
            category: category.to_string(),
            description: description.to_string(),
            handler: tool_handler,
        });
        if let Ok(mut tools) = self.tools.write() {
            tools.insert(name.to_string(), tool);
        }
        if let Ok(mut lowercase) = self.lowercase.write() {
            lowercase.insert(name.to_lowercase(), name.to_string());
        }
    }

    /// Remove a tool (used when remote MCP tools vanish on refresh).
    pub fn unregister(&self, name: &str) {
        if let Ok(mut tools) = self.tools.write() {
            tools.remove(name);
        }
        if let Ok(mut lowercase) = self.lowercase.write() {
            lowercase.remove(&name.to_lowercase());
        }
    }

    /// Resolve a client-supplied name to a canonical registered name:
    /// exact -> lowercase shadow -> alias table.
    pub fn resolve(&self, name: &str) -> Option<String> {
        if let Ok(tools) = self.tools.read() {
            if tools.contains_key(name) {
                return Some(name.to_string());
            }
        }
        let lowered = name.to_lowercase();
        if let Ok(lowercase) = self.lowercase.read() {
            if let Some(canonical) = lowercase.get(&lowered) {
                return Some(canonical.clone());
            }
        }
        if let Some(target) = self.aliases.get(&lowered) {
            if let Ok(tools) = self.tools.read() {
                if tools.contains_key(target) {
                    return Some(target.clone());
                }
            }
        }
        None
    }

    pub fn get(&self, canonical: &str) -> Option<Arc<RegisteredTool>> {
        self.tools.read().ok()?.get(canonical).cloned()
    }

    /// All registered tools, sorted by name.
    pub fn list(&self) -> Vec<Arc<RegisteredTool>> {
        let mut tools: Vec<Arc<RegisteredTool>> = match self.tools.read() {
            Ok(tools) => tools.values().cloned().collect(),
            Err(_) => Vec::new(),
        };
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Execute a tool call. Never fails: missing tools return a 404 result,
    /// handler errors and panics a 500 result.
    pub async fn execute_tool_call(&self, call: &ToolCall, ctx: &ToolContext) -> ToolResult {
        let canonical = match self.resolve(&call.name) {
            Some(canonical) => canonical,
            None => {
                warn!(tool = %call.name, "Tool not registered");
                return ToolResult {
                    ok: false,
                    status: 404,
                    content: json!({
                        "error": "tool_not_found",
                        "tool": call.name,
                    })
                    .to_string(),
                    metadata: json!({"tool": call.name}),
                    error: Some(json!({"code": "tool_not_found"})),
                };
            }
        };

        let tool = match self.get(&canonical) {
            Some(tool) => tool,
            None => {
                return ToolResult {
                    ok: false,
                    status: 404,
                    content: json!({"error": "tool_not_found", "tool": canonical}).to_string(),
                    metadata: json!({"tool": canonical}),
                    error: Some(json!({"code": "tool_not_found"})),
                };
            }
        };

        debug!(tool = %canonical, call_id = %call.id, "Executing tool");
        let started = Instant::now();

        // Run on a separate task so a panicking handler degrades to a tool
        // result instead of tearing down the request.
        let tool_handler = tool.handler.clone();
        let call_clone = call.clone();
        let ctx_clone = ctx.clone();
        let joined =
            tokio::spawn(async move { tool_handler(call_clone, ctx_clone).await }).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        let metadata = json!({"tool": canonical, "duration_ms": duration_ms});

        match joined {
            Ok(Ok(content)) => ToolResult::success(content, metadata),
            Ok(Err(message)) => {
                warn!(tool = %canonical, error = %message, "Tool execution failed");
                ToolResult {
                    ok: false,
                    status: 500,
                    content: json!({
                        "error": "tool_execution_failed",
                        "tool": canonical,
                        "message": message,
                    })
                    .to_string(),
                    metadata,
                    error: Some(json!({"code": "tool_execution_failed", "message": message})),
                }
            }
            Err(join_error) => {
                let message = if join_error.is_panic() {
                    "tool handler panicked".to_string()
                } else {
                    join_error.to_string()
                };
                warn!(tool = %canonical, error = %message, "Tool task failed");
                ToolResult {
                    ok: false,
                    status: 500,
                    content: json!({
                        "error": "tool_execution_failed",
                        "tool": canonical,
                        "message": message,
                    })
                    .to_string(),
                    metadata,
                    error: Some(json!({"code": "tool_execution_failed", "message": message})),
                }
            }
        }
    }
}
