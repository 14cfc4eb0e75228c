// src/mcp/manifest.rs
// MCP server manifest discovery
//
// A manifest is a JSON file holding either an array of server entries or an
// object with a `servers` array. Entries without an id or command are
// skipped; duplicate ids are last-write-wins within one load. Only the
// stdio transport is honored.

use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::McpConfig;

/// Declarative record for one external MCP server.
#[derive(Debug, Clone)]
pub struct McpServerConfig {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub metadata: Value,
}

/// Load all manifests named by the configuration, in precedence order:
/// the single manifest file first, then each manifest directory's `*.json`
/// files in name order. Later entries overwrite earlier ones by id.
pub fn load_manifests(config: &McpConfig) -> Vec<McpServerConfig> {
    let mut servers: HashMap<String, McpServerConfig> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    let mut paths: Vec<PathBuf> = Vec::new();
    if let Some(ref file) = config.manifest_file {
        paths.push(file.clone());
    }
    for dir in &config.manifest_dirs {
        paths.extend(manifest_files_in(dir));
    }

    for path in paths {
        for server in parse_manifest_file(&path) {
            if !servers.contains_key(&server.id) {
                order.push(server.id.clone());
            }
            servers.insert(server.id.clone(), server);
        }
    }

    let loaded: Vec<McpServerConfig> = order
        .into_iter()
        .filter_map(|id| servers.remove(&id))
        .collect();
    if loaded.is_empty() {
        debug!("No MCP server manifests found");
    } else {
        debug!(
            count = loaded.len(),
            servers = ?loaded.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            "Loaded MCP server manifests"
        );
    }
    loaded
}

/// `*.json` files directly inside a directory, sorted by name.
fn manifest_files_in(dir: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("json")
        })
        .collect();
    files.sort();
    files
}

/// Parse one manifest file; unreadable or malformed files yield nothing.
pub fn parse_manifest_file(path: &Path) -> Vec<McpServerConfig> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Skipping unreadable manifest");
            return Vec::new();
        }
    };
    let parsed: Value = match serde_json::from_str(&content) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Skipping malformed manifest");
            return Vec::new();
        }
    };
    parse_manifest_value(&parsed)
}

/// Parse a manifest JSON value (array or `{servers: [...]}`).
pub fn parse_manifest_value(manifest: &Value) -> Vec<McpServerConfig> {
    let entries = match manifest {
        Value::Array(entries) => entries.as_slice(),
        Value::Object(obj) => match obj.get("servers").and_then(Value::as_array) {
            Some(entries) => entries.as_slice(),
            None => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    entries.iter().filter_map(parse_entry).collect()
}

fn parse_entry(entry: &Value) -> Option<McpServerConfig> {
    let id = entry
        .get("id")
        .or_else(|| entry.get("name"))
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())?
        .to_string();
    let command = entry
        .get("command")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())?
        .to_string();

    let transport = entry
        .get("transport")
        .and_then(Value::as_str)
        .unwrap_or("stdio");
    if transport != "stdio" {
        warn!(server = %id, transport = %transport, "Unsupported MCP transport, ignoring server");
        return None;
    }

    let args = entry
        .get("args")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    let env = entry
        .get("env")
        .and_then(Value::as_object)
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default();

    Some(McpServerConfig {
        name: entry
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(&id)
            .to_string(),
        description: entry
            .get("description")
            .and_then(Value::as_str)
            .map(String::from),
        command: expand_home(&command),
        args,
        env,
        metadata: entry.get("metadata").cloned().unwrap_or(Value::Null),
        id,
    })
}

/// Resolve a leading `~/` in a command path against the user's home.
fn expand_home(command: &str) -> String {
    if let Some(rest) = command.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).to_string_lossy().into_owned();
        }
    }
    command.to_string()
}
