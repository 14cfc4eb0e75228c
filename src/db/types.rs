// src/db/types.rs
// Row types shared by the db modules

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A durable session, keyed by the client-supplied (or generated) id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub created_at: String,
    pub updated_at: String,
    /// Opaque client metadata (JSON object)
    pub metadata: Value,
    /// True when the id was generated server-side rather than supplied
    pub generated: bool,
}

/// One entry in a session's append-only history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// user | assistant | tool | system
    pub role: String,
    /// Type tag, e.g. "message", "tool_result", "cache_hit"
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<i64>,
    /// Arbitrary JSON payload (the upstream message, a tool result, ...)
    pub content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Turn {
    pub fn new(role: impl Into<String>, kind: impl Into<String>, content: Value) -> Self {
        Self {
            role: role.into(),
            kind: kind.into(),
            status: None,
            content,
            metadata: None,
        }
    }

    pub fn with_status(mut self, status: i64) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A persisted turn, as read back from session_history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTurn {
    pub id: i64,
    pub session_id: String,
    pub role: String,
    pub kind: String,
    pub status: Option<i64>,
    pub content: Value,
    pub metadata: Option<Value>,
    pub created_at: String,
}

/// A workspace task row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub priority: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A recorded file edit (before/after snapshot).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditRecord {
    pub id: i64,
    pub session_id: Option<String>,
    pub path: String,
    pub operation: String,
    pub before_content: Option<String>,
    pub after_content: Option<String>,
    pub diff: Option<String>,
    pub created_at: String,
}

/// A recorded test run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRunRecord {
    pub id: i64,
    pub session_id: Option<String>,
    pub command: String,
    pub exit_code: i64,
    pub passed: bool,
    pub output_snippet: Option<String>,
    pub duration_ms: i64,
    pub created_at: String,
}
