// src/sandbox/sessions.rs
// Per-session bookkeeping for sandboxed runs

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

/// Bookkeeping for one logical sandbox session. Distinct sessions get
/// distinct MCP_SANDBOX_SESSION markers so tools can correlate runs.
#[derive(Debug, Clone, Serialize)]
pub struct SandboxSession {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub run_count: u64,
}

/// Tracks sandbox sessions for the lifetime of the process.
#[derive(Debug, Default)]
pub struct SessionTracker {
    sessions: Mutex<HashMap<String, SandboxSession>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a run for a session, creating it on first use.
    pub fn touch(&self, session_id: &str) {
        let mut sessions = match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Utc::now();
        sessions
            .entry(session_id.to_string())
            .and_modify(|s| {
                s.last_used_at = now;
                s.run_count += 1;
            })
            .or_insert_with(|| SandboxSession {
                id: session_id.to_string(),
                created_at: now,
                last_used_at: now,
                run_count: 1,
            });
    }

    /// Snapshot of all known sessions, most recently used first.
    pub fn list(&self) -> Vec<SandboxSession> {
        let sessions = match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut list: Vec<SandboxSession> = sessions.values().cloned().collect();
        list.sort_by(|a, b| b.last_used_at.cmp(&a.last_used_at));
        list
    }

    /// Drop a session's bookkeeping. Returns whether it existed.
    pub fn release(&self, session_id: &str) -> bool {
        let mut sessions = match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sessions.remove(session_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touch_creates_and_counts() {
        let tracker = SessionTracker::new();
        tracker.touch("s1");
        tracker.touch("s1");
        tracker.touch("s2");

        let sessions = tracker.list();
        assert_eq!(sessions.len(), 2);
        let s1 = sessions.iter().find(|s| s.id == "s1").expect("s1");
        assert_eq!(s1.run_count, 2);
    }

    #[test]
    fn test_release() {
        let tracker = SessionTracker::new();
        tracker.touch("s1");
        assert!(tracker.release("s1"));
        assert!(!tracker.release("s1"));
        assert!(tracker.list().is_empty());
    }
}
