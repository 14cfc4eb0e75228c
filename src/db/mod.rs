// src/db/mod.rs
// SQLite persistence: sessions + history, tasks, edits, test runs

pub mod edits;
pub mod pool;
pub mod schema;
pub mod session;
pub mod tasks;
pub mod test_runs;
pub mod types;

pub use pool::DatabasePool;
pub use types::{EditRecord, SessionRecord, StoredTurn, TaskRecord, TestRunRecord, Turn};

use crate::error::Result;
use serde_json::Value;
use std::sync::Arc;

/// Async facade over the session tables.
///
/// Thin wrapper that pairs the pool with the sync functions in
/// [`session`]; the orchestrator and HTTP surface only ever talk to this.
#[derive(Clone)]
pub struct SessionStore {
    pool: Arc<DatabasePool>,
}

impl SessionStore {
    pub fn new(pool: Arc<DatabasePool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<DatabasePool> {
        &self.pool
    }

    /// Create the session lazily on first contact.
    pub async fn get_or_create_session(
        &self,
        session_id: &str,
        generated: bool,
    ) -> Result<SessionRecord> {
        let id = session_id.to_string();
        self.pool
            .run(move |conn| session::get_or_create_session_sync(conn, &id, generated))
            .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let id = session_id.to_string();
        self.pool
            .run(move |conn| session::get_session_sync(conn, &id))
            .await
    }

    pub async fn upsert_session(&self, session_id: &str, metadata: Value) -> Result<()> {
        let id = session_id.to_string();
        self.pool
            .run(move |conn| session::upsert_session_sync(conn, &id, &metadata))
            .await
    }

    /// Append one turn; the session must exist.
    pub async fn append_turn(&self, session_id: &str, turn: Turn) -> Result<i64> {
        let id = session_id.to_string();
        self.pool
            .run(move |conn| session::append_turn_sync(conn, &id, &turn))
            .await
    }

    pub async fn get_history(&self, session_id: &str) -> Result<Vec<StoredTurn>> {
        let id = session_id.to_string();
        self.pool
            .run(move |conn| session::get_history_sync(conn, &id))
            .await
    }

    /// Delete a session and (by cascade) its history.
    pub async fn delete_session(&self, session_id: &str) -> Result<bool> {
        let id = session_id.to_string();
        self.pool
            .run(move |conn| session::delete_session_sync(conn, &id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store() -> SessionStore {
        let pool = DatabasePool::open_in_memory().await.expect("pool");
        SessionStore::new(Arc::new(pool))
    }

    #[tokio::test]
    async fn test_append_then_get_roundtrip() {
        let store = store().await;
        store.get_or_create_session("s", false).await.expect("create");

        let before = chrono::Utc::now();
        store
            .append_turn("s", Turn::new("user", "message", json!({"text": "hello"})))
            .await
            .expect("append");

        let history = store.get_history("s").await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, "user");
        assert_eq!(history[0].content["text"], "hello");

        // Timestamp is at or after the caller's clock reading (second granularity)
        let stored = chrono::NaiveDateTime::parse_from_str(
            &history[0].created_at,
            "%Y-%m-%d %H:%M:%S",
        )
        .expect("parse")
        .and_utc();
        assert!(stored >= before - chrono::Duration::seconds(2));
    }

    #[tokio::test]
    async fn test_persisted_across_store_clones() {
        let store = store().await;
        store.get_or_create_session("a", true).await.expect("create");

        let clone = store.clone();
        let session = clone.get_session("a").await.expect("get").expect("some");
        assert!(session.generated);
    }
}
