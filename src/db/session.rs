// src/db/session.rs
// Session and history operations

use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;

use super::types::{SessionRecord, StoredTurn, Turn};

// ============================================================================
// Sync functions for pool.interact() usage
// ============================================================================

/// Fetch a session by id, or create it if it does not exist.
/// `generated` is only honored on creation.
pub fn get_or_create_session_sync(
    conn: &Connection,
    session_id: &str,
    generated: bool,
) -> rusqlite::Result<SessionRecord> {
    conn.execute(
        "INSERT INTO sessions (id, created_at, updated_at, metadata, generated)
         VALUES (?1, datetime('now'), datetime('now'), '{}', ?2)
         ON CONFLICT(id) DO UPDATE SET updated_at = datetime('now')",
        params![session_id, generated as i32],
    )?;
    get_session_sync(conn, session_id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
}

/// Fetch a session by id.
pub fn get_session_sync(
    conn: &Connection,
    session_id: &str,
) -> rusqlite::Result<Option<SessionRecord>> {
    conn.query_row(
        "SELECT id, created_at, updated_at, metadata, generated
         FROM sessions WHERE id = ?1",
        params![session_id],
        |row| {
            let metadata: String = row.get(3)?;
            Ok(SessionRecord {
                id: row.get(0)?,
                created_at: row.get(1)?,
                updated_at: row.get(2)?,
                metadata: serde_json::from_str(&metadata).unwrap_or(Value::Null),
                generated: row.get::<_, i32>(4)? != 0,
            })
        },
    )
    .optional()
}

/// Merge metadata into a session, creating it if needed.
pub fn upsert_session_sync(
    conn: &Connection,
    session_id: &str,
    metadata: &Value,
) -> rusqlite::Result<()> {
    let serialized = metadata.to_string();
    conn.execute(
        "INSERT INTO sessions (id, created_at, updated_at, metadata, generated)
         VALUES (?1, datetime('now'), datetime('now'), ?2, 0)
         ON CONFLICT(id) DO UPDATE SET
             metadata = ?2,
             updated_at = datetime('now')",
        params![session_id, serialized],
    )?;
    Ok(())
}

/// Append a turn to a session's history and touch the session.
/// The session row must already exist (history has a FK on sessions).
pub fn append_turn_sync(
    conn: &Connection,
    session_id: &str,
    turn: &Turn,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO session_history (session_id, role, kind, status, content, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))",
        params![
            session_id,
            turn.role,
            turn.kind,
            turn.status,
            turn.content.to_string(),
            turn.metadata.as_ref().map(|m| m.to_string()),
        ],
    )?;
    let turn_id = conn.last_insert_rowid();
    conn.execute(
        "UPDATE sessions SET updated_at = datetime('now') WHERE id = ?1",
        params![session_id],
    )?;
    Ok(turn_id)
}

/// Read the full history for a session, in insertion order.
pub fn get_history_sync(
    conn: &Connection,
    session_id: &str,
) -> rusqlite::Result<Vec<StoredTurn>> {
    let mut stmt = conn.prepare(
        "SELECT id, session_id, role, kind, status, content, metadata, created_at
         FROM session_history
         WHERE session_id = ?1
         ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![session_id], |row| {
        let content: String = row.get(5)?;
        let metadata: Option<String> = row.get(6)?;
        Ok(StoredTurn {
            id: row.get(0)?,
            session_id: row.get(1)?,
            role: row.get(2)?,
            kind: row.get(3)?,
            status: row.get(4)?,
            content: serde_json::from_str(&content).unwrap_or(Value::Null),
            metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
            created_at: row.get(7)?,
        })
    })?;
    rows.collect()
}

/// Delete a session; history rows cascade.
pub fn delete_session_sync(conn: &Connection, session_id: &str) -> rusqlite::Result<bool> {
    let deleted = conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
    Ok(deleted > 0)
}
