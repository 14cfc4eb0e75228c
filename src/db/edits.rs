// src/db/edits.rs
// Edit-history snapshots recorded by the workspace write tools

use rusqlite::{Connection, OptionalExtension, params};

use super::types::EditRecord;

fn row_to_edit(row: &rusqlite::Row<'_>) -> rusqlite::Result<EditRecord> {
    Ok(EditRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        path: row.get(2)?,
        operation: row.get(3)?,
        before_content: row.get(4)?,
        after_content: row.get(5)?,
        diff: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// Record a before/after snapshot for a workspace write.
pub fn record_edit_sync(
    conn: &Connection,
    session_id: Option<&str>,
    path: &str,
    operation: &str,
    before: Option<&str>,
    after: Option<&str>,
    diff: Option<&str>,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO edits (session_id, path, operation, before_content, after_content, diff, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))",
        params![session_id, path, operation, before, after, diff],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_edit_sync(conn: &Connection, id: i64) -> rusqlite::Result<Option<EditRecord>> {
    conn.query_row(
        "SELECT id, session_id, path, operation, before_content, after_content, diff, created_at
         FROM edits WHERE id = ?1",
        params![id],
        row_to_edit,
    )
    .optional()
}

/// Most recent edits, newest first, optionally filtered by path.
pub fn list_edits_sync(
    conn: &Connection,
    path: Option<&str>,
    limit: usize,
) -> rusqlite::Result<Vec<EditRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, session_id, path, operation, before_content, after_content, diff, created_at
         FROM edits
         WHERE (?1 IS NULL OR path = ?1)
         ORDER BY id DESC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![path, limit as i64], row_to_edit)?;
    rows.collect()
}
