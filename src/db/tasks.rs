// src/db/tasks.rs
// Workspace task storage behind the workspace_task_* tools

use rusqlite::{Connection, OptionalExtension, params};

use super::types::TaskRecord;

const VALID_STATUSES: &[&str] = &["pending", "in_progress", "completed", "cancelled"];

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRecord> {
    Ok(TaskRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        status: row.get(3)?,
        priority: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

pub fn create_task_sync(
    conn: &Connection,
    title: &str,
    description: Option<&str>,
    priority: &str,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO tasks (title, description, status, priority, created_at, updated_at)
         VALUES (?1, ?2, 'pending', ?3, datetime('now'), datetime('now'))",
        params![title, description, priority],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_task_sync(conn: &Connection, id: i64) -> rusqlite::Result<Option<TaskRecord>> {
    conn.query_row(
        "SELECT id, title, description, status, priority, created_at, updated_at
         FROM tasks WHERE id = ?1",
        params![id],
        row_to_task,
    )
    .optional()
}

pub fn update_task_sync(
    conn: &Connection,
    id: i64,
    title: Option<&str>,
    description: Option<&str>,
    priority: Option<&str>,
) -> rusqlite::Result<bool> {
    let updated = conn.execute(
        "UPDATE tasks SET
             title = COALESCE(?2, title),
             description = COALESCE(?3, description),
             priority = COALESCE(?4, priority),
             updated_at = datetime('now')
         WHERE id = ?1",
        params![id, title, description, priority],
    )?;
    Ok(updated > 0)
}

/// Set task status. Returns Err(InvalidParameterName) for unknown statuses
/// so the caller can surface a clean message.
pub fn set_task_status_sync(conn: &Connection, id: i64, status: &str) -> rusqlite::Result<bool> {
    if !VALID_STATUSES.contains(&status) {
        return Err(rusqlite::Error::InvalidParameterName(format!(
            "invalid status '{status}', expected one of {VALID_STATUSES:?}"
        )));
    }
    let updated = conn.execute(
        "UPDATE tasks SET status = ?2, updated_at = datetime('now') WHERE id = ?1",
        params![id, status],
    )?;
    Ok(updated > 0)
}

pub fn delete_task_sync(conn: &Connection, id: i64) -> rusqlite::Result<bool> {
    Ok(conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])? > 0)
}

pub fn list_tasks_sync(
    conn: &Connection,
    status: Option<&str>,
    limit: usize,
) -> rusqlite::Result<Vec<TaskRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, title, description, status, priority, created_at, updated_at
         FROM tasks
         WHERE (?1 IS NULL OR status = ?1)
         ORDER BY id DESC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![status, limit as i64], row_to_task)?;
    rows.collect()
}
