// src/db/test_runs.rs
// Recorded runs of the workspace test command

use rusqlite::{Connection, params};

use super::types::TestRunRecord;

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<TestRunRecord> {
    Ok(TestRunRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        command: row.get(2)?,
        exit_code: row.get(3)?,
        passed: row.get::<_, i32>(4)? != 0,
        output_snippet: row.get(5)?,
        duration_ms: row.get(6)?,
        created_at: row.get(7)?,
    })
}

pub fn record_test_run_sync(
    conn: &Connection,
    session_id: Option<&str>,
    command: &str,
    exit_code: i64,
    output_snippet: Option<&str>,
    duration_ms: i64,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO test_runs (session_id, command, exit_code, passed, output_snippet, duration_ms, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))",
        params![
            session_id,
            command,
            exit_code,
            (exit_code == 0) as i32,
            output_snippet,
            duration_ms
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_test_runs_sync(conn: &Connection, limit: usize) -> rusqlite::Result<Vec<TestRunRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, session_id, command, exit_code, passed, output_snippet, duration_ms, created_at
         FROM test_runs
         ORDER BY id DESC
         LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit as i64], row_to_run)?;
    rows.collect()
}

/// Aggregate pass/fail counts and latest result.
pub fn test_summary_sync(conn: &Connection) -> rusqlite::Result<(i64, i64, Option<TestRunRecord>)> {
    let passed: i64 = conn.query_row(
        "SELECT COUNT(*) FROM test_runs WHERE passed = 1",
        [],
        |row| row.get(0),
    )?;
    let failed: i64 = conn.query_row(
        "SELECT COUNT(*) FROM test_runs WHERE passed = 0",
        [],
        |row| row.get(0),
    )?;
    let latest = list_test_runs_sync(conn, 1)?.into_iter().next();
    Ok((passed, failed, latest))
}
