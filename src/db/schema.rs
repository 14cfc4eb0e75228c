// src/db/schema.rs
// Schema migrations, tracked via PRAGMA user_version

use rusqlite::Connection;
use tracing::info;

/// Ordered migrations. Index + 1 == resulting user_version.
const MIGRATIONS: &[&str] = &[
    // v1: sessions + history
    "CREATE TABLE IF NOT EXISTS sessions (
        id          TEXT PRIMARY KEY,
        created_at  TEXT NOT NULL,
        updated_at  TEXT NOT NULL,
        metadata    TEXT NOT NULL DEFAULT '{}',
        generated   INTEGER NOT NULL DEFAULT 0
    );
    CREATE TABLE IF NOT EXISTS session_history (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id  TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
        role        TEXT NOT NULL,
        kind        TEXT NOT NULL DEFAULT 'message',
        status      INTEGER,
        content     TEXT NOT NULL,
        metadata    TEXT,
        created_at  TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_history_session
        ON session_history(session_id, id);",
    // v2: workspace tasks
    "CREATE TABLE IF NOT EXISTS tasks (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        title       TEXT NOT NULL,
        description TEXT,
        status      TEXT NOT NULL DEFAULT 'pending',
        priority    TEXT NOT NULL DEFAULT 'medium',
        created_at  TEXT NOT NULL,
        updated_at  TEXT NOT NULL
    );",
    // v3: edit history snapshots
    "CREATE TABLE IF NOT EXISTS edits (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id  TEXT,
        path        TEXT NOT NULL,
        operation   TEXT NOT NULL,
        before_content TEXT,
        after_content  TEXT,
        diff        TEXT,
        created_at  TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_edits_path ON edits(path, id);",
    // v4: test runs
    "CREATE TABLE IF NOT EXISTS test_runs (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id  TEXT,
        command     TEXT NOT NULL,
        exit_code   INTEGER NOT NULL,
        passed      INTEGER NOT NULL,
        output_snippet TEXT,
        duration_ms INTEGER NOT NULL,
        created_at  TEXT NOT NULL
    );",
];

/// Run every migration newer than the connection's user_version.
pub fn run_all_migrations(conn: &Connection) -> rusqlite::Result<()> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    for (idx, migration) in MIGRATIONS.iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(migration)?;
        conn.pragma_update(None, "user_version", version)?;
        info!(version, "Applied schema migration");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_apply_cleanly() {
        let conn = Connection::open_in_memory().expect("open");
        run_all_migrations(&conn).expect("migrate");

        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .expect("version");
        assert_eq!(version, MIGRATIONS.len() as i64);
    }

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().expect("open");
        run_all_migrations(&conn).expect("first");
        run_all_migrations(&conn).expect("second");

        // All tables present
        for table in ["sessions", "session_history", "tasks", "edits", "test_runs"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .expect("lookup");
            assert_eq!(count, 1, "missing table {table}");
        }
    }
}
