// src/db/pool.rs
// Async connection pool using deadpool-sqlite
//
// Access pattern: `pool.run()` for tool handlers (converts errors to
// `GatehouseError`), `pool.interact()` for internal helpers that want
// `anyhow::Result`. Closures run on a blocking thread, never on the
// async runtime. In-memory pools use a shared-cache URI so every pooled
// connection sees the same database (required for tests).

use crate::error::GatehouseError;
use anyhow::{Context, Result};
use deadpool_sqlite::{Config, Hook, Pool, Runtime};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Database pool wrapper with per-connection setup.
pub struct DatabasePool {
    pool: Pool,
    path: Option<PathBuf>,
    /// URI for in-memory databases (used to share state in tests)
    memory_uri: Option<String>,
}

impl DatabasePool {
    /// Open a pooled database at the given path and run migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        ensure_parent_directory(path)?;
        let conn_str = path.to_string_lossy().to_string();
        let hook = make_file_post_create_hook(path.to_path_buf());

        let cfg = Config::new(&conn_str);
        let pool = cfg
            .builder(Runtime::Tokio1)
            .context("Failed to create pool builder")?
            .max_size(8)
            .post_create(hook)
            .build()
            .context("Failed to build connection pool")?;

        let db_pool = Self {
            pool,
            path: Some(path.to_path_buf()),
            memory_uri: None,
        };
        db_pool.run_migrations().await?;
        Ok(db_pool)
    }

    /// Open a pooled in-memory database (shared cache, for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let uri = format!(
            "file:memdb_{}?mode=memory&cache=shared",
            uuid::Uuid::new_v4().simple()
        );
        let cfg = Config::new(&uri);
        let pool = cfg
            .builder(Runtime::Tokio1)
            .context("Failed to create pool builder")?
            .max_size(8)
            .post_create(make_memory_post_create_hook())
            .build()
            .context("Failed to build connection pool")?;

        let db_pool = Self {
            pool,
            path: None,
            memory_uri: Some(uri),
        };
        db_pool.run_migrations().await?;
        Ok(db_pool)
    }

    /// Get the memory URI (for sharing state in tests)
    pub fn memory_uri(&self) -> Option<&str> {
        self.memory_uri.as_deref()
    }

    /// Get the database file path (None for in-memory).
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run a closure with a connection from the pool.
    pub async fn interact<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get connection from pool")?;

        conn.interact(move |conn| f(conn))
            .await
            .map_err(|e| anyhow::anyhow!("interact failed: {e}"))?
    }

    /// Run a closure and convert errors to `GatehouseError` (tool handlers).
    pub async fn run<F, R, E>(&self, f: F) -> Result<R, GatehouseError>
    where
        F: FnOnce(&Connection) -> Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: Into<GatehouseError> + Send + 'static,
    {
        self.pool
            .get()
            .await
            .map_err(|e| GatehouseError::Other(format!("Failed to get connection: {}", e)))?
            .interact(move |conn| f(conn).map_err(Into::into))
            .await
            .map_err(|e| GatehouseError::Other(format!("Database error: {}", e)))?
    }

    /// Run a closure on a pooled connection, logging errors but not propagating.
    /// For best-effort writes (metrics bookkeeping, cache-adjacent state).
    pub async fn try_interact<F, R>(&self, label: &str, f: F) -> Option<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let label = label.to_string();
        match self.interact(move |conn| f(conn)).await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("{}: {}", label, e);
                None
            }
        }
    }

    /// Run schema migrations. Called during pool creation.
    async fn run_migrations(&self) -> Result<()> {
        self.interact(|conn| {
            super::schema::run_all_migrations(conn)?;
            Ok(())
        })
        .await
    }
}

/// Ensure parent directory exists with restricted permissions (0o700 on Unix).
fn ensure_parent_directory(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if parent.as_os_str().is_empty() {
            return Ok(());
        }
        std::fs::create_dir_all(parent)?;
        #[cfg(unix)]
        {
            let mut perms = std::fs::metadata(parent)?.permissions();
            perms.set_mode(0o700);
            std::fs::set_permissions(parent, perms)?;
        }
    }
    Ok(())
}

/// Post-create hook for file-based databases: PRAGMAs + 0o600 file mode.
fn make_file_post_create_hook(path: PathBuf) -> Hook {
    Hook::async_fn(move |conn, _metrics| {
        let path_for_perms = path.clone();
        Box::pin(async move {
            conn.interact(move |conn| {
                setup_connection(conn)?;

                #[cfg(unix)]
                if let Ok(metadata) = std::fs::metadata(&path_for_perms) {
                    let mut perms = metadata.permissions();
                    perms.set_mode(0o600);
                    if let Err(e) = std::fs::set_permissions(&path_for_perms, perms) {
                        tracing::warn!("Failed to set database file permissions to 0600: {}", e);
                    }
                }
                #[cfg(not(unix))]
                let _ = &path_for_perms;

                Ok::<_, rusqlite::Error>(())
            })
            .await
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("interact failed: {e}").into())
            })?
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("connection setup failed: {e}").into())
            })
        })
    })
}

/// Post-create hook for in-memory databases (WAL is not applicable).
fn make_memory_post_create_hook() -> Hook {
    Hook::async_fn(|conn, _metrics| {
        Box::pin(async move {
            conn.interact(|conn| {
                conn.execute_batch(
                    "PRAGMA foreign_keys=ON; \
                     PRAGMA busy_timeout=5000;",
                )?;
                Ok::<_, rusqlite::Error>(())
            })
            .await
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("interact failed: {e}").into())
            })?
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("connection setup failed: {e}").into())
            })
        })
    })
}

/// Configure a connection after it's created.
/// WAL for concurrency, foreign keys for cascade deletes, busy timeout
/// for write contention, NORMAL synchronous (safe with WAL).
fn setup_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL; \
         PRAGMA foreign_keys=ON; \
         PRAGMA busy_timeout=5000; \
         PRAGMA synchronous=NORMAL;",
    )?;
    Ok(())
}
