//! Shared SQLite handle for the account database.
//!
//! One [`Database`] is opened at startup and cloned into every request
//! handler. The connection sits behind a mutex, so writes from concurrent
//! logins are serialized; all access happens on tokio's blocking pool.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::migration;

/// Milliseconds a writer waits on a locked database file.
const BUSY_TIMEOUT_MS: i32 = 5_000;

/// Cloneable handle to the account database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database file at `path`.
    ///
    /// Missing parent directories are created. This does blocking file I/O;
    /// async callers should prefer [`Database::open_and_migrate`].
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening account database");
        ensure_parent_dir(path)?;
        Self::from_connection(Connection::open(path)?)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        debug!("opening in-memory database");
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Open the database off the async runtime and bring its schema up to date.
    pub async fn open_and_migrate(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let db = tokio::task::spawn_blocking(move || Self::open(&path)).await??;
        db.run_migrations().await?;
        Ok(db)
    }

    /// Apply every migration not yet recorded in `_migrations`.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        self.execute(migration::run_all).await
    }

    /// Run `f` with a shared reference to the connection.
    pub async fn execute<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.execute_mut(move |conn| f(conn)).await
    }

    /// Run `f` with exclusive access to the connection, e.g. to open a
    /// transaction.
    pub async fn execute_mut<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| StoreError::Worker(format!("connection mutex poisoned: {e}")))?;
            f(&mut guard)
        })
        .await?
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        // WAL lets the `accounts` command read while the server writes.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "busy_timeout", BUSY_TIMEOUT_MS)?;
        debug!(busy_timeout_ms = BUSY_TIMEOUT_MS, "database pragmas applied");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn ensure_parent_dir(path: &Path) -> StoreResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Directory {
                path: parent.to_path_buf(),
                source,
            })
        }
        _ => Ok(()),
    }
}
