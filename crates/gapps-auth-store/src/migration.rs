//! Versioned schema for the account database.
//!
//! Each step runs inside its own transaction together with the row that
//! records it in `_migrations`, so a step is either fully applied or not at
//! all.

use rusqlite::{Connection, params};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

/// `(version, description, sql)`, strictly increasing by version.
const STEPS: &[(u32, &str, &str)] = &[
    (
        1,
        "local accounts keyed by verified email",
        "CREATE TABLE accounts (
            id             TEXT PRIMARY KEY,
            email          TEXT NOT NULL UNIQUE COLLATE NOCASE,
            display_name   TEXT NOT NULL,
            password       TEXT NOT NULL,
            remember_login BOOLEAN NOT NULL DEFAULT 0,
            created_at     INTEGER NOT NULL,
            updated_at     INTEGER NOT NULL
        );",
    ),
    (
        2,
        "site statistics counters",
        "CREATE TABLE site_stats (
            name  TEXT PRIMARY KEY,
            value INTEGER NOT NULL DEFAULT 0
        );
        INSERT INTO site_stats (name, value) VALUES ('users', 0);",
    ),
];

/// Bring the schema up to the newest step.
pub fn run_all(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  INTEGER NOT NULL
        );",
    )
    .map_err(|e| failed(0, "create _migrations", e))?;

    let current = current_version(conn)?;
    let mut applied = 0;
    for &(version, description, sql) in STEPS.iter().filter(|(v, _, _)| *v > current) {
        info!(version, description, "applying migration");
        if let Err(err) = apply_step(conn, version, description, sql) {
            warn!(version, %err, "migration rolled back");
            return Err(err);
        }
        applied += 1;
    }

    debug!(from = current, applied, "account schema up to date");
    Ok(())
}

/// Highest applied version, 0 for a fresh database.
pub fn current_version(conn: &Connection) -> StoreResult<u32> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| {
        row.get(0)
    })
    .map_err(|e| failed(0, "read schema version", e))
}

fn apply_step(conn: &Connection, version: u32, description: &str, sql: &str) -> StoreResult<()> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| failed(version, "begin", e))?;
    tx.execute_batch(sql)
        .map_err(|e| failed(version, "execute", e))?;
    tx.execute(
        "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
        params![version, description, chrono::Utc::now().timestamp()],
    )
    .map_err(|e| failed(version, "record", e))?;
    tx.commit().map_err(|e| failed(version, "commit", e))
}

fn failed(version: u32, stage: &str, err: rusqlite::Error) -> StoreError {
    StoreError::Migration {
        version,
        message: format!("{stage}: {err}"),
    }
}
