//! Errors returned by the account store.

use std::path::PathBuf;

use thiserror::Error;

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Schema migration `version` could not be applied.
    #[error("migration v{version} failed: {message}")]
    Migration { version: u32, message: String },

    #[error("account not found: {0}")]
    AccountNotFound(String),

    /// The email or display name handed to the store is unusable.
    #[error("invalid account data: {0}")]
    InvalidAccount(String),

    /// The directory for the database file could not be created.
    #[error("cannot create database directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The system random source failed.
    #[error("random generator unavailable")]
    Random,

    /// The blocking task running a query panicked, or the connection
    /// mutex was poisoned by one that did.
    #[error("database worker failed: {0}")]
    Worker(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Worker(err.to_string())
    }
}
