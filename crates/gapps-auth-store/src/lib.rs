//! # gapps-auth-store
//!
//! Account storage for gapps-auth.
//!
//! Provides SQLite-backed persistence with WAL mode for the local accounts
//! that verified domain identities are mapped onto, plus the site-wide
//! statistics (registered user count) that account creation maintains.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  AccountStore (find-or-create, stats)    │
//! ├─────────────────────────────────────────┤
//! │  Database (rusqlite WAL)                 │
//! │  Migrations (versioned, transactional)   │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use gapps_auth_store::{AccountStore, Database};
//!
//! let db = Database::open_and_migrate("data/gapps-auth.db").await?;
//! let accounts = AccountStore::new(db);
//! let (account, created) = accounts
//!     .find_or_create("alice@example.com", "Alice Jones")
//!     .await?;
//! ```

pub mod account_store;
pub mod db;
pub mod error;
pub mod migration;

// ── re-exports ───────────────────────────────────────────────────────

pub use account_store::{AccountStore, LocalAccount};
pub use db::Database;
pub use error::{StoreError, StoreResult};
