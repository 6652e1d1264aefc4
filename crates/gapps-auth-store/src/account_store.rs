//! Local accounts that verified domain identities are mapped onto.
//!
//! Every account is keyed by its (case-insensitive) email address, which
//! the schema enforces with a `UNIQUE` constraint. Accounts created here
//! are never meant to be logged into with a password: the password column
//! holds an unusable placeholder (`!` followed by random bytes) that no
//! input can ever match.

use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD as BASE64;
use chrono::Utc;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// A local account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalAccount {
    /// Unique identifier (UUID v7).
    pub id: String,
    /// Verified email address, stored lowercased. Unique.
    pub email: String,
    /// Real name shown in the UI.
    pub display_name: String,
    /// Whether the login cookie should outlive the browser session.
    pub remember_login: bool,
    /// Unix timestamp when the account was created.
    pub created_at: i64,
    /// Unix timestamp when the account was last updated.
    pub updated_at: i64,
}

const ACCOUNT_COLUMNS: &str =
    "id, email, display_name, remember_login, created_at, updated_at";

fn account_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LocalAccount> {
    Ok(LocalAccount {
        id: row.get(0)?,
        email: row.get(1)?,
        display_name: row.get(2)?,
        remember_login: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

// ═══════════════════════════════════════════════════════════════════════
//  Placeholder credential
// ═══════════════════════════════════════════════════════════════════════

/// Prefix marking a password column value that cannot be verified.
pub const UNUSABLE_PASSWORD_PREFIX: char = '!';

const PLACEHOLDER_BYTES: usize = 32;

/// Generate an unguessable, unusable password placeholder.
fn placeholder_credential() -> StoreResult<String> {
    let mut bytes = [0u8; PLACEHOLDER_BYTES];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| StoreError::Random)?;
    Ok(format!("{UNUSABLE_PASSWORD_PREFIX}{}", BASE64.encode(bytes)))
}

/// Trim and lowercase an email, rejecting values that cannot be one.
fn normalize_email(email: &str) -> StoreResult<String> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(StoreError::InvalidAccount(format!(
            "not an email address: {email:?}"
        ))),
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  AccountStore
// ═══════════════════════════════════════════════════════════════════════

/// Lookup, creation and preference updates for local accounts.
#[derive(Clone)]
pub struct AccountStore {
    db: Database,
}

impl AccountStore {
    /// Create a new account store backed by `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Return the account for `email`, creating it if absent.
    ///
    /// The insert, the `users` statistic increment and the read-back run
    /// in one transaction, and the insert is a no-op when the email is
    /// already taken. Concurrent calls for the same email therefore yield
    /// one account and one increment. The boolean is `true` when this call
    /// created the account.
    #[instrument(skip(self))]
    pub async fn find_or_create(
        &self,
        email: &str,
        display_name: &str,
    ) -> StoreResult<(LocalAccount, bool)> {
        let email = normalize_email(email)?;
        let display_name = display_name.trim().to_string();
        if display_name.is_empty() {
            return Err(StoreError::InvalidAccount(
                "display name must not be empty".into(),
            ));
        }

        let id = Uuid::now_v7().to_string();
        let password = placeholder_credential()?;
        let now = Utc::now().timestamp();

        let (account, created) = self
            .db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                let inserted = tx.execute(
                    "INSERT INTO accounts (id, email, display_name, password, remember_login, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5) \
                     ON CONFLICT(email) DO NOTHING",
                    rusqlite::params![id, email, display_name, password, now],
                )?;
                if inserted == 1 {
                    tx.execute(
                        "UPDATE site_stats SET value = value + 1 WHERE name = 'users'",
                        [],
                    )?;
                }
                let account = tx.query_row(
                    &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = ?1"),
                    rusqlite::params![email],
                    account_from_row,
                )?;
                tx.commit()?;
                Ok((account, inserted == 1))
            })
            .await?;

        if created {
            info!(account_id = %account.id, email = %account.email, "local account created");
        } else {
            debug!(account_id = %account.id, "local account already exists");
        }
        Ok((account, created))
    }

    /// Fetch an account by email, returning `None` if not found.
    #[instrument(skip(self))]
    pub async fn find_by_email(&self, email: &str) -> StoreResult<Option<LocalAccount>> {
        let email = normalize_email(email)?;
        self.db
            .execute(move |conn| {
                let result = conn.query_row(
                    &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = ?1"),
                    rusqlite::params![email],
                    account_from_row,
                );
                match result {
                    Ok(account) => Ok(Some(account)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await
    }

    /// Fetch an account by ID, returning `None` if not found.
    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> StoreResult<Option<LocalAccount>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let result = conn.query_row(
                    &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1"),
                    rusqlite::params![id],
                    account_from_row,
                );
                match result {
                    Ok(account) => Ok(Some(account)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await
    }

    /// Set the "remember me" preference for an account.
    #[instrument(skip(self))]
    pub async fn set_remember_login(&self, id: &str, remember: bool) -> StoreResult<()> {
        let id = id.to_string();
        let now = Utc::now().timestamp();

        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE accounts SET remember_login = ?2, updated_at = ?3 WHERE id = ?1",
                    rusqlite::params![id, remember, now],
                )?;
                if updated == 0 {
                    return Err(StoreError::AccountNotFound(id));
                }
                Ok(())
            })
            .await
    }

    /// List accounts ordered by creation time, with pagination.
    #[instrument(skip(self))]
    pub async fn list(&self, limit: i64, offset: i64) -> StoreResult<Vec<LocalAccount>> {
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ACCOUNT_COLUMNS} FROM accounts \
                     ORDER BY created_at ASC, id ASC LIMIT ?1 OFFSET ?2"
                ))?;
                let accounts = stmt
                    .query_map(rusqlite::params![limit, offset], account_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(accounts)
            })
            .await
    }

    /// Number of account rows.
    #[instrument(skip(self))]
    pub async fn count(&self) -> StoreResult<i64> {
        self.db
            .execute(|conn| {
                let count = conn.query_row("SELECT count(*) FROM accounts", [], |row| row.get(0))?;
                Ok(count)
            })
            .await
    }

    /// The site-wide registered user statistic.
    ///
    /// Incremented once per account created through [`find_or_create`];
    /// deleting accounts does not decrement it.
    ///
    /// [`find_or_create`]: Self::find_or_create
    #[instrument(skip(self))]
    pub async fn user_count(&self) -> StoreResult<i64> {
        self.db
            .execute(|conn| {
                let count = conn.query_row(
                    "SELECT value FROM site_stats WHERE name = 'users'",
                    [],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await
    }

    /// Delete an account by ID.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> StoreResult<()> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let deleted =
                    conn.execute("DELETE FROM accounts WHERE id = ?1", rusqlite::params![id])?;
                if deleted == 0 {
                    return Err(StoreError::AccountNotFound(id));
                }
                Ok(())
            })
            .await
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    async fn setup_store() -> AccountStore {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        AccountStore::new(db)
    }

    async fn stored_password(store: &AccountStore, id: &str) -> String {
        let id = id.to_string();
        store
            .db
            .execute(move |conn| {
                let p = conn.query_row(
                    "SELECT password FROM accounts WHERE id = ?1",
                    rusqlite::params![id],
                    |row| row.get(0),
                )?;
                Ok(p)
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn find_or_create_creates_then_finds() {
        let store = setup_store().await;

        let (first, created) = store
            .find_or_create("alice@example.com", "Alice Jones")
            .await
            .unwrap();
        assert!(created);
        assert_eq!(first.email, "alice@example.com");
        assert_eq!(first.display_name, "Alice Jones");
        assert!(!first.remember_login);

        let (second, created) = store
            .find_or_create("alice@example.com", "Someone Else")
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(second.id, first.id);
        assert_eq!(second.display_name, "Alice Jones");

        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.user_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn email_is_normalized() {
        let store = setup_store().await;

        let (account, _) = store
            .find_or_create("  Bob@Example.COM ", "Bob")
            .await
            .unwrap();
        assert_eq!(account.email, "bob@example.com");

        let found = store.find_by_email("BOB@example.com").await.unwrap();
        assert_eq!(found.map(|a| a.id), Some(account.id));
    }

    #[tokio::test]
    async fn placeholder_password_is_unusable_and_unique() {
        let store = setup_store().await;

        let (a, _) = store.find_or_create("a@example.com", "A").await.unwrap();
        let (b, _) = store.find_or_create("b@example.com", "B").await.unwrap();

        let pa = stored_password(&store, &a.id).await;
        let pb = stored_password(&store, &b.id).await;
        assert!(pa.starts_with(UNUSABLE_PASSWORD_PREFIX));
        assert!(pb.starts_with(UNUSABLE_PASSWORD_PREFIX));
        assert_ne!(pa, pb);
        assert!(!pa.contains("a@example.com"));
    }

    #[tokio::test]
    async fn invalid_input_creates_nothing() {
        let store = setup_store().await;

        let no_at = store.find_or_create("not-an-email", "Name").await;
        assert!(matches!(no_at, Err(StoreError::InvalidAccount(_))));

        let no_name = store.find_or_create("c@example.com", "   ").await;
        assert!(matches!(no_name, Err(StoreError::InvalidAccount(_))));

        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(store.user_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn concurrent_find_or_create_yields_one_account() {
        let store = setup_store().await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .find_or_create("race@example.com", "Race Condition")
                    .await
                    .unwrap()
            }));
        }

        let mut ids = HashSet::new();
        let mut creations = 0;
        for handle in handles {
            let (account, created) = handle.await.unwrap();
            ids.insert(account.id);
            if created {
                creations += 1;
            }
        }

        assert_eq!(ids.len(), 1);
        assert_eq!(creations, 1);
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.user_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn set_remember_login_updates_flag() {
        let store = setup_store().await;
        let (account, _) = store.find_or_create("d@example.com", "D").await.unwrap();

        store.set_remember_login(&account.id, true).await.unwrap();

        let fetched = store.get(&account.id).await.unwrap().unwrap();
        assert!(fetched.remember_login);
        assert!(fetched.updated_at >= account.updated_at);
    }

    #[tokio::test]
    async fn set_remember_login_unknown_account() {
        let store = setup_store().await;

        let result = store.set_remember_login("missing", true).await;
        match result {
            Err(StoreError::AccountNotFound(id)) => assert!(!id.is_empty()),
            other => panic!("expected AccountNotFound, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn list_and_delete() {
        let store = setup_store().await;
        for i in 0..3 {
            store
                .find_or_create(&format!("user{i}@example.com"), "User")
                .await
                .unwrap();
        }

        let page = store.list(2, 0).await.unwrap();
        assert_eq!(page.len(), 2);
        let rest = store.list(2, 2).await.unwrap();
        assert_eq!(rest.len(), 1);

        store.delete(&rest[0].id).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
        // The statistic counts registrations, not live rows.
        assert_eq!(store.user_count().await.unwrap(), 3);

        assert!(matches!(
            store.delete(&rest[0].id).await,
            Err(StoreError::AccountNotFound(_))
        ));
    }
}
