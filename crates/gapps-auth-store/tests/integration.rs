//! Integration tests for the gapps-auth-store crate.
//!
//! These tests exercise the account lifecycle against a real SQLite
//! database on disk (via tempfile).

use gapps_auth_store::{AccountStore, Database};

#[tokio::test]
async fn database_open_and_migrate_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("accounts.db");

    let db1 = Database::open_and_migrate(db_path.clone()).await.unwrap();
    drop(db1);

    let db2 = Database::open_and_migrate(db_path.clone()).await.unwrap();
    let count: i64 = db2
        .execute(|conn| {
            let c: i64 = conn.query_row("SELECT count(*) FROM accounts", [], |row| row.get(0))?;
            Ok(c)
        })
        .await
        .unwrap();
    assert_eq!(count, 0);
    assert!(db_path.exists());
}

#[tokio::test]
async fn accounts_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("accounts.db");

    let account_id = {
        let db = Database::open_and_migrate(db_path.clone()).await.unwrap();
        let store = AccountStore::new(db);
        let (account, created) = store
            .find_or_create("alice@example.com", "Alice Jones")
            .await
            .unwrap();
        assert!(created);
        store.set_remember_login(&account.id, true).await.unwrap();
        account.id
    };

    let db = Database::open_and_migrate(db_path).await.unwrap();
    let store = AccountStore::new(db);

    let (account, created) = store
        .find_or_create("alice@example.com", "Alice Jones")
        .await
        .unwrap();
    assert!(!created);
    assert_eq!(account.id, account_id);
    assert!(account.remember_login);
    assert_eq!(store.user_count().await.unwrap(), 1);
}

#[tokio::test]
async fn concurrent_logins_for_distinct_emails() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open_and_migrate(dir.path().join("accounts.db"))
        .await
        .unwrap();
    let store = AccountStore::new(db);

    let mut handles = Vec::new();
    for i in 0..4 {
        for _ in 0..3 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .find_or_create(&format!("user{i}@example.com"), "User")
                    .await
                    .unwrap()
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(store.count().await.unwrap(), 4);
    assert_eq!(store.user_count().await.unwrap(), 4);
}
