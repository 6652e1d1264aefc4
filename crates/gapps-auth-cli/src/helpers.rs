//! Shared helper functions used across CLI subcommands.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use gapps_auth_engine::{AuthFlowController, GoogleAppsProvider};
use gapps_auth_store::{AccountStore, Database};

use crate::settings::Settings;

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with the given default log level.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Open the account database, creating and migrating it as needed.
pub async fn open_accounts(settings: &Settings) -> Result<AccountStore> {
    let path = settings.server.database_path.clone();
    let db = Database::open_and_migrate(path.clone())
        .await
        .with_context(|| format!("failed to open database {}", path.display()))?;
    tracing::info!(path = %path.display(), "store initialized");
    Ok(AccountStore::new(db))
}

/// Build the login controller from validated settings.
pub fn build_controller(settings: &Settings, accounts: AccountStore) -> Result<AuthFlowController> {
    let provider = GoogleAppsProvider::new(&settings.auth).context("failed to build HTTP client")?;
    AuthFlowController::new(
        settings.auth.clone(),
        settings.site.clone(),
        Arc::new(provider),
        accounts,
    )
    .context("invalid configuration")
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Return the value of an environment variable if it is set and non-empty.
pub fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
