//! CLI entry point for gapps-auth.
//!
//! This binary provides the `gapps-auth` command with subcommands for
//! serving the login flow, checking configuration, and listing accounts.

mod helpers;
mod settings;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use gapps_auth_engine::{ProviderConfig, RequestContext};
use gapps_auth_web::WebServer;

use crate::helpers::{build_controller, init_tracing, open_accounts};
use crate::settings::Settings;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// gapps-auth: log in with a Google Apps domain account.
#[derive(Parser)]
#[command(
    name = "gapps-auth",
    version,
    about = "Google Apps domain login for wiki-style sites",
    long_about = "Authenticates users through their Google Apps domain's OpenID provider \
                  and maps them onto local accounts."
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Default log level when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the web host.
    Serve,

    /// Validate the configuration and the temporary directory.
    CheckConfig,

    /// List local accounts.
    Accounts {
        /// Maximum number of accounts to show.
        #[arg(long, default_value_t = 50)]
        limit: i64,

        /// Number of accounts to skip.
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve => cmd_serve(settings).await,
        Commands::CheckConfig => cmd_check_config(settings).await,
        Commands::Accounts { limit, offset } => cmd_accounts(settings, limit, offset).await,
    }
}

// ---------------------------------------------------------------------------
// Subcommand: serve
// ---------------------------------------------------------------------------

async fn cmd_serve(settings: Settings) -> Result<()> {
    info!("starting gapps-auth");

    let accounts = open_accounts(&settings).await?;
    let controller = build_controller(&settings, accounts)?;
    info!(
        domains = ?settings.auth.domains.domains(),
        temp_path = %settings.auth.temp_path.display(),
        "login flow ready"
    );

    WebServer::new(settings.server.web.clone(), Arc::new(controller))
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("web server failed: {e}"))
}

// ---------------------------------------------------------------------------
// Subcommand: check-config
// ---------------------------------------------------------------------------

async fn cmd_check_config(settings: Settings) -> Result<()> {
    settings.auth.validate().context("[auth] is invalid")?;
    settings.site.validate().context("[site] is invalid")?;

    let web = &settings.server.web;
    let probe = RequestContext::new(web.bind_addr.clone(), web.port, "/");
    let provider = ProviderConfig::prepare(&settings.auth, &probe)
        .await
        .context("temporary directory is unusable")?;

    println!("configuration OK");
    println!("  domains:       {}", settings.auth.domains.domains().join(", "));
    println!("  temp path:     {}", provider.temp_storage_path.display());
    println!("  session key:   {}", settings.auth.session_key);
    println!("  site:          {}", settings.site.base_url);
    println!("  listen:        {}:{}", web.bind_addr, web.port);
    println!("  database:      {}", settings.server.database_path.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: accounts
// ---------------------------------------------------------------------------

async fn cmd_accounts(settings: Settings, limit: i64, offset: i64) -> Result<()> {
    let accounts = open_accounts(&settings).await?;
    let list = accounts
        .list(limit, offset)
        .await
        .context("failed to list accounts")?;
    let total = accounts.count().await?;
    let users = accounts.user_count().await?;

    if list.is_empty() {
        println!("no accounts");
    }
    for account in &list {
        let created = chrono::DateTime::from_timestamp(account.created_at, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!(
            "{:<36}  {:<32}  {:<24}  {}{}",
            account.id,
            account.email,
            account.display_name,
            created,
            if account.remember_login { "  (remembered)" } else { "" }
        );
    }
    println!();
    println!("{total} account(s); users statistic: {users}");
    Ok(())
}
