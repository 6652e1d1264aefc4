//! Configuration loading.
//!
//! Reads `config/gapps-auth.toml` (or the `--config` path), falling back to
//! defaults for anything missing, then applies `GAPPS_AUTH_*` environment
//! overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use gapps_auth_engine::{AuthConfig, DomainSelection, SiteConfig};
use gapps_auth_web::WebConfig;

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "config/gapps-auth.toml";

/// Everything the binary needs, one field per TOML section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `[auth]`: the login flow.
    pub auth: AuthConfig,
    /// `[site]`: page layout of the host site.
    pub site: SiteConfig,
    /// `[server]`: HTTP listener, sessions and database.
    pub server: ServerSettings,
}

/// The `[server]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// SQLite database holding local accounts.
    pub database_path: PathBuf,
    /// Listener and session settings.
    #[serde(flatten)]
    pub web: WebConfig,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/gapps-auth.db"),
            web: WebConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings from `path`, or from [`DEFAULT_CONFIG_PATH`] if it
    /// exists, then apply environment overrides.
    ///
    /// An explicitly given path must exist; the default one may not.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    tracing::debug!("no config file, using defaults");
                    Self::default()
                }
            }
        };
        settings.apply_env(crate::helpers::env_non_empty)?;
        Ok(settings)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Parse settings from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `GAPPS_AUTH_*` overrides, reading variables through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(domains) = lookup("GAPPS_AUTH_DOMAINS") {
            self.auth.domains = DomainSelection::from_list(&domains);
        }
        if let Some(path) = lookup("GAPPS_AUTH_TEMP_PATH") {
            self.auth.temp_path = PathBuf::from(path);
        }
        if let Some(key) = lookup("GAPPS_AUTH_SESSION_KEY") {
            self.auth.session_key = key;
        }
        if let Some(url) = lookup("GAPPS_AUTH_BASE_URL") {
            self.site.base_url = url;
        }
        if let Some(port) = lookup("GAPPS_AUTH_PORT") {
            self.server.web.port = port
                .trim()
                .parse()
                .with_context(|| format!("GAPPS_AUTH_PORT is not a port number: {port:?}"))?;
        }
        if let Some(path) = lookup("GAPPS_AUTH_DATABASE") {
            self.server.database_path = PathBuf::from(path);
        }
        Ok(())
    }
}
