//! Process-wide login configuration and per-request provider configuration.
//!
//! [`AuthConfig`] and [`SiteConfig`] are built once at startup (usually
//! deserialized from the `[auth]` and `[site]` TOML sections) and handed to
//! the [`AuthFlowController`](crate::flow::AuthFlowController). Nothing in
//! the flow reads ambient globals.
//!
//! [`ProviderConfig`] is built fresh for every login request from the
//! request context, and is where the temporary storage directory gets
//! created and checked.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::attribute_cache::AttributeCache;
use crate::error::{AuthError, Result};
use crate::request::RequestContext;
use crate::title::PageTitle;

/// Google's site XRDS discovery document for hosted domains.
pub const DEFAULT_DISCOVERY_URL: &str = "https://www.google.com/accounts/o8/site-xrds?hd={domain}";

// ---------------------------------------------------------------------------
// Domains
// ---------------------------------------------------------------------------

/// The domain(s) users may log in with.
///
/// Deserializes from either a single TOML string or an array of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DomainSelection {
    /// Exactly one domain; requests never choose.
    Single(String),
    /// The request picks one of these via the domain selector parameter.
    Choice(Vec<String>),
}

impl DomainSelection {
    /// Parse a comma separated list; one entry yields [`Single`](Self::Single).
    pub fn from_list(list: &str) -> Self {
        let mut domains: Vec<String> = list
            .split(',')
            .map(|d| d.trim().to_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        if domains.len() == 1 {
            Self::Single(domains.remove(0))
        } else {
            Self::Choice(domains)
        }
    }

    /// All configured domains.
    pub fn domains(&self) -> Vec<&str> {
        match self {
            Self::Single(domain) => vec![domain.as_str()],
            Self::Choice(domains) => domains.iter().map(String::as_str).collect(),
        }
    }

    /// Resolve the domain to authenticate against.
    ///
    /// A configured single domain always wins over the request parameter.
    /// With a list, the requested domain must be one of its entries.
    pub fn resolve(&self, requested: Option<&str>) -> Option<String> {
        match self {
            Self::Single(domain) => Some(domain.trim().to_lowercase()),
            Self::Choice(domains) => {
                let requested = requested?.trim();
                domains
                    .iter()
                    .find(|d| d.trim().eq_ignore_ascii_case(requested))
                    .map(|d| d.trim().to_lowercase())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// AuthConfig
// ---------------------------------------------------------------------------

/// Settings for the login flow itself (`[auth]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Domain(s) accepted for login.
    pub domains: DomainSelection,

    /// Directory for the discovery cache. Created on demand.
    pub temp_path: PathBuf,

    /// Name of the session record that holds the pending authentication.
    pub session_key: String,

    /// Discovery document URL; `{domain}` is replaced by the login domain.
    pub discovery_url: String,

    /// How long a discovered endpoint stays in the attribute cache.
    pub discovery_ttl_secs: u64,

    /// Timeout for each HTTP call to the identity provider.
    pub http_timeout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            domains: DomainSelection::Single("gmail.com".to_string()),
            temp_path: PathBuf::from(".tmp"),
            session_key: "GAppsUser".to_string(),
            discovery_url: DEFAULT_DISCOVERY_URL.to_string(),
            discovery_ttl_secs: 86_400,
            http_timeout_secs: 10,
        }
    }
}

impl AuthConfig {
    /// Reject configurations the flow cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| {
            Err(AuthError::Config {
                reason: reason.to_string(),
            })
        };

        let domains = self.domains.domains();
        if domains.is_empty() || domains.iter().any(|d| d.trim().is_empty()) {
            return invalid("at least one non-empty login domain is required");
        }
        if self.session_key.trim().is_empty() {
            return invalid("session_key must not be empty");
        }
        if !self.discovery_url.contains("{domain}") {
            return invalid("discovery_url must contain a {domain} placeholder");
        }
        if self.temp_path.as_os_str().is_empty() {
            return invalid("temp_path must not be empty");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SiteConfig
// ---------------------------------------------------------------------------

/// Where the host site's pages live (`[site]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Public base URL of the site, e.g. `https://wiki.example.com`.
    pub base_url: String,

    /// Article path template; `$1` is replaced by the page title.
    pub article_path: String,

    /// Title of the main page.
    pub main_page: String,

    /// Title of the page that starts the login flow.
    pub login_page: String,

    /// Title of the page that logs the user out.
    pub logout_page: String,

    /// Namespaces that are never valid post-login destinations.
    pub reserved_namespaces: Vec<String>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            article_path: "/index.php/$1".to_string(),
            main_page: "Main_Page".to_string(),
            login_page: "Special:UserLogin".to_string(),
            logout_page: "Special:UserLogout".to_string(),
            reserved_namespaces: vec!["Special".to_string(), "MediaWiki".to_string()],
        }
    }
}

impl SiteConfig {
    /// Reject configurations that cannot produce page URLs.
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.base_url).map_err(|e| AuthError::Config {
            reason: format!("site base_url {:?} is not a URL: {e}", self.base_url),
        })?;
        if !self.article_path.contains("$1") {
            return Err(AuthError::Config {
                reason: "article_path must contain a $1 placeholder".to_string(),
            });
        }
        for (name, title) in [
            ("main_page", &self.main_page),
            ("login_page", &self.login_page),
            ("logout_page", &self.logout_page),
        ] {
            if PageTitle::parse(title).is_none() {
                return Err(AuthError::Config {
                    reason: format!("{name} {title:?} is not a valid page title"),
                });
            }
        }
        Ok(())
    }

    /// Full URL of the page with the given title.
    pub fn article_url(&self, title: &PageTitle) -> Result<Url> {
        let base = Url::parse(&self.base_url)?;
        let encoded = title.to_string().replace('%', "%25").replace('?', "%3F");
        let path = self.article_path.replace("$1", &encoded);
        Ok(base.join(&path)?)
    }
}

// ---------------------------------------------------------------------------
// ProviderConfig
// ---------------------------------------------------------------------------

/// Per-request provider settings.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Existing, writable directory for provider state.
    pub temp_storage_path: PathBuf,
    /// `scheme://host[:port]` of this request; the OpenID realm.
    pub return_base_url: String,
    /// The full URL of this request; where the provider sends the browser back.
    pub return_url: String,
    /// Discovery cache living in `temp_storage_path`.
    pub cache: AttributeCache,
}

impl ProviderConfig {
    /// Build the provider configuration for one request.
    ///
    /// Creates the temporary storage directory if needed and verifies it
    /// is writable. Either failure is an [`AuthError::Config`] and must
    /// abort the request before any discovery happens.
    pub async fn prepare(auth: &AuthConfig, ctx: &RequestContext) -> Result<Self> {
        let dir = auth.temp_path.clone();
        ensure_writable_dir(&dir).await?;

        Ok(Self {
            cache: AttributeCache::new(&dir),
            temp_storage_path: dir,
            return_base_url: ctx.return_base_url(),
            return_url: ctx.return_url(),
        })
    }
}

async fn ensure_writable_dir(dir: &Path) -> Result<()> {
    let exists = tokio::fs::try_exists(dir)
        .await
        .map_err(|e| AuthError::Config {
            reason: format!("could not inspect {}: {e}", dir.display()),
        })?;
    if !exists {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| AuthError::Config {
                reason: format!("could not create temporary directory {}: {e}", dir.display()),
            })?;
        tracing::info!(path = %dir.display(), "created temporary directory");
    }

    let metadata = tokio::fs::metadata(dir).await.map_err(|e| AuthError::Config {
        reason: format!("could not inspect {}: {e}", dir.display()),
    })?;
    if !metadata.is_dir() {
        return Err(AuthError::Config {
            reason: format!("{} is not a directory", dir.display()),
        });
    }

    // Permission bits lie for root and ACLs; actually write a file.
    let probe = dir.join(format!(".write-probe-{}", std::process::id()));
    tokio::fs::write(&probe, b"")
        .await
        .map_err(|e| AuthError::Config {
            reason: format!("could not write to {}: {e}", dir.display()),
        })?;
    if let Err(e) = tokio::fs::remove_file(&probe).await {
        tracing::warn!(path = %probe.display(), error = %e, "failed to remove write probe");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
