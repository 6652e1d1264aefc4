//! Web host for gapps-auth.
//!
//! This crate runs the domain login flow behind an Axum server. It includes:
//!
//! - Page routes (`/`, `/index.php?title=...`, `/index.php/<title>`) that
//!   feed every request through the login engine.
//! - A cookie-keyed in-memory session cache, which the engine sees as its
//!   host session.
//! - Mapping of login outcomes and errors onto HTTP responses.

pub mod handler;
pub mod server;
pub mod sessions;
pub mod state;

use serde::{Deserialize, Serialize};

pub use server::WebServer;
pub use sessions::{SESSION_COOKIE, SessionCache};
pub use state::AppState;

/// Web server configuration (`[server]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// The address to bind the HTTP server to.
    pub bind_addr: String,
    /// The port to listen on.
    pub port: u16,
    /// Idle lifetime of a browser session, in seconds.
    pub session_ttl_secs: u64,
    /// Lifetime of a remembered login, in days.
    pub remember_days: u64,
    /// Whether the server is reached over HTTPS (directly or via a proxy).
    pub secure: bool,
    /// Upper bound on concurrently held sessions.
    pub max_sessions: u64,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".into(),
            port: 8080,
            session_ttl_secs: 3600,
            remember_days: 30,
            secure: false,
            max_sessions: 100_000,
        }
    }
}

impl WebConfig {
    /// Remembered-login lifetime in seconds.
    pub fn remember_secs(&self) -> u64 {
        self.remember_days.saturating_mul(86_400)
    }
}
