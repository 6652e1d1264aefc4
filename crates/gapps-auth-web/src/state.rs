//! Shared application state for the web server.
//!
//! [`AppState`] is wrapped in an `Arc` and shared across all request
//! handlers. It holds the login controller and the session cache.

use std::sync::Arc;
use std::time::Duration;

use gapps_auth_engine::AuthFlowController;

use crate::WebConfig;
use crate::sessions::SessionCache;

/// Shared state accessible from every Axum handler.
#[derive(Clone)]
pub struct AppState {
    /// The login flow.
    pub controller: Arc<AuthFlowController>,

    /// Server-side browser sessions.
    pub sessions: SessionCache,

    /// Web server configuration.
    pub config: WebConfig,
}

impl AppState {
    /// Build state, sizing the session cache from `config`.
    pub fn new(config: WebConfig, controller: Arc<AuthFlowController>) -> Self {
        let sessions = SessionCache::new(
            config.max_sessions,
            Duration::from_secs(config.session_ttl_secs),
            Duration::from_secs(config.remember_secs()),
        );
        Self {
            controller,
            sessions,
            config,
        }
    }

    /// Name of the engine's session record.
    pub fn session_key(&self) -> &str {
        &self.controller.auth_config().session_key
    }
}
