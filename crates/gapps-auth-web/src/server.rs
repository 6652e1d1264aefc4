//! HTTP listener for the login host.
//!
//! [`WebServer`] wires every page route to the login engine and serves
//! until Ctrl-C.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use gapps_auth_engine::AuthFlowController;
use tower_http::trace::TraceLayer;

use crate::WebConfig;
use crate::handler;
use crate::state::AppState;

/// The gapps-auth web server.
pub struct WebServer {
    config: WebConfig,
    state: Arc<AppState>,
}

impl WebServer {
    /// Create a new web server running `controller` on every page request.
    pub fn new(config: WebConfig, controller: Arc<AuthFlowController>) -> Self {
        let state = Arc::new(AppState::new(config.clone(), controller));
        Self { config, state }
    }

    /// Return the `host:port` string this server will bind to.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.config.bind_addr, self.config.port)
    }

    /// Build the Axum router with all routes registered.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(handler::root))
            .route("/index.php", get(handler::index))
            .route("/index.php/{*title}", get(handler::page))
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&self.state))
    }

    /// Serve until Ctrl-C. In-memory sessions are dropped on exit.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP listener cannot be bound.
    pub async fn start(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = self.addr();
        let router = self.router();

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!(
            addr = %addr,
            session_ttl_secs = self.config.session_ttl_secs,
            remember_days = self.config.remember_days,
            "login host listening"
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => tracing::info!("shutting down login host"),
                    Err(e) => {
                        tracing::warn!(error = %e, "cannot listen for Ctrl-C");
                        std::future::pending::<()>().await;
                    }
                }
            })
            .await?;

        Ok(())
    }
}
