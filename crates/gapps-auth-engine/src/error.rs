//! Error types for the login engine crate.
//!
//! All engine operations surface errors through [`AuthError`]. Every
//! variant is terminal for the request that produced it: nothing is retried
//! and the only recovery path is the user starting the login again.

/// Unified error type for the gapps-auth login engine.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The temporary storage directory is missing, cannot be created, or is
    /// not writable; or the configuration is otherwise unusable.
    #[error("invalid configuration: {reason}")]
    Config {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// The user declined the authentication at the provider.
    #[error("verification cancelled")]
    Cancelled,

    /// The provider response did not verify.
    #[error("authentication failed: {reason}")]
    VerificationFailed {
        /// Internal diagnostic. Never shown to the browser.
        reason: String,
    },

    /// The provider returned a status the flow does not understand.
    #[error("unexpected provider status: {status}")]
    Protocol {
        /// The status reported by the provider.
        status: String,
    },

    /// The provider redirect URL could not be computed.
    #[error("could not build provider redirect: {reason}")]
    RedirectBuild {
        /// Why the URL could not be built.
        reason: String,
    },

    /// The domain could not be resolved to an authentication endpoint.
    #[error("discovery failed for {domain}: {reason}")]
    Discovery {
        /// The domain that was being discovered.
        domain: String,
        /// Why discovery failed.
        reason: String,
    },

    /// A session record could not be read or written.
    #[error("session error: {reason}")]
    Session {
        /// Details about the session failure.
        reason: String,
    },

    /// The account store failed during reconciliation.
    #[error("account store error: {0}")]
    Store(#[from] gapps_auth_store::StoreError),

    /// An HTTP request to the identity provider failed.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error (e.g. from the attribute cache file).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing error.
    #[error("url parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl AuthError {
    /// The message that may be shown to the browser.
    ///
    /// Verification and store failures collapse to generic text so that
    /// internal diagnostics stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::Config { reason } => format!("Login is misconfigured: {reason}"),
            Self::Cancelled => "Verification cancelled.".to_string(),
            Self::VerificationFailed { .. } => "Authentication failed.".to_string(),
            Self::Protocol { .. } => "The identity provider returned an unexpected response.".to_string(),
            Self::RedirectBuild { .. } => "Could not redirect to the identity provider.".to_string(),
            Self::Discovery { domain, .. } => {
                format!("Could not find a login service for {domain}.")
            }
            _ => "Login failed. Please try again.".to_string(),
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, AuthError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
