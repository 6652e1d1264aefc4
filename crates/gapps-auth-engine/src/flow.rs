//! The login flow state machine.
//!
//! One call to [`AuthFlowController::handle_login_request`] handles one
//! inbound request:
//!
//! ```text
//! classify ── Logout ──────────────────────────────────────▶ LoggedOut
//!    │      └─ Ignore ──────────────────────────────────────▶ NoAction
//!    ▼ Login{domain}
//! ProviderConfig::prepare (temp dir must be writable)
//!    │
//!    ├─ pending identity in session ─┐
//!    ├─ callback marker ── verify ───┤ (store pending)
//!    └─ otherwise ── discover ───────┼──────────────────────▶ RedirectToProvider
//!                                    ▼
//!                               reconcile ── returnto? ──▶ RedirectToReturnUrl
//!                                    └────── no ─────────▶ AccountLoggedIn
//! ```
//!
//! Every error is terminal for the request. Nothing is retried.

use std::collections::HashMap;
use std::sync::Arc;

use gapps_auth_store::{AccountStore, LocalAccount};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::{AuthConfig, ProviderConfig, SiteConfig};
use crate::error::{AuthError, Result};
use crate::provider::{AttributeRequestSpec, AuthStatus, IdentityProvider};
use crate::reconcile::{AccountReconciler, VerifiedIdentity};
use crate::redirect::RedirectGuard;
use crate::request::{RETURN_TO_PARAM, RequestContext, RequestIntent};
use crate::session::{PendingAuthSession, SessionStore};
use crate::title::ucfirst;

/// What the host should do after the flow ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Not a login or logout request; serve the page normally.
    NoAction,
    /// The logout page was hit and login state was dropped.
    LoggedOut,
    /// Send the browser to the identity provider.
    RedirectToProvider(Url),
    /// Logged in; send the browser to the requested page.
    RedirectToReturnUrl(Url),
    /// Logged in with no return target; serve the page normally.
    AccountLoggedIn(LocalAccount),
}

/// Drives the domain login flow.
pub struct AuthFlowController {
    auth: AuthConfig,
    site: SiteConfig,
    provider: Arc<dyn IdentityProvider>,
    reconciler: AccountReconciler,
    guard: RedirectGuard,
    attributes: AttributeRequestSpec,
}

impl AuthFlowController {
    /// Build a controller. Both configurations are validated here so that
    /// requests never see a half-usable configuration.
    pub fn new(
        auth: AuthConfig,
        site: SiteConfig,
        provider: Arc<dyn IdentityProvider>,
        accounts: AccountStore,
    ) -> Result<Self> {
        auth.validate()?;
        site.validate()?;
        Ok(Self {
            guard: RedirectGuard::new(site.clone()),
            reconciler: AccountReconciler::new(accounts),
            attributes: AttributeRequestSpec::default(),
            auth,
            site,
            provider,
        })
    }

    /// The `[auth]` settings this controller runs with.
    pub fn auth_config(&self) -> &AuthConfig {
        &self.auth
    }

    /// The `[site]` settings this controller runs with.
    pub fn site_config(&self) -> &SiteConfig {
        &self.site
    }

    /// Run the flow for one request.
    #[instrument(skip(self, ctx, session), fields(title = ctx.title.as_deref().unwrap_or("")))]
    pub async fn handle_login_request(
        &self,
        ctx: &RequestContext,
        session: &mut SessionStore<'_>,
    ) -> Result<LoginOutcome> {
        let domain = match RequestIntent::classify(ctx, &self.auth, &self.site) {
            RequestIntent::Logout => {
                session.clear();
                info!("logged out");
                return Ok(LoginOutcome::LoggedOut);
            }
            RequestIntent::Ignore => return Ok(LoginOutcome::NoAction),
            RequestIntent::Login { domain } => domain,
        };

        let provider_config = ProviderConfig::prepare(&self.auth, ctx).await?;

        let identity = if let Some(pending) = session.pending()? {
            debug!(email = %pending.email, "reusing identity verified earlier in this session");
            VerifiedIdentity {
                email: pending.email,
                name: pending.display_name,
            }
        } else if ctx.is_callback() {
            let identity = self.verify_callback(&domain, ctx, &provider_config).await?;
            session.set_pending(&PendingAuthSession {
                email: identity.email.clone(),
                display_name: identity.name.clone(),
            })?;
            identity
        } else {
            let url = self.start_auth(&domain, &provider_config).await?;
            info!(domain = %domain, "redirecting to identity provider");
            return Ok(LoginOutcome::RedirectToProvider(url));
        };

        let account = self.reconciler.reconcile(&identity, session).await?;
        info!(account_id = %account.id, email = %account.email, "logged in");

        match ctx.param(RETURN_TO_PARAM) {
            Some(target) => Ok(LoginOutcome::RedirectToReturnUrl(
                self.guard.safe_return_url(target)?,
            )),
            None => Ok(LoginOutcome::AccountLoggedIn(account)),
        }
    }

    async fn start_auth(&self, domain: &str, config: &ProviderConfig) -> Result<Url> {
        let mut request = self.provider.begin_auth(domain, &config.cache).await?;
        request.attach_attribute_spec(&self.attributes);
        request.redirect_url(&config.return_base_url, &config.return_url)
    }

    async fn verify_callback(
        &self,
        domain: &str,
        ctx: &RequestContext,
        config: &ProviderConfig,
    ) -> Result<VerifiedIdentity> {
        let response = self
            .provider
            .complete_auth(domain, &config.return_url, &ctx.params, &config.cache)
            .await?;

        match response.status {
            AuthStatus::Success => extract_identity(&response.attributes),
            AuthStatus::Cancelled => {
                info!(domain, "user cancelled at provider");
                Err(AuthError::Cancelled)
            }
            AuthStatus::Failed => {
                let reason = response
                    .message
                    .unwrap_or_else(|| "provider response did not verify".to_string());
                warn!(domain, %reason, "verification failed");
                Err(AuthError::VerificationFailed { reason })
            }
            status @ (AuthStatus::SetupNeeded | AuthStatus::Other(_)) => {
                Err(AuthError::Protocol {
                    status: status.to_string(),
                })
            }
        }
    }
}

/// Build the verified identity from returned attribute values.
///
/// The email is required. The name is `First Last`; when both are missing
/// the full name, then the nickname, then the email's local part is used.
pub fn extract_identity(attributes: &HashMap<String, String>) -> Result<VerifiedIdentity> {
    let attr = |name: &str| {
        attributes
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    };

    let email = attr("email").ok_or_else(|| AuthError::VerificationFailed {
        reason: "provider returned no email address".to_string(),
    })?;

    let first = attr("firstname").unwrap_or("");
    let last = attr("lastname").map(ucfirst).unwrap_or_default();
    let joined = ucfirst(format!("{first} {last}").trim());

    let name = if !joined.is_empty() {
        joined
    } else if let Some(other) = attr("fullname").or_else(|| attr("friendly")) {
        other.to_string()
    } else {
        email.split('@').next().unwrap_or(email).to_string()
    };

    Ok(VerifiedIdentity {
        email: email.to_string(),
        name,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
