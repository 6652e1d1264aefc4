//! Domain login engine for gapps-auth.
//!
//! Logs browsers in with an OpenID 2.0 identity from a Google Apps hosted
//! domain and maps that identity onto a local account:
//!
//! - **Intent classification** of each request (login page, logout page,
//!   anything else)
//! - **Discovery** of the domain's OpenID endpoint, memoized in a
//!   file-backed [`AttributeCache`]
//! - **Redirect** to the provider with an attribute exchange request for
//!   email and name
//! - **Verification** of the provider's callback by direct
//!   `check_authentication`
//! - **Reconciliation** of the verified email with the account store
//! - **Safe return** to the requested page after login
//!
//! # Architecture
//!
//! ```text
//! AuthFlowController
//! ├── RequestIntent       (login / logout / ignore)
//! ├── ProviderConfig      (temp dir, realm, return URL, AttributeCache)
//! ├── IdentityProvider    (trait; GoogleAppsProvider over reqwest)
//! ├── SessionStore        (pending identity, logged-in user; over HostSession)
//! ├── AccountReconciler   (gapps-auth-store AccountStore)
//! └── RedirectGuard       (post-login destination)
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use gapps_auth_engine::{
//!     AuthConfig, AuthFlowController, GoogleAppsProvider, RequestContext, SessionData,
//!     SessionStore, SiteConfig,
//! };
//! use gapps_auth_store::{AccountStore, Database};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let auth = AuthConfig::default();
//! let provider = Arc::new(GoogleAppsProvider::new(&auth)?);
//! let accounts = AccountStore::new(Database::open_and_migrate("data/gapps-auth.db").await?);
//! let controller = AuthFlowController::new(auth, SiteConfig::default(), provider, accounts)?;
//!
//! let ctx = RequestContext::new("wiki.example.com", 80, "/index.php/Special:UserLogin")
//!     .with_title("Special:UserLogin");
//! let mut data = SessionData::new();
//! let mut session = SessionStore::new(&mut data, "GAppsUser");
//! let outcome = controller.handle_login_request(&ctx, &mut session).await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

pub mod attribute_cache;
pub mod config;
pub mod error;
pub mod flow;
pub mod openid;
pub mod provider;
pub mod reconcile;
pub mod redirect;
pub mod request;
pub mod session;
pub mod title;

// Re-export key types at the crate root for convenience.
pub use attribute_cache::AttributeCache;
pub use config::{AuthConfig, DomainSelection, ProviderConfig, SiteConfig};
pub use error::{AuthError, Result};
pub use flow::{AuthFlowController, LoginOutcome};
pub use openid::GoogleAppsProvider;
pub use provider::{
    AttributeRequestSpec, AuthRequest, AuthResponse, AuthStatus, DiscoveredProvider,
    IdentityProvider,
};
pub use reconcile::{AccountReconciler, VerifiedIdentity};
pub use redirect::RedirectGuard;
pub use request::{RequestContext, RequestIntent};
pub use session::{AuthenticatedUser, HostSession, PendingAuthSession, SessionData, SessionStore};
pub use title::PageTitle;
