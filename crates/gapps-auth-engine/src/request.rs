//! The slice of an inbound HTTP request the login flow reads, and the
//! intent classification computed from it.

use std::collections::HashMap;

use crate::config::{AuthConfig, SiteConfig};
use crate::provider::CALLBACK_MARKER;
use crate::title::PageTitle;

/// Query parameter selecting the login domain when several are configured.
pub const DOMAIN_PARAM: &str = "gapps_domain";

/// Query parameter naming the page to return to after login.
pub const RETURN_TO_PARAM: &str = "returnto";

/// Host-independent view of one inbound request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Requested page title, as sent by the browser.
    pub title: Option<String>,
    /// Decoded query parameters. Repeated names keep the last value.
    pub params: HashMap<String, String>,
    /// Whether the request arrived over HTTPS.
    pub secure: bool,
    /// Host name the browser used.
    pub server_name: String,
    /// Port the browser used.
    pub server_port: u16,
    /// Path and query exactly as requested.
    pub request_uri: String,
}

impl RequestContext {
    /// A plain-HTTP request context with no title or parameters.
    pub fn new(server_name: impl Into<String>, server_port: u16, request_uri: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            server_port,
            request_uri: request_uri.into(),
            ..Self::default()
        }
    }

    /// Set the requested title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Add a query parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Mark the request as HTTPS.
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// A query parameter, treating empty values as absent.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Whether this is the browser's return trip from the provider.
    pub fn is_callback(&self) -> bool {
        self.param(CALLBACK_MARKER).is_some()
    }

    /// `scheme://host[:port]`, leaving out the scheme's default port.
    pub fn return_base_url(&self) -> String {
        let (scheme, default_port) = if self.secure {
            ("https", 443)
        } else {
            ("http", 80)
        };
        if self.server_port == default_port || self.server_port == 0 {
            format!("{scheme}://{}", self.server_name)
        } else {
            format!("{scheme}://{}:{}", self.server_name, self.server_port)
        }
    }

    /// The full URL of this request.
    pub fn return_url(&self) -> String {
        let uri = if self.request_uri.starts_with('/') {
            self.request_uri.clone()
        } else {
            format!("/{}", self.request_uri)
        };
        format!("{}{uri}", self.return_base_url())
    }
}

/// What the flow should do with a request. Computed once per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestIntent {
    /// The logout page: drop any login state.
    Logout,
    /// The login page, with a resolvable domain.
    Login {
        /// Domain to authenticate against.
        domain: String,
    },
    /// Anything else, including the login page without a usable domain.
    Ignore,
}

impl RequestIntent {
    /// Classify a request against the configured login and logout pages.
    pub fn classify(ctx: &RequestContext, auth: &AuthConfig, site: &SiteConfig) -> Self {
        let Some(title) = ctx.title.as_deref().and_then(PageTitle::parse) else {
            return Self::Ignore;
        };

        let is_page = |configured: &str| {
            PageTitle::parse(configured).is_some_and(|page| page.matches(&title))
        };

        if is_page(&site.logout_page) {
            return Self::Logout;
        }
        if is_page(&site.login_page) {
            return match auth.domains.resolve(ctx.param(DOMAIN_PARAM)) {
                Some(domain) => Self::Login { domain },
                None => Self::Ignore,
            };
        }
        Self::Ignore
    }
}
