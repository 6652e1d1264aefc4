//! The identity provider capability and the authentication request.
//!
//! Discovery and response verification are delegated to an
//! [`IdentityProvider`]; the flow treats it as a black box. What the flow
//! does own is the outgoing request: which attributes to ask for (attribute
//! exchange) and how the redirect URL to the provider is put together.
//!
//! # Redirect anatomy
//!
//! ```text
//! <op_endpoint>?openid.ns=http://specs.openid.net/auth/2.0
//!              &openid.mode=checkid_setup
//!              &openid.claimed_id=...&openid.identity=...
//!              &openid.return_to=<return_url>?gapps_nonce=<nonce>
//!              &openid.realm=<return_base>
//!              &openid.ns.ext1=http://openid.net/srv/ax/1.0
//!              &openid.ext1.mode=fetch_request
//!              &openid.ext1.type.<alias>=<type uri> ...
//! ```

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::attribute_cache::AttributeCache;
use crate::error::{AuthError, Result};

/// Query parameter present only on the browser's return trip from the provider.
pub const CALLBACK_MARKER: &str = "gapps_nonce";

/// OpenID 2.0 protocol namespace.
pub const OPENID_NS: &str = "http://specs.openid.net/auth/2.0";

/// Claimed identifier asking the provider to pick the user's identity.
pub const IDENTIFIER_SELECT: &str = "http://specs.openid.net/auth/2.0/identifier_select";

/// Attribute exchange 1.0 namespace.
pub const AX_NS: &str = "http://openid.net/srv/ax/1.0";

/// Alias the outgoing request binds the AX namespace to.
const AX_ALIAS: &str = "ext1";

const NONCE_RANDOM_BYTES: usize = 8;

// ---------------------------------------------------------------------------
// Attribute exchange request
// ---------------------------------------------------------------------------

/// One attribute the flow asks the provider for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeInfo {
    /// Attribute type URI.
    pub type_uri: String,
    /// How many values may be returned.
    pub count: u32,
    /// Whether the provider must return it.
    pub required: bool,
    /// Local alias the value comes back under.
    pub alias: String,
}

impl AttributeInfo {
    fn new(type_uri: &str, count: u32, required: bool, alias: &str) -> Self {
        Self {
            type_uri: type_uri.to_string(),
            count,
            required,
            alias: alias.to_string(),
        }
    }
}

/// The ordered set of attributes requested during authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeRequestSpec {
    attributes: Vec<AttributeInfo>,
}

impl AttributeRequestSpec {
    /// Build a spec from explicit entries.
    pub fn new(attributes: Vec<AttributeInfo>) -> Self {
        Self { attributes }
    }

    /// The entries, in request order.
    pub fn attributes(&self) -> &[AttributeInfo] {
        &self.attributes
    }

    fn aliases(&self, required: bool) -> Vec<&str> {
        self.attributes
            .iter()
            .filter(|a| a.required == required)
            .map(|a| a.alias.as_str())
            .collect()
    }
}

impl Default for AttributeRequestSpec {
    /// Email and name are required; the profile attributes are optional.
    fn default() -> Self {
        Self::new(vec![
            AttributeInfo::new("http://axschema.org/contact/email", 2, true, "email"),
            AttributeInfo::new("http://axschema.org/namePerson/first", 1, true, "firstname"),
            AttributeInfo::new("http://axschema.org/namePerson/last", 1, true, "lastname"),
            AttributeInfo::new("http://axschema.org/namePerson/friendly", 1, false, "friendly"),
            AttributeInfo::new("http://axschema.org/namePerson", 1, false, "fullname"),
            AttributeInfo::new("http://axschema.org/birthDate", 1, false, "dob"),
            AttributeInfo::new("http://axschema.org/person/gender", 1, false, "gender"),
            AttributeInfo::new("http://axschema.org/contact/postalCode/home", 1, false, "postcode"),
            AttributeInfo::new("http://axschema.org/contact/country/home", 1, false, "country"),
            AttributeInfo::new("http://axschema.org/pref/language", 1, false, "language"),
            AttributeInfo::new("http://axschema.org/pref/timezone", 1, false, "timezone"),
        ])
    }
}

// ---------------------------------------------------------------------------
// Discovery result and authentication request
// ---------------------------------------------------------------------------

/// Where a domain's users authenticate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredProvider {
    /// Domain this endpoint was discovered for.
    pub domain: String,
    /// The OpenID provider endpoint URL.
    pub op_endpoint: String,
    /// Claimed identifier to send.
    pub claimed_id: String,
    /// OP-local identifier to send.
    pub local_id: String,
}

/// An authentication request ready to be turned into a redirect.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    provider: DiscoveredProvider,
    attributes: Option<AttributeRequestSpec>,
}

impl AuthRequest {
    /// Start a request against a discovered provider.
    pub fn new(provider: DiscoveredProvider) -> Self {
        Self {
            provider,
            attributes: None,
        }
    }

    /// The provider this request targets.
    pub fn provider(&self) -> &DiscoveredProvider {
        &self.provider
    }

    /// Ask for the attributes in `spec` as part of the handshake.
    pub fn attach_attribute_spec(&mut self, spec: &AttributeRequestSpec) {
        self.attributes = Some(spec.clone());
    }

    /// Compute the URL that sends the browser to the provider.
    ///
    /// `return_base` is the realm; `return_url` must lie inside it. The
    /// callback marker is appended to `return_url` to form `openid.return_to`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::RedirectBuild`] if any URL is unparsable, the
    /// return URL is outside the realm, or no nonce could be generated.
    pub fn redirect_url(&self, return_base: &str, return_url: &str) -> Result<Url> {
        let build_err = |reason: String| AuthError::RedirectBuild { reason };

        let realm = Url::parse(return_base)
            .map_err(|e| build_err(format!("invalid realm {return_base:?}: {e}")))?;
        let mut return_to = Url::parse(return_url)
            .map_err(|e| build_err(format!("invalid return URL {return_url:?}: {e}")))?;

        if !within_realm(&realm, &return_to) {
            return Err(build_err(format!(
                "return URL {return_url} is outside realm {return_base}"
            )));
        }

        // Drop leftovers from an earlier round trip before adding our marker.
        let kept: Vec<(String, String)> = return_to
            .query_pairs()
            .filter(|(k, _)| k != CALLBACK_MARKER && !k.starts_with("openid."))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        return_to.set_query(None);
        {
            let mut pairs = return_to.query_pairs_mut();
            for (k, v) in &kept {
                pairs.append_pair(k, v);
            }
            pairs.append_pair(CALLBACK_MARKER, &generate_nonce()?);
        }

        let mut url = Url::parse(&self.provider.op_endpoint).map_err(|e| {
            build_err(format!(
                "invalid provider endpoint {:?}: {e}",
                self.provider.op_endpoint
            ))
        })?;

        {
            let mut params = url.query_pairs_mut();
            params.append_pair("openid.ns", OPENID_NS);
            params.append_pair("openid.mode", "checkid_setup");
            params.append_pair("openid.claimed_id", &self.provider.claimed_id);
            params.append_pair("openid.identity", &self.provider.local_id);
            params.append_pair("openid.return_to", return_to.as_str());
            params.append_pair("openid.realm", realm.as_str());

            if let Some(spec) = &self.attributes {
                params.append_pair(&format!("openid.ns.{AX_ALIAS}"), AX_NS);
                params.append_pair(&format!("openid.{AX_ALIAS}.mode"), "fetch_request");
                for attr in spec.attributes() {
                    params.append_pair(
                        &format!("openid.{AX_ALIAS}.type.{}", attr.alias),
                        &attr.type_uri,
                    );
                    if attr.count != 1 {
                        params.append_pair(
                            &format!("openid.{AX_ALIAS}.count.{}", attr.alias),
                            &attr.count.to_string(),
                        );
                    }
                }
                let required = spec.aliases(true);
                if !required.is_empty() {
                    params.append_pair(&format!("openid.{AX_ALIAS}.required"), &required.join(","));
                }
                let optional = spec.aliases(false);
                if !optional.is_empty() {
                    params.append_pair(
                        &format!("openid.{AX_ALIAS}.if_available"),
                        &optional.join(","),
                    );
                }
            }
        }

        Ok(url)
    }
}

/// Whether `url` matches the realm's scheme, host, port and path prefix.
pub(crate) fn within_realm(realm: &Url, url: &Url) -> bool {
    realm.scheme() == url.scheme()
        && realm.host_str() == url.host_str()
        && realm.port_or_known_default() == url.port_or_known_default()
        && url.path().starts_with(realm.path().trim_end_matches('/'))
}

/// `<UTC timestamp><random>` in the OpenID response-nonce style.
fn generate_nonce() -> Result<String> {
    let mut bytes = [0u8; NONCE_RANDOM_BYTES];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| AuthError::RedirectBuild {
            reason: "failed to generate nonce: CSPRNG error".to_string(),
        })?;
    Ok(format!(
        "{}{}",
        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
        URL_SAFE_NO_PAD.encode(bytes)
    ))
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Outcome of completing an authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStatus {
    /// The response verified.
    Success,
    /// The user declined at the provider.
    Cancelled,
    /// The response did not verify, or the provider reported an error.
    Failed,
    /// The provider needs interaction that an immediate request cannot do.
    SetupNeeded,
    /// A mode the flow does not know.
    Other(String),
}

impl fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Cancelled => f.write_str("cancel"),
            Self::Failed => f.write_str("failure"),
            Self::SetupNeeded => f.write_str("setup_needed"),
            Self::Other(mode) => f.write_str(mode),
        }
    }
}

/// What the provider capability reports for a callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResponse {
    /// Verification outcome.
    pub status: AuthStatus,
    /// Returned attribute values keyed by alias.
    pub attributes: HashMap<String, String>,
    /// Provider or verifier message, for failures.
    pub message: Option<String>,
}

impl AuthResponse {
    /// A verified response carrying `attributes`.
    pub fn success(attributes: HashMap<String, String>) -> Self {
        Self {
            status: AuthStatus::Success,
            attributes,
            message: None,
        }
    }

    /// The user cancelled.
    pub fn cancelled() -> Self {
        Self::with_status(AuthStatus::Cancelled, None)
    }

    /// Verification failed for `message`.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::with_status(AuthStatus::Failed, Some(message.into()))
    }

    /// A response with no attributes.
    pub fn with_status(status: AuthStatus, message: Option<String>) -> Self {
        Self {
            status,
            attributes: HashMap::new(),
            message,
        }
    }
}

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// Discovery and verification, delegated to a trusted implementation.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Discover `domain`'s provider and start an authentication request.
    async fn begin_auth(&self, domain: &str, cache: &AttributeCache) -> Result<AuthRequest>;

    /// Verify the provider's callback for `domain`.
    ///
    /// `return_url` is the URL the callback arrived on; `params` are its
    /// query parameters.
    async fn complete_auth(
        &self,
        domain: &str,
        return_url: &str,
        params: &HashMap<String, String>,
        cache: &AttributeCache,
    ) -> Result<AuthResponse>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
