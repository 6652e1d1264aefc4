//! OpenID 2.0 provider for Google Apps hosted domains.
//!
//! Discovery fetches the domain's site XRDS document and picks the OP
//! endpoint from it. Verification is direct: the positive assertion is
//! replayed to the OP with `openid.mode=check_authentication` and accepted
//! only on `is_valid:true`. No associations are kept, so there is no shared
//! secret to store or expire.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::attribute_cache::AttributeCache;
use crate::config::AuthConfig;
use crate::error::{AuthError, Result};
use crate::provider::{
    AX_NS, AttributeRequestSpec, AuthRequest, AuthResponse, AuthStatus, DiscoveredProvider,
    IDENTIFIER_SELECT, IdentityProvider, OPENID_NS,
};

/// Service type of an OP endpoint that selects the identifier itself.
pub const SERVER_TYPE: &str = "http://specs.openid.net/auth/2.0/server";

/// Service type of an endpoint for a specific claimed identifier.
pub const SIGNON_TYPE: &str = "http://specs.openid.net/auth/2.0/signon";

const USER_AGENT: &str = concat!("gapps-auth/", env!("CARGO_PKG_VERSION"));

/// A discovered endpoint and when it stops being trusted.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedEndpoint {
    provider: DiscoveredProvider,
    expires_at: i64,
}

fn cache_key(domain: &str) -> String {
    format!("discovery:{domain}")
}

// ---------------------------------------------------------------------------
// XRDS parsing
// ---------------------------------------------------------------------------

/// Precompiled patterns for the small subset of XRDS the provider reads.
#[derive(Debug, Clone)]
struct XrdsPatterns {
    service: Regex,
    priority: Regex,
    kind: Regex,
    uri: Regex,
    local_id: Regex,
}

impl XrdsPatterns {
    fn compile() -> Result<Self> {
        let build = |pattern: &str| {
            Regex::new(pattern).map_err(|e| AuthError::Config {
                reason: format!("invalid XRDS pattern {pattern:?}: {e}"),
            })
        };
        Ok(Self {
            service: build(r"(?is)<(?:\w+:)?Service\b([^>]*)>(.*?)</(?:\w+:)?Service>")?,
            priority: build(r#"(?i)priority\s*=\s*["'](\d+)["']"#)?,
            kind: build(r"(?is)<(?:\w+:)?Type\b[^>]*>\s*(.*?)\s*</(?:\w+:)?Type>")?,
            uri: build(r"(?is)<(?:\w+:)?URI\b[^>]*>\s*(.*?)\s*</(?:\w+:)?URI>")?,
            local_id: build(
                r"(?is)<(?:\w+:)?(?:LocalID|Delegate)\b[^>]*>\s*(.*?)\s*</(?:\w+:)?(?:LocalID|Delegate)>",
            )?,
        })
    }

    /// Pick the OP endpoint from an XRDS document.
    ///
    /// Server services beat signon services; within a kind the lowest
    /// priority number wins.
    fn parse(&self, domain: &str, body: &str) -> Option<DiscoveredProvider> {
        let mut candidates: Vec<(u8, u32, DiscoveredProvider)> = Vec::new();

        for service in self.service.captures_iter(body) {
            let attrs = service.get(1).map_or("", |m| m.as_str());
            let inner = service.get(2).map_or("", |m| m.as_str());

            let types: Vec<String> = self
                .kind
                .captures_iter(inner)
                .filter_map(|c| c.get(1).map(|m| xml_unescape(m.as_str())))
                .collect();
            let rank = if types.iter().any(|t| t == SERVER_TYPE) {
                0
            } else if types.iter().any(|t| t == SIGNON_TYPE) {
                1
            } else {
                continue;
            };

            let Some(uri) = self
                .uri
                .captures(inner)
                .and_then(|c| c.get(1))
                .map(|m| xml_unescape(m.as_str()))
            else {
                continue;
            };
            let priority = self
                .priority
                .captures(attrs)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(u32::MAX);

            let (claimed_id, local_id) = if rank == 0 {
                (IDENTIFIER_SELECT.to_string(), IDENTIFIER_SELECT.to_string())
            } else {
                let local = self
                    .local_id
                    .captures(inner)
                    .and_then(|c| c.get(1))
                    .map(|m| xml_unescape(m.as_str()))
                    .unwrap_or_else(|| IDENTIFIER_SELECT.to_string());
                (local.clone(), local)
            };

            candidates.push((
                rank,
                priority,
                DiscoveredProvider {
                    domain: domain.to_string(),
                    op_endpoint: uri,
                    claimed_id,
                    local_id,
                },
            ));
        }

        candidates.sort_by_key(|(rank, priority, _)| (*rank, *priority));
        candidates.into_iter().next().map(|(_, _, provider)| provider)
    }
}

fn xml_unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

/// Parse an OpenID key-value form body (`key:value` per line).
pub fn parse_key_value_form(body: &str) -> HashMap<String, String> {
    body.lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

/// Keys covered by the assertion signature, as full `openid.*` names.
///
/// `openid.signed` lists them without the `openid.` prefix.
pub fn signed_keys(params: &HashMap<String, String>) -> HashSet<String> {
    params
        .get("openid.signed")
        .map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(|k| format!("openid.{k}"))
                .collect()
        })
        .unwrap_or_default()
}

/// Pull signed attribute exchange values out of a positive assertion.
///
/// The provider picks its own alias for the AX namespace and may rename
/// attribute aliases, so values are matched back to `spec` by type URI.
/// Only attributes whose namespace, type, count and value keys are all in
/// `openid.signed` are returned; anything else is dropped. Multi-valued
/// attributes contribute their first value.
///
/// Fails when more than one alias declares the AX namespace.
pub fn extract_ax_attributes(
    params: &HashMap<String, String>,
    spec: &AttributeRequestSpec,
) -> std::result::Result<HashMap<String, String>, String> {
    let mut attributes = HashMap::new();

    let mut ns_aliases: Vec<&str> = params
        .iter()
        .filter(|(_, v)| v.as_str() == AX_NS)
        .filter_map(|(k, _)| k.strip_prefix("openid.ns."))
        .collect();
    ns_aliases.sort_unstable();
    let ns_alias = match ns_aliases.as_slice() {
        [] => return Ok(attributes),
        [alias] => *alias,
        several => {
            return Err(format!(
                "attribute exchange declared under several aliases: {}",
                several.join(", ")
            ));
        }
    };

    let signed = signed_keys(params);
    if !signed.contains(&format!("openid.ns.{ns_alias}")) {
        warn!(alias = ns_alias, "attribute exchange namespace is unsigned; ignoring attributes");
        return Ok(attributes);
    }

    // Sorted so that duplicate type URIs resolve the same way every time.
    let type_prefix = format!("openid.{ns_alias}.type.");
    let types: BTreeMap<&str, &str> = params
        .iter()
        .filter(|(k, _)| signed.contains(k.as_str()))
        .filter_map(|(k, v)| Some((k.strip_prefix(&type_prefix)?, v.as_str())))
        .collect();

    for ours in spec.attributes() {
        let Some((their_alias, _)) = types.iter().find(|(_, uri)| **uri == ours.type_uri) else {
            continue;
        };

        let count_key = format!("openid.{ns_alias}.count.{their_alias}");
        let value_key = if params.contains_key(&count_key) {
            if !signed.contains(&count_key) {
                debug!(attribute = %ours.alias, "unsigned attribute count ignored");
                continue;
            }
            format!("openid.{ns_alias}.value.{their_alias}.1")
        } else {
            format!("openid.{ns_alias}.value.{their_alias}")
        };
        if !signed.contains(&value_key) {
            debug!(attribute = %ours.alias, "unsigned attribute value ignored");
            continue;
        }
        if let Some(value) = params.get(&value_key).filter(|v| !v.is_empty()) {
            attributes.insert(ours.alias.clone(), value.clone());
        }
    }

    Ok(attributes)
}

/// Whether the asserted `openid.return_to` matches the URL the callback
/// actually arrived on.
///
/// Scheme, host, port and path must be equal, and every query parameter of
/// `return_to` must be present in `actual` with the same value.
pub fn verify_return_to(return_to: &str, actual: &str) -> bool {
    let (Ok(expected), Ok(actual)) = (Url::parse(return_to), Url::parse(actual)) else {
        return false;
    };
    if expected.scheme() != actual.scheme()
        || expected.host_str() != actual.host_str()
        || expected.port_or_known_default() != actual.port_or_known_default()
        || expected.path() != actual.path()
    {
        return false;
    }

    let actual_params: HashMap<String, String> = actual.query_pairs().into_owned().collect();
    expected
        .query_pairs()
        .all(|(k, v)| actual_params.get(&*k).is_some_and(|a| a.as_str() == &*v))
}

// ---------------------------------------------------------------------------
// GoogleAppsProvider
// ---------------------------------------------------------------------------

/// [`IdentityProvider`] for Google Apps hosted domains.
#[derive(Debug, Clone)]
pub struct GoogleAppsProvider {
    http: reqwest::Client,
    discovery_url: String,
    discovery_ttl: Duration,
    attributes: AttributeRequestSpec,
    xrds: XrdsPatterns,
}

impl GoogleAppsProvider {
    /// Build a provider from the `[auth]` settings.
    pub fn new(auth: &AuthConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(auth.http_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            discovery_url: auth.discovery_url.clone(),
            discovery_ttl: Duration::from_secs(auth.discovery_ttl_secs),
            attributes: AttributeRequestSpec::default(),
            xrds: XrdsPatterns::compile()?,
        })
    }

    /// Resolve `domain` to its OP endpoint, consulting the cache first.
    #[instrument(skip(self, cache))]
    pub async fn discover(&self, domain: &str, cache: &AttributeCache) -> Result<DiscoveredProvider> {
        let key = cache_key(domain);
        let now = chrono::Utc::now().timestamp();

        match cache.get::<CachedEndpoint>(&key).await {
            Ok(Some(entry)) if entry.expires_at > now => {
                debug!(domain, "discovery cache hit");
                return Ok(entry.provider);
            }
            Ok(_) => {}
            Err(e) => warn!(domain, error = %e, "discovery cache unreadable"),
        }

        let url = self.discovery_url.replace("{domain}", domain);
        let discovery_err = |reason: String| AuthError::Discovery {
            domain: domain.to_string(),
            reason,
        };

        let response = self
            .http
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/xrds+xml")
            .send()
            .await
            .map_err(|e| discovery_err(format!("GET {url}: {e}")))?;
        if !response.status().is_success() {
            return Err(discovery_err(format!("GET {url}: HTTP {}", response.status())));
        }
        let body = response
            .text()
            .await
            .map_err(|e| discovery_err(format!("reading {url}: {e}")))?;

        let provider = self
            .xrds
            .parse(domain, &body)
            .ok_or_else(|| discovery_err("no OpenID service in XRDS document".to_string()))?;
        info!(domain, endpoint = %provider.op_endpoint, "discovered OpenID endpoint");

        let ttl = i64::try_from(self.discovery_ttl.as_secs()).unwrap_or(i64::MAX);
        let entry = CachedEndpoint {
            provider: provider.clone(),
            expires_at: now.saturating_add(ttl),
        };
        if let Err(e) = cache.set(&key, &entry).await {
            warn!(domain, error = %e, "failed to cache discovered endpoint");
        }

        Ok(provider)
    }

    /// Ask the OP whether it really issued this assertion.
    async fn check_authentication(
        &self,
        endpoint: &str,
        params: &HashMap<String, String>,
    ) -> Result<bool> {
        let mut form: Vec<(&str, &str)> = params
            .iter()
            .filter(|(k, _)| k.starts_with("openid.") && k.as_str() != "openid.mode")
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        form.push(("openid.mode", "check_authentication"));

        let response = self.http.post(endpoint).form(&form).send().await?;
        if !response.status().is_success() {
            warn!(endpoint, status = %response.status(), "check_authentication rejected");
            return Ok(false);
        }
        let reply = parse_key_value_form(&response.text().await?);
        Ok(reply.get("is_valid").is_some_and(|v| v == "true"))
    }
}

#[async_trait]
impl IdentityProvider for GoogleAppsProvider {
    #[instrument(skip(self, cache))]
    async fn begin_auth(&self, domain: &str, cache: &AttributeCache) -> Result<AuthRequest> {
        let provider = self.discover(domain, cache).await?;
        Ok(AuthRequest::new(provider))
    }

    #[instrument(skip(self, params, cache))]
    async fn complete_auth(
        &self,
        domain: &str,
        return_url: &str,
        params: &HashMap<String, String>,
        cache: &AttributeCache,
    ) -> Result<AuthResponse> {
        let mode = params.get("openid.mode").map(String::as_str).unwrap_or("");
        match mode {
            "cancel" => return Ok(AuthResponse::cancelled()),
            "error" => {
                let message = params
                    .get("openid.error")
                    .cloned()
                    .unwrap_or_else(|| "provider reported an error".to_string());
                return Ok(AuthResponse::failed(message));
            }
            "setup_needed" => return Ok(AuthResponse::with_status(AuthStatus::SetupNeeded, None)),
            "id_res" => {}
            other => return Ok(AuthResponse::with_status(AuthStatus::Other(other.to_string()), None)),
        }

        if params.get("openid.ns").map(String::as_str) != Some(OPENID_NS) {
            return Ok(AuthResponse::failed("response is not OpenID 2.0"));
        }

        let asserted_return = params.get("openid.return_to").map(String::as_str).unwrap_or("");
        if !verify_return_to(asserted_return, return_url) {
            return Ok(AuthResponse::failed(format!(
                "return_to {asserted_return:?} does not match {return_url}"
            )));
        }

        let discovered = self.discover(domain, cache).await?;
        let asserted_endpoint = params.get("openid.op_endpoint").map(String::as_str).unwrap_or("");
        if asserted_endpoint != discovered.op_endpoint {
            return Ok(AuthResponse::failed(format!(
                "op_endpoint {asserted_endpoint:?} was not discovered for {domain}"
            )));
        }

        if !self.check_authentication(&discovered.op_endpoint, params).await? {
            return Ok(AuthResponse::failed("provider did not confirm the assertion"));
        }

        match extract_ax_attributes(params, &self.attributes) {
            Ok(attributes) => Ok(AuthResponse::success(attributes)),
            Err(reason) => Ok(AuthResponse::failed(reason)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const GOOGLE_XRDS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xrds:XRDS xmlns:xrds="xri://$xrds" xmlns="xri://$xrd*($v*2.0)">
  <XRD>
  <CanonicalID>example.com</CanonicalID>
  <Service priority="0">
  <Type>http://specs.openid.net/auth/2.0/server</Type>
  <Type>http://openid.net/srv/ax/1.0</Type>
  <URI>https://www.google.com/a/example.com/o8/ud?be=o8&amp;x=1</URI>
  </Service>
  <Service priority="0">
  <Type>http://www.iana.org/assignments/relation/describedby</Type>
  <URI>https://www.google.com/accounts/o8/user-xrds?uri=x</URI>
  </Service>
  </XRD>
</xrds:XRDS>"#;

    fn patterns() -> XrdsPatterns {
        XrdsPatterns::compile().unwrap()
    }

    fn config(dir: &std::path::Path) -> AuthConfig {
        AuthConfig {
            temp_path: dir.to_path_buf(),
            discovery_url: "http://127.0.0.1:9/xrds?hd={domain}".into(),
            http_timeout_secs: 1,
            ..AuthConfig::default()
        }
    }

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parses_google_site_xrds() {
        let provider = patterns().parse("example.com", GOOGLE_XRDS).unwrap();
        assert_eq!(
            provider.op_endpoint,
            "https://www.google.com/a/example.com/o8/ud?be=o8&x=1"
        );
        assert_eq!(provider.claimed_id, IDENTIFIER_SELECT);
        assert_eq!(provider.domain, "example.com");
    }

    #[test]
    fn server_service_beats_signon_and_priority_orders() {
        let xrds = r#"<XRDS><XRD>
<Service priority="0"><Type>http://specs.openid.net/auth/2.0/signon</Type>
<URI>https://signon.example/</URI><LocalID>https://me.example/</LocalID></Service>
<Service priority="20"><Type>http://specs.openid.net/auth/2.0/server</Type>
<URI>https://low.example/</URI></Service>
<Service priority="10"><Type>http://specs.openid.net/auth/2.0/server</Type>
<URI>https://high.example/</URI></Service>
</XRD></XRDS>"#;
        let provider = patterns().parse("d", xrds).unwrap();
        assert_eq!(provider.op_endpoint, "https://high.example/");
    }

    #[test]
    fn signon_service_uses_local_id() {
        let xrds = r#"<XRDS><XRD><Service><Type>http://specs.openid.net/auth/2.0/signon</Type>
<URI>https://signon.example/</URI><LocalID>https://me.example/</LocalID></Service></XRD></XRDS>"#;
        let provider = patterns().parse("d", xrds).unwrap();
        assert_eq!(provider.local_id, "https://me.example/");
        assert_eq!(provider.claimed_id, "https://me.example/");
    }

    #[test]
    fn xrds_without_openid_service_is_none() {
        assert!(patterns().parse("d", "<html>nope</html>").is_none());
    }

    #[test]
    fn key_value_form() {
        let kv = parse_key_value_form("ns:http://specs.openid.net/auth/2.0\nis_valid:true\n");
        assert_eq!(kv["is_valid"], "true");
        assert_eq!(kv["ns"], OPENID_NS);
    }

    const ALL_AX_SIGNED: &str = "op_endpoint,claimed_id,identity,return_to,ns.ax,\
                                 ax.type.mail,ax.count.mail,ax.value.mail.1,\
                                 ax.type.first,ax.value.first,ax.type.last,ax.value.last,\
                                 ax.type.odd,ax.value.odd";

    #[test]
    fn ax_attributes_match_by_type_uri() {
        let p = params(&[
            ("openid.signed", ALL_AX_SIGNED),
            ("openid.ns.ax", AX_NS),
            ("openid.ax.type.mail", "http://axschema.org/contact/email"),
            ("openid.ax.count.mail", "1"),
            ("openid.ax.value.mail.1", "alice@example.com"),
            ("openid.ax.type.first", "http://axschema.org/namePerson/first"),
            ("openid.ax.value.first", "alice"),
            ("openid.ax.type.last", "http://axschema.org/namePerson/last"),
            ("openid.ax.value.last", ""),
            ("openid.ax.type.odd", "http://example.com/unknown"),
            ("openid.ax.value.odd", "x"),
        ]);
        let attrs = extract_ax_attributes(&p, &AttributeRequestSpec::default()).unwrap();
        assert_eq!(attrs["email"], "alice@example.com");
        assert_eq!(attrs["firstname"], "alice");
        assert!(!attrs.contains_key("lastname"));
        assert_eq!(attrs.len(), 2);
    }

    #[test]
    fn ax_attributes_absent_without_namespace() {
        let p = params(&[
            ("openid.signed", "ext1.value.email"),
            ("openid.ext1.value.email", "a@b.c"),
        ]);
        assert!(extract_ax_attributes(&p, &AttributeRequestSpec::default()).unwrap().is_empty());
    }

    #[test]
    fn unsigned_ax_values_are_dropped() {
        let p = params(&[
            ("openid.signed", "op_endpoint,claimed_id,identity,return_to,ns.ext1,ext1.type.email"),
            ("openid.ns.ext1", AX_NS),
            ("openid.ext1.type.email", "http://axschema.org/contact/email"),
            ("openid.ext1.value.email", "ceo@example.com"),
            ("openid.ext1.type.firstname", "http://axschema.org/namePerson/first"),
            ("openid.ext1.value.firstname", "Mallory"),
        ]);
        let attrs = extract_ax_attributes(&p, &AttributeRequestSpec::default()).unwrap();
        assert!(attrs.is_empty(), "got {attrs:?}");
    }

    #[test]
    fn unsigned_ax_namespace_ignores_everything() {
        let p = params(&[
            ("openid.signed", "ext1.type.email,ext1.value.email"),
            ("openid.ns.ext1", AX_NS),
            ("openid.ext1.type.email", "http://axschema.org/contact/email"),
            ("openid.ext1.value.email", "ceo@example.com"),
        ]);
        assert!(extract_ax_attributes(&p, &AttributeRequestSpec::default()).unwrap().is_empty());
    }

    #[test]
    fn unsigned_count_does_not_redirect_to_indexed_value() {
        let p = params(&[
            ("openid.signed", "ns.ext1,ext1.type.email,ext1.value.email,ext1.value.email.1"),
            ("openid.ns.ext1", AX_NS),
            ("openid.ext1.type.email", "http://axschema.org/contact/email"),
            ("openid.ext1.count.email", "1"),
            ("openid.ext1.value.email", "alice@example.com"),
            ("openid.ext1.value.email.1", "ceo@example.com"),
        ]);
        let attrs = extract_ax_attributes(&p, &AttributeRequestSpec::default()).unwrap();
        assert!(!attrs.contains_key("email"));
    }

    #[test]
    fn two_ax_namespace_aliases_are_rejected() {
        let p = params(&[
            ("openid.signed", "ns.ext1,ns.ax,ext1.type.email,ext1.value.email"),
            ("openid.ns.ext1", AX_NS),
            ("openid.ns.ax", AX_NS),
            ("openid.ext1.type.email", "http://axschema.org/contact/email"),
            ("openid.ext1.value.email", "alice@example.com"),
        ]);
        let err = extract_ax_attributes(&p, &AttributeRequestSpec::default()).unwrap_err();
        assert!(err.contains("ax, ext1"), "{err}");
    }

    #[test]
    fn type_without_value_yields_nothing() {
        let p = params(&[
            ("openid.signed", "ns.ext1,ext1.type.email,ext1.value.email"),
            ("openid.ns.ext1", AX_NS),
            ("openid.ext1.type.email", "http://axschema.org/contact/email"),
        ]);
        let attrs = extract_ax_attributes(&p, &AttributeRequestSpec::default()).unwrap();
        assert!(attrs.is_empty());
    }

    #[test]
    fn signed_list_is_prefixed_and_trimmed() {
        let p = params(&[("openid.signed", "return_to, ns.ext1,,ext1.value.email")]);
        let signed = signed_keys(&p);
        assert_eq!(signed.len(), 3);
        assert!(signed.contains("openid.ns.ext1"));
        assert!(signed_keys(&HashMap::new()).is_empty());
    }

    #[test]
    fn return_to_verification() {
        let rt = "http://h/index.php?title=Special:UserLogin&gapps_nonce=n1";
        assert!(verify_return_to(
            rt,
            "http://h/index.php?title=Special:UserLogin&gapps_nonce=n1&openid.mode=id_res"
        ));
        assert!(!verify_return_to(rt, "http://h/index.php?title=Special:UserLogin&gapps_nonce=n2"));
        assert!(!verify_return_to(rt, "https://h/index.php?title=Special:UserLogin&gapps_nonce=n1"));
        assert!(!verify_return_to("", "http://h/"));
    }

    #[tokio::test]
    async fn non_positive_modes_need_no_network() {
        let dir = tempfile::tempdir().unwrap();
        let provider = GoogleAppsProvider::new(&config(dir.path())).unwrap();
        let cache = AttributeCache::new(dir.path());

        let cases = [
            ("cancel", AuthStatus::Cancelled),
            ("error", AuthStatus::Failed),
            ("setup_needed", AuthStatus::SetupNeeded),
            ("checkid_weird", AuthStatus::Other("checkid_weird".into())),
        ];
        for (mode, expected) in cases {
            let resp = provider
                .complete_auth("example.com", "http://h/", &params(&[("openid.mode", mode)]), &cache)
                .await
                .unwrap();
            assert_eq!(resp.status, expected, "mode {mode}");
        }
    }

    #[tokio::test]
    async fn id_res_with_wrong_return_to_fails_before_network() {
        let dir = tempfile::tempdir().unwrap();
        let provider = GoogleAppsProvider::new(&config(dir.path())).unwrap();
        let cache = AttributeCache::new(dir.path());

        let p = params(&[
            ("openid.ns", OPENID_NS),
            ("openid.mode", "id_res"),
            ("openid.return_to", "http://evil/"),
        ]);
        let resp = provider
            .complete_auth("example.com", "http://h/", &p, &cache)
            .await
            .unwrap();
        assert_eq!(resp.status, AuthStatus::Failed);
    }

    #[tokio::test]
    async fn discovery_served_from_fresh_cache_entry() {
        let dir = tempfile::tempdir().unwrap();
        let provider = GoogleAppsProvider::new(&config(dir.path())).unwrap();
        let cache = AttributeCache::new(dir.path());
        let cached = DiscoveredProvider {
            domain: "example.com".into(),
            op_endpoint: "https://op.example/ud".into(),
            claimed_id: IDENTIFIER_SELECT.into(),
            local_id: IDENTIFIER_SELECT.into(),
        };
        cache
            .set(
                &cache_key("example.com"),
                &CachedEndpoint {
                    provider: cached.clone(),
                    expires_at: chrono::Utc::now().timestamp() + 60,
                },
            )
            .await
            .unwrap();

        let found = provider.discover("example.com", &cache).await.unwrap();
        assert_eq!(found, cached);
    }

    #[tokio::test]
    async fn expired_cache_entry_triggers_discovery() {
        let dir = tempfile::tempdir().unwrap();
        let provider = GoogleAppsProvider::new(&config(dir.path())).unwrap();
        let cache = AttributeCache::new(dir.path());
        cache
            .set(
                &cache_key("example.com"),
                &CachedEndpoint {
                    provider: DiscoveredProvider {
                        domain: "example.com".into(),
                        op_endpoint: "https://op.example/ud".into(),
                        claimed_id: IDENTIFIER_SELECT.into(),
                        local_id: IDENTIFIER_SELECT.into(),
                    },
                    expires_at: 0,
                },
            )
            .await
            .unwrap();

        // Port 9 (discard) refuses connections, so a live lookup fails.
        let err = provider.discover("example.com", &cache).await.unwrap_err();
        assert!(matches!(err, AuthError::Discovery { .. }));
    }
}
