//! End-to-end tests for the gapps-auth web host.
//!
//! These tests spin up the **real** Axum server on an OS-assigned ephemeral
//! port with a canned identity provider, make HTTP requests via `reqwest`
//! with redirects disabled, and check status codes, redirects and cookies.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{COOKIE, LOCATION, SET_COOKIE};
use tokio::net::TcpListener;

use gapps_auth_engine::provider::IDENTIFIER_SELECT;
use gapps_auth_engine::{
    AttributeCache, AuthConfig, AuthFlowController, AuthRequest, AuthResponse, DiscoveredProvider,
    DomainSelection, IdentityProvider, SiteConfig,
};
use gapps_auth_store::{AccountStore, Database};
use gapps_auth_web::{SESSION_COOKIE, WebConfig, WebServer};

// ── helpers ──────────────────────────────────────────────────────────────────

/// Succeeds for every callback unless it carries `openid.mode=cancel`.
struct CannedProvider;

#[async_trait]
impl IdentityProvider for CannedProvider {
    async fn begin_auth(
        &self,
        domain: &str,
        _cache: &AttributeCache,
    ) -> gapps_auth_engine::Result<AuthRequest> {
        Ok(AuthRequest::new(DiscoveredProvider {
            domain: domain.to_string(),
            op_endpoint: "https://op.example/ud".into(),
            claimed_id: IDENTIFIER_SELECT.into(),
            local_id: IDENTIFIER_SELECT.into(),
        }))
    }

    async fn complete_auth(
        &self,
        _domain: &str,
        _return_url: &str,
        params: &HashMap<String, String>,
        _cache: &AttributeCache,
    ) -> gapps_auth_engine::Result<AuthResponse> {
        if params.get("openid.mode").map(String::as_str) == Some("cancel") {
            return Ok(AuthResponse::cancelled());
        }
        let attributes = [
            ("email", "alice@example.com"),
            ("firstname", "alice"),
            ("lastname", "jones"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Ok(AuthResponse::success(attributes))
    }
}

struct TestServer {
    base: String,
    client: reqwest::Client,
    accounts: AccountStore,
    _dir: tempfile::TempDir,
}

/// Bind to 127.0.0.1:0 and start the web host with `temp_path` under a
/// fresh temp dir (or at `temp_override`).
async fn start_test_server(temp_override: Option<std::path::PathBuf>) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let auth = AuthConfig {
        domains: DomainSelection::Single("example.com".into()),
        temp_path: temp_override.unwrap_or_else(|| dir.path().join("tmp")),
        ..AuthConfig::default()
    };
    let db = Database::open_in_memory().unwrap();
    db.run_migrations().await.unwrap();
    let accounts = AccountStore::new(db);
    let controller = AuthFlowController::new(
        auth,
        SiteConfig::default(),
        Arc::new(CannedProvider),
        accounts.clone(),
    )
    .unwrap();

    let server = WebServer::new(WebConfig::default(), Arc::new(controller));
    let app = server.router();

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind to port 0");
    let addr: SocketAddr = listener.local_addr().expect("get local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    // Small yield so the listener is ready.
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    TestServer {
        base: format!("http://127.0.0.1:{}", addr.port()),
        client: reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap(),
        accounts,
        _dir: dir,
    }
}

impl TestServer {
    async fn get(&self, path: &str, sid: Option<&str>) -> reqwest::Response {
        let mut request = self.client.get(format!("{}{path}", self.base));
        if let Some(sid) = sid {
            request = request.header(COOKIE, format!("{SESSION_COOKIE}={sid}"));
        }
        request.send().await.expect("request failed")
    }
}

fn set_cookie(resp: &reqwest::Response) -> Option<String> {
    resp.headers()
        .get(SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn sid_from(cookie: &str) -> String {
    cookie
        .split(';')
        .next()
        .and_then(|kv| kv.split_once('='))
        .map(|(_, v)| v.to_string())
        .expect("cookie has a value")
}

// ── tests ─────────────────────────────────────────────────────────────────────

#[test]
fn web_config_defaults() {
    let config = WebConfig::default();
    assert_eq!(config.bind_addr, "127.0.0.1");
    assert_eq!(config.port, 8080);
    assert_eq!(config.remember_secs(), 30 * 86_400);
}

#[tokio::test]
async fn login_page_redirects_to_provider() {
    let server = start_test_server(None).await;

    let resp = server.get("/index.php/Special:UserLogin", None).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    let location = resp.headers()[LOCATION].to_str().unwrap().to_string();
    assert!(location.starts_with("https://op.example/ud?"));
    assert!(location.contains("openid.mode=checkid_setup"));
    assert!(set_cookie(&resp).is_none());
}

#[tokio::test]
async fn callback_logs_in_and_sets_remembered_cookie() {
    let server = start_test_server(None).await;

    let resp = server
        .get(
            "/index.php?title=Special:UserLogin&gapps_nonce=n1&returnto=Project_Plans",
            None,
        )
        .await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(
        resp.headers()[LOCATION],
        "http://localhost:8080/index.php/Project_Plans?action=purge"
    );

    let cookie = set_cookie(&resp).expect("session cookie set");
    assert!(cookie.starts_with(&format!("{SESSION_COOKIE}=")));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains(&format!("Max-Age={}", 30 * 86_400)));

    let account = server
        .accounts
        .find_by_email("alice@example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.display_name, "Alice Jones");

    let sid = sid_from(&cookie);
    let resp = server.get("/", Some(&sid)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(set_cookie(&resp).is_none());
    let body = resp.text().await.unwrap();
    assert!(body.starts_with("Main_Page"));
    assert!(body.contains("Logged in as alice@example.com"));
}

#[tokio::test]
async fn logged_in_session_short_circuits_login_page() {
    let server = start_test_server(None).await;
    let resp = server
        .get("/index.php/Special:UserLogin?gapps_nonce=n1", None)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let sid = sid_from(&set_cookie(&resp).unwrap());

    let resp = server.get("/index.php/Special:UserLogin", Some(&sid)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.text().await.unwrap(),
        "Logged in as Alice Jones <alice@example.com>.\n"
    );
    assert_eq!(server.accounts.count().await.unwrap(), 1);
}

#[tokio::test]
async fn planted_session_cookie_is_not_adopted() {
    let server = start_test_server(None).await;
    let planted = "attacker-chosen-sid";

    let resp = server
        .get("/index.php/Special:UserLogin?gapps_nonce=n1", Some(planted))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let issued = sid_from(&set_cookie(&resp).expect("session cookie set"));
    assert_ne!(issued, planted);

    let body = server.get("/", Some(planted)).await.text().await.unwrap();
    assert_eq!(body, "Main_Page\n");

    let body = server.get("/", Some(&issued)).await.text().await.unwrap();
    assert!(body.contains("Logged in as alice@example.com"));
}

#[tokio::test]
async fn unknown_cookie_on_ordinary_page_sets_nothing() {
    let server = start_test_server(None).await;
    let resp = server.get("/index.php/Some_Page", Some("made-up")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(set_cookie(&resp).is_none());
}

#[tokio::test]
async fn login_rotates_existing_session_id() {
    let server = start_test_server(None).await;
    let resp = server
        .get("/index.php/Special:UserLogin?gapps_nonce=n1", None)
        .await;
    let first = sid_from(&set_cookie(&resp).unwrap());

    let resp = server.get("/index.php/Special:UserLogin", Some(&first)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let second = sid_from(&set_cookie(&resp).expect("rotated cookie"));
    assert_ne!(second, first);

    let body = server.get("/", Some(&first)).await.text().await.unwrap();
    assert!(!body.contains("Logged in"));
    let body = server.get("/", Some(&second)).await.text().await.unwrap();
    assert!(body.contains("Logged in as alice@example.com"));
}

#[tokio::test]
async fn logout_clears_session() {
    let server = start_test_server(None).await;
    let resp = server
        .get("/index.php/Special:UserLogin?gapps_nonce=n1", None)
        .await;
    let sid = sid_from(&set_cookie(&resp).unwrap());

    let resp = server.get("/index.php/Special:UserLogout", Some(&sid)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let cleared = set_cookie(&resp).expect("cookie cleared");
    assert!(cleared.contains("Max-Age=0"));

    let body = server.get("/", Some(&sid)).await.text().await.unwrap();
    assert!(!body.contains("Logged in"));

    let resp = server.get("/index.php/Special:UserLogin", Some(&sid)).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
}

#[tokio::test]
async fn cancelled_callback_is_forbidden() {
    let server = start_test_server(None).await;

    let resp = server
        .get(
            "/index.php?title=Special:UserLogin&gapps_nonce=n1&openid.mode=cancel",
            None,
        )
        .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(set_cookie(&resp).is_none());
    assert_eq!(resp.text().await.unwrap(), "Verification cancelled.\n");
    assert_eq!(server.accounts.count().await.unwrap(), 0);
}

#[tokio::test]
async fn unwritable_temp_path_is_a_server_error() {
    let blocker = tempfile::NamedTempFile::new().unwrap();
    let server = start_test_server(Some(blocker.path().join("tmp"))).await;

    let resp = server.get("/index.php/Special:UserLogin", None).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(
        resp.text()
            .await
            .unwrap()
            .starts_with("Login is misconfigured")
    );
}

#[tokio::test]
async fn ordinary_pages_pass_through() {
    let server = start_test_server(None).await;
    let resp = server.get("/index.php/Some_Page", None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "Some_Page\n");
}
