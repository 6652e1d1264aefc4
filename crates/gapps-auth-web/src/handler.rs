//! Page route handlers.
//!
//! Every page request runs through the login flow first. Redirect outcomes
//! become `302 Found`; everything else renders a minimal text page.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use gapps_auth_engine::{
    AuthError, AuthenticatedUser, LoginOutcome, RequestContext, SessionData, SessionStore,
};
use url::Url;

use crate::sessions::{SESSION_COOKIE, new_session_id};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

/// `GET /`: the main page, or `?title=` if given.
pub async fn root(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let title = params
        .get("title")
        .cloned()
        .unwrap_or_else(|| state.controller.site_config().main_page.clone());
    serve(&state, Some(title), params, &headers, &uri).await
}

/// `GET /index.php?title=<title>`.
pub async fn index(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let title = params.get("title").cloned();
    serve(&state, title, params, &headers, &uri).await
}

/// `GET /index.php/<title>`.
pub async fn page(
    State(state): State<Arc<AppState>>,
    Path(title): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    serve(&state, Some(title), params, &headers, &uri).await
}

// ---------------------------------------------------------------------------
// Request pipeline
// ---------------------------------------------------------------------------

async fn serve(
    state: &AppState,
    title: Option<String>,
    params: HashMap<String, String>,
    headers: &HeaderMap,
    uri: &Uri,
) -> Response {
    let ctx = request_context(state, title, params, headers, uri);

    // A cookie the cache does not know is ignored, never adopted.
    let (sid, mut data) = match session_cookie(headers) {
        Some(sid) => match state.sessions.load(&sid).await {
            Some(data) => (Some(sid), data),
            None => {
                tracing::debug!("ignoring unknown session cookie");
                (None, SessionData::new())
            }
        },
        None => (None, SessionData::new()),
    };

    let result = {
        let mut session = SessionStore::new(&mut data, state.session_key());
        state.controller.handle_login_request(&ctx, &mut session).await
    };
    let user = SessionStore::new(&mut data, state.session_key())
        .authenticated()
        .ok()
        .flatten();
    let logged_in = matches!(
        result,
        Ok(LoginOutcome::AccountLoggedIn(_) | LoginOutcome::RedirectToReturnUrl(_))
    );

    let cookie = persist_session(state, sid, data, user.as_ref(), logged_in).await;

    let mut response = match result {
        Ok(outcome) => outcome_response(outcome, &ctx, user.as_ref()),
        Err(err) => error_response(&err),
    };
    if let Some(cookie) = cookie {
        response.headers_mut().append(header::SET_COOKIE, cookie);
    }
    response
}

/// The engine's view of this request.
fn request_context(
    state: &AppState,
    title: Option<String>,
    params: HashMap<String, String>,
    headers: &HeaderMap,
    uri: &Uri,
) -> RequestContext {
    let forwarded_https = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("https"));
    let secure = state.config.secure || forwarded_https;
    let default_port = if secure { 443 } else { 80 };

    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| Url::parse(&format!("http://{h}")).ok());
    let (server_name, server_port) = match &host {
        Some(url) => (
            url.host_str().unwrap_or_default().to_string(),
            url.port().unwrap_or(default_port),
        ),
        None => (state.config.bind_addr.clone(), state.config.port),
    };

    let request_uri = uri.path_and_query().map_or("/", |pq| pq.as_str());

    RequestContext {
        title,
        params,
        secure,
        server_name,
        server_port,
        request_uri: request_uri.to_string(),
    }
}

/// The `gapps_sid` value from the `Cookie` header(s).
fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// Write the session back if the flow changed it. Returns the `Set-Cookie`
/// value to send, if any.
///
/// `sid` is only ever a session the cache issued. A login always moves the
/// session to a fresh ID and drops the old one.
async fn persist_session(
    state: &AppState,
    sid: Option<String>,
    data: SessionData,
    user: Option<&AuthenticatedUser>,
    logged_in: bool,
) -> Option<HeaderValue> {
    if !data.is_dirty() {
        return None;
    }

    if data.is_empty() {
        let sid = sid?;
        state.sessions.remove(&sid).await;
        return HeaderValue::from_str(&format!(
            "{SESSION_COOKIE}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax"
        ))
        .ok();
    }

    let sid = match sid {
        Some(sid) if !logged_in => sid,
        previous => {
            let Some(fresh) = new_session_id() else {
                tracing::error!("could not generate a session id; session not saved");
                return None;
            };
            if let Some(previous) = previous {
                state.sessions.remove(&previous).await;
                tracing::debug!("session id rotated on login");
            }
            fresh
        }
    };
    let remembered = user.is_some_and(|u| u.remember);
    state.sessions.save(&sid, data, remembered).await;

    let mut cookie = format!("{SESSION_COOKIE}={sid}; Path=/; HttpOnly; SameSite=Lax");
    if state.config.secure {
        cookie.push_str("; Secure");
    }
    if remembered {
        cookie.push_str(&format!("; Max-Age={}", state.config.remember_secs()));
    }
    HeaderValue::from_str(&cookie).ok()
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

fn outcome_response(
    outcome: LoginOutcome,
    ctx: &RequestContext,
    user: Option<&AuthenticatedUser>,
) -> Response {
    match outcome {
        LoginOutcome::RedirectToProvider(url) | LoginOutcome::RedirectToReturnUrl(url) => {
            found(&url)
        }
        LoginOutcome::AccountLoggedIn(account) => (
            StatusCode::OK,
            format!(
                "Logged in as {} <{}>.\n",
                account.display_name, account.email
            ),
        )
            .into_response(),
        LoginOutcome::LoggedOut => (StatusCode::OK, "You are now logged out.\n").into_response(),
        LoginOutcome::NoAction => {
            let title = ctx.title.as_deref().unwrap_or_default();
            let body = match user {
                Some(user) => format!("{title}\n\nLogged in as {}.\n", user.email),
                None => format!("{title}\n"),
            };
            (StatusCode::OK, body).into_response()
        }
    }
}

fn found(url: &Url) -> Response {
    match HeaderValue::from_str(url.as_str()) {
        Ok(location) => (StatusCode::FOUND, [(header::LOCATION, location)]).into_response(),
        Err(e) => {
            tracing::error!(url = %url, error = %e, "redirect target is not a valid header");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// HTTP status for a failed login request.
pub fn status_for(err: &AuthError) -> StatusCode {
    match err {
        AuthError::Cancelled => StatusCode::FORBIDDEN,
        AuthError::VerificationFailed { .. } => StatusCode::UNAUTHORIZED,
        AuthError::Protocol { .. }
        | AuthError::Discovery { .. }
        | AuthError::RedirectBuild { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &AuthError) -> Response {
    let status = status_for(err);
    if status.is_server_error() {
        tracing::error!(error = %err, "login request failed");
    } else {
        tracing::warn!(error = %err, "login rejected");
    }
    (status, format!("{}\n", err.user_message())).into_response()
}
