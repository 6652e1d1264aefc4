//! Browser sessions held in a [`moka`] cache.
//!
//! Each browser is identified by a random `gapps_sid` cookie. Entries
//! expire after sitting idle for the session TTL; sessions of remembered
//! logins idle out after the (longer) remember lifetime instead.

use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use gapps_auth_engine::SessionData;
use moka::Expiry;
use moka::future::Cache;
use ring::rand::{SecureRandom, SystemRandom};
use tracing::debug;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "gapps_sid";

const SESSION_ID_BYTES: usize = 32;

/// A cached session and whether it belongs to a remembered login.
#[derive(Debug, Clone)]
struct StoredSession {
    data: SessionData,
    remembered: bool,
}

/// Per-entry idle timeout depending on whether the login is remembered.
struct SessionExpiry {
    idle: Duration,
    remembered: Duration,
}

impl SessionExpiry {
    fn ttl(&self, session: &StoredSession) -> Option<Duration> {
        Some(if session.remembered {
            self.remembered
        } else {
            self.idle
        })
    }
}

impl Expiry<String, StoredSession> for SessionExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredSession,
        _created_at: Instant,
    ) -> Option<Duration> {
        self.ttl(value)
    }

    fn expire_after_read(
        &self,
        _key: &String,
        value: &StoredSession,
        _read_at: Instant,
        _duration_until_expiry: Option<Duration>,
        _last_modified_at: Instant,
    ) -> Option<Duration> {
        self.ttl(value)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredSession,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        self.ttl(value)
    }
}

/// Server-side session storage shared by all requests.
#[derive(Clone)]
pub struct SessionCache {
    inner: Cache<String, StoredSession>,
}

impl SessionCache {
    /// A cache holding at most `max_sessions` sessions.
    pub fn new(max_sessions: u64, idle: Duration, remembered: Duration) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_sessions)
            .expire_after(SessionExpiry { idle, remembered })
            .build();
        Self { inner }
    }

    /// The session for `sid`, or `None` if it was never issued or has
    /// expired.
    pub async fn load(&self, sid: &str) -> Option<SessionData> {
        let stored = self.inner.get(sid).await;
        if stored.is_none() {
            debug!("session miss");
        }
        stored.map(|s| s.data)
    }

    /// Store `data` under `sid`.
    pub async fn save(&self, sid: &str, mut data: SessionData, remembered: bool) {
        data.mark_clean();
        self.inner
            .insert(sid.to_string(), StoredSession { data, remembered })
            .await;
    }

    /// Forget `sid`.
    pub async fn remove(&self, sid: &str) {
        self.inner.invalidate(sid).await;
    }

    /// Whether a live session exists for `sid`.
    pub async fn contains(&self, sid: &str) -> bool {
        self.inner.get(sid).await.is_some()
    }
}

/// A fresh unguessable session ID.
pub fn new_session_id() -> Option<String> {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    SystemRandom::new().fill(&mut bytes).ok()?;
    Some(URL_SAFE_NO_PAD.encode(bytes))
}
