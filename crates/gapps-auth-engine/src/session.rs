//! Typed access to the host's per-browser session.
//!
//! The host (web server, test harness) owns session persistence and
//! lifetime and exposes it through [`HostSession`]. [`SessionStore`] layers
//! the login flow's two records on top of it:
//!
//! - the pending authentication (`<session_key>`), written once a provider
//!   callback verifies and consulted to short-circuit later requests;
//! - the authenticated account (`<session_key>.account`), which is what the
//!   host turns into its logged-in cookie.
//!
//! There is no expiry logic here; records live as long as the host session.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AuthError, Result};

/// The host's session mechanism for one browser.
pub trait HostSession: Send {
    /// Read a value.
    fn get(&self, key: &str) -> Option<Value>;
    /// Write a value, replacing any previous one.
    fn insert(&mut self, key: &str, value: Value);
    /// Delete a value, returning it if it was present.
    fn remove(&mut self, key: &str) -> Option<Value>;
}

/// A map-backed [`HostSession`] that tracks whether it changed.
///
/// Hosts load one per request, run the flow against it, and persist it
/// again only when [`is_dirty`](Self::is_dirty) is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionData {
    values: HashMap<String, Value>,
    #[serde(skip)]
    dirty: bool,
}

impl SessionData {
    /// An empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any write happened since creation or the last [`mark_clean`](Self::mark_clean).
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Reset the dirty flag after persisting.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Whether the session holds no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl HostSession for SessionData {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn insert(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
        self.dirty = true;
    }

    fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.values.remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Identity verified by a previous provider callback in this session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAuthSession {
    /// Verified email address.
    pub email: String,
    /// Display name built from the provider's name attributes.
    pub display_name: String,
}

/// The local account this browser is logged in as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    /// Local account ID.
    pub account_id: String,
    /// Account email.
    pub email: String,
    /// Whether the login should persist beyond the browser session.
    pub remember: bool,
}

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

/// The login flow's view of one browser session.
pub struct SessionStore<'a> {
    host: &'a mut dyn HostSession,
    key: String,
}

impl<'a> SessionStore<'a> {
    /// Wrap `host`, storing records under `session_key`.
    pub fn new(host: &'a mut dyn HostSession, session_key: impl Into<String>) -> Self {
        Self {
            host,
            key: session_key.into(),
        }
    }

    /// The fixed session key.
    pub fn key(&self) -> &str {
        &self.key
    }

    fn account_key(&self) -> String {
        format!("{}.account", self.key)
    }

    /// The pending authentication, if a callback already verified this browser.
    pub fn pending(&self) -> Result<Option<PendingAuthSession>> {
        read(&*self.host, &self.key)
    }

    /// Record a verified identity.
    pub fn set_pending(&mut self, pending: &PendingAuthSession) -> Result<()> {
        let key = self.key.clone();
        write(&mut *self.host, &key, pending)
    }

    /// The account this browser is logged in as.
    pub fn authenticated(&self) -> Result<Option<AuthenticatedUser>> {
        read(&*self.host, &self.account_key())
    }

    /// Log this browser in as `user`.
    pub fn set_authenticated(&mut self, user: &AuthenticatedUser) -> Result<()> {
        let key = self.account_key();
        write(&mut *self.host, &key, user)
    }

    /// Forget both the pending authentication and the logged-in account.
    pub fn clear(&mut self) {
        let account_key = self.account_key();
        self.host.remove(&self.key);
        self.host.remove(&account_key);
    }
}

fn read<T: serde::de::DeserializeOwned>(host: &dyn HostSession, key: &str) -> Result<Option<T>> {
    host.get(key)
        .map(|value| {
            serde_json::from_value(value).map_err(|e| AuthError::Session {
                reason: format!("unreadable session record {key:?}: {e}"),
            })
        })
        .transpose()
}

fn write<T: Serialize>(host: &mut dyn HostSession, key: &str, record: &T) -> Result<()> {
    let value = serde_json::to_value(record).map_err(|e| AuthError::Session {
        reason: format!("could not encode session record {key:?}: {e}"),
    })?;
    host.insert(key, value);
    Ok(())
}
