//! File-backed key-value cache for provider discovery metadata.
//!
//! The whole cache is one JSON object in a single file. Both `get` and
//! `set` read the entire mapping; `set` then writes it back. There is no
//! locking, so two requests writing at the same time can lose one of the
//! updates. That is acceptable: entries are hints, and a miss only costs a
//! fresh discovery round trip.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::Result;

/// Name of the cache file inside the temporary storage directory.
pub const CACHE_FILE_NAME: &str = "discovery-cache.json";

/// Best-effort persistent cache shared by all requests.
#[derive(Debug, Clone)]
pub struct AttributeCache {
    path: PathBuf,
}

impl AttributeCache {
    /// A cache stored in `dir`. The directory must already exist.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(CACHE_FILE_NAME),
        }
    }

    /// Location of the cache file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up `key`.
    ///
    /// Returns `Ok(None)` when the key is missing or its stored value no
    /// longer deserializes into `T`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut entries = self.load().await?;
        let Some(value) = entries.remove(key) else {
            return Ok(None);
        };

        match serde_json::from_value(value) {
            Ok(parsed) => Ok(Some(parsed)),
            Err(e) => {
                tracing::warn!(key, error = %e, "ignoring unreadable cache entry");
                Ok(None)
            }
        }
    }

    /// Store `value` under `key`, replacing any previous value.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let mut entries = self.load().await?;
        entries.insert(key.to_string(), serde_json::to_value(value)?);
        self.store(&entries).await
    }

    /// Drop `key`. Returns whether it was present.
    pub async fn remove(&self, key: &str) -> Result<bool> {
        let mut entries = self.load().await?;
        if entries.remove(key).is_none() {
            return Ok(false);
        }
        self.store(&entries).await?;
        Ok(true)
    }

    async fn load(&self) -> Result<Map<String, Value>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice(&bytes) {
            Ok(Value::Object(entries)) => Ok(entries),
            Ok(_) | Err(_) => {
                tracing::warn!(path = %self.path.display(), "discarding corrupt attribute cache");
                Ok(Map::new())
            }
        }
    }

    /// Write via a sibling file and rename, so readers never see a torn file.
    async fn store(&self, entries: &Map<String, Value>) -> Result<()> {
        let bytes = serde_json::to_vec(entries)?;
        let staging = self
            .path
            .with_extension(format!("json.{}.tmp", std::process::id()));
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        Ok(())
    }
}
