//! Shared document store holding lobby state.
//!
//! Documents are JSON values addressed by string keys with an optional
//! per-key expiry. The store is the single source of truth for lobby
//! state; everything else in the process is a cache of connections.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document {key} is malformed: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Key of the lobby document.
pub fn lobby_key(code: &str) -> String {
    format!("lobby:{code}")
}

/// Key of the per-lobby turn data document.
pub fn data_key(code: &str) -> String {
    format!("lobby:{code}:data")
}

/// Key of the per-lobby ban list document.
pub fn bans_key(code: &str) -> String {
    format!("lobby:{code}:bans")
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Writes a document. An existing expiry on the key is kept.
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Sets the expiry of an existing key. Returns false if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Returns true if something was deleted.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Releases backend resources on shutdown.
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process store backed by a `DashMap`. Expired keys are dropped lazily
/// on access and in bulk by [`MemoryStore::sweep`].
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes every expired key. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let now = Instant::now();
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        Ok(self.entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut entry = self.entries.entry(key.to_string()).or_insert(Entry {
            value: Value::Null,
            expires_at: None,
        });
        if entry.is_expired(now) {
            entry.expires_at = None;
        }
        entry.value = value;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn close(&self) -> Result<(), StoreError> {
        tracing::info!("memory store closed with {} documents", self.entries.len());
        self.entries.clear();
        Ok(())
    }
}
