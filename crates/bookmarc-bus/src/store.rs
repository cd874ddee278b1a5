//! Key-value store collaborator interface.
//!
//! The bus never persists envelopes. A handler that wants durability writes
//! through this trait; the concrete backend is supplied by the host
//! application. [`MemoryStore`] covers tests and single-context use.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value as JsonValue;

/// Storage operation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Backend-reported failure.
    #[error("store backend error: {0}")]
    Backend(String),
    /// Value could not be encoded or decoded.
    #[error("store serialization error: {0}")]
    Serialization(String),
}

/// Minimal async key-value interface consumed by durable handlers.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Write a value under a key, replacing any previous value.
    async fn put(&self, key: &str, value: JsonValue) -> Result<(), StoreError>;

    /// Read the value for a key, if present.
    async fn get(&self, key: &str) -> Result<Option<JsonValue>, StoreError>;
}

/// In-memory store for tests and single-process wiring.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, JsonValue>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn put(&self, key: &str, value: JsonValue) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<JsonValue>, StoreError> {
        Ok(self.entries.get(key).map(|v| v.clone()))
    }
}
