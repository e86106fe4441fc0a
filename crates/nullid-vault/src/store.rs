//! Durable key-value store contract and in-memory backend.
//!
//! Persistence mechanics live outside this crate: the vault talks to any
//! backend through [`DurableStore`] and surfaces the capability probe to the
//! user instead of failing over silently. The in-memory implementation backs
//! tests and acts as the last-resort fallback.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::Result;

/// Which backend is active and, when it is a fallback, why the primary one
/// is not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCapability {
    pub backend: String,
    pub fallback_reason: Option<String>,
}

/// Key-value persistence grouped into named stores.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn put(&self, store: &str, key: &str, value: &str) -> Result<()>;
    async fn get(&self, store: &str, key: &str) -> Result<Option<String>>;
    async fn delete(&self, store: &str, key: &str) -> Result<()>;
    async fn clear(&self, store: &str) -> Result<()>;

    /// Capability probe. Callers are expected to show the fallback reason to
    /// the user rather than swallow it.
    fn capability(&self) -> StoreCapability;
}

/// Interior mutability via `parking_lot::Mutex`; uncontended locks are
/// near-zero overhead and the map is only touched inside short sections.
pub struct MemoryStore {
    stores: Mutex<HashMap<String, HashMap<String, String>>>,
    fallback_reason: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            stores: Mutex::new(HashMap::new()),
            fallback_reason: None,
        }
    }

    /// An in-memory store standing in for an unavailable primary backend.
    /// The reason is reported by the capability probe.
    pub fn with_fallback_reason(reason: impl Into<String>) -> Self {
        Self {
            stores: Mutex::new(HashMap::new()),
            fallback_reason: Some(reason.into()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn put(&self, store: &str, key: &str, value: &str) -> Result<()> {
        self.stores
            .lock()
            .entry(store.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, store: &str, key: &str) -> Result<Option<String>> {
        Ok(self
            .stores
            .lock()
            .get(store)
            .and_then(|s| s.get(key))
            .cloned())
    }

    async fn delete(&self, store: &str, key: &str) -> Result<()> {
        if let Some(s) = self.stores.lock().get_mut(store) {
            s.remove(key);
        }
        Ok(())
    }

    async fn clear(&self, store: &str) -> Result<()> {
        self.stores.lock().remove(store);
        Ok(())
    }

    fn capability(&self) -> StoreCapability {
        StoreCapability {
            backend: "memory".to_string(),
            fallback_reason: self.fallback_reason.clone(),
        }
    }
}
