//! Pluggable key–value persistence used by the local-style adapters.

use std::sync::Arc;

use dashmap::DashMap;

/// Host-supplied key–value store (browser local storage, a file, ...).
///
/// Values are opaque strings; the adapters store JSON documents. The store
/// is treated as process-global: adapters derive deterministic,
/// collision-free keys (e.g. `mockapi:<entity>:data`).
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
    fn remove(&self, key: &str);
    fn keys(&self) -> Vec<String>;
}

/// Default in-process [`KeyValueStore`] backed by `DashMap`.
#[derive(Clone, Default)]
pub struct MemoryKeyValueStore {
    inner: Arc<DashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).map(|entry| entry.value().clone())
    }

    fn set(&self, key: &str, value: String) {
        self.inner.insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.inner.remove(key);
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}
