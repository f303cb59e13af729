//! In-memory TTL cache for read responses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) < self.ttl
    }
}

#[derive(Debug)]
struct CacheInner {
    map: HashMap<String, CacheEntry>,
    default_ttl: Duration,
    enabled: bool,
}

impl CacheInner {
    fn new(default_ttl: Duration, enabled: bool) -> Self {
        Self {
            map: HashMap::new(),
            default_ttl,
            enabled,
        }
    }

    fn get(&self, key: &str) -> Option<Value> {
        if !self.enabled {
            return None;
        }

        let now = Instant::now();
        self.map
            .get(key)
            .filter(|entry| entry.is_fresh(now))
            .map(|entry| entry.value.clone())
    }

    fn put(&mut self, key: String, value: Value, ttl_override: Option<Duration>) {
        let ttl = ttl_override.unwrap_or(self.default_ttl);
        self.map.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                ttl,
            },
        );
    }

    fn clear_expired(&mut self) {
        let now = Instant::now();
        self.map.retain(|_, entry| entry.is_fresh(now));
    }
}

/// Shared TTL cache. Entries expire lazily: freshness is checked on read,
/// never by a background sweep.
///
/// Disabling the cache makes `get` miss and `set` a no-op without purging
/// what is stored; entries that are still fresh reappear on `enable`.
#[derive(Debug, Clone)]
pub struct CacheStore {
    inner: Arc<tokio::sync::RwLock<CacheInner>>,
}

impl CacheStore {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(tokio::sync::RwLock::new(CacheInner::new(default_ttl, true))),
        }
    }

    /// Five minute TTL.
    pub fn with_default_ttl() -> Self {
        Self::new(Duration::from_secs(300))
    }

    /// A store that starts disabled but keeps its TTL for a later `enable`.
    pub fn disabled(default_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(tokio::sync::RwLock::new(CacheInner::new(
                default_ttl,
                false,
            ))),
        }
    }

    /// Returns the value stored under `key` if the cache is enabled and the
    /// entry is younger than its TTL.
    pub async fn get(&self, key: &str) -> Option<Value> {
        self.inner.read().await.get(key)
    }

    /// Store with the default TTL. No-op while disabled.
    pub async fn set(&self, key: impl Into<String>, value: Value) {
        self.set_with_ttl(key, value, None).await;
    }

    pub async fn set_with_ttl(
        &self,
        key: impl Into<String>,
        value: Value,
        ttl_override: Option<Duration>,
    ) {
        let mut store = self.inner.write().await;
        if !store.enabled {
            return;
        }
        store.put(key.into(), value, ttl_override);
    }

    /// Remove a single key. Returns whether an entry was present.
    pub async fn invalidate(&self, key: &str) -> bool {
        self.inner.write().await.map.remove(key).is_some()
    }

    /// Remove every key starting with `prefix`. Returns how many were removed.
    pub async fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut store = self.inner.write().await;
        let before = store.map.len();
        store.map.retain(|key, _| !key.starts_with(prefix));
        before - store.map.len()
    }

    pub async fn enable(&self) {
        self.inner.write().await.enabled = true;
    }

    pub async fn disable(&self) {
        self.inner.write().await.enabled = false;
    }

    pub async fn is_enabled(&self) -> bool {
        self.inner.read().await.enabled
    }

    pub async fn clear_expired(&self) {
        self.inner.write().await.clear_expired();
    }

    /// Purge everything regardless of the enabled flag.
    pub async fn clear(&self) {
        self.inner.write().await.map.clear();
    }

    /// Number of stored entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.inner.read().await.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn default_ttl(&self) -> Duration {
        self.inner.read().await.default_ttl
    }
}
