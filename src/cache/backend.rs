//! Cache backend implementations.

use super::key::CacheKey;
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Storage for cached provider results.
///
/// Backends are best-effort: a lookup that cannot be served is a miss.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Option<serde_json::Value>;
    async fn set(&self, key: &CacheKey, value: serde_json::Value, ttl: Duration);
    fn name(&self) -> &'static str;
}

#[derive(Debug)]
struct CacheEntry {
    value: serde_json::Value,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Bounded in-memory cache with least-recently-used eviction.
pub struct MemoryCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Option<serde_json::Value> {
        let now = Instant::now();
        let mut entries = self.lock();
        let expired = match entries.get(key.as_str()) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key.as_str());
        }
        None
    }

    async fn set(&self, key: &CacheKey, value: serde_json::Value, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.lock().put(key.as_str().to_string(), entry);
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
