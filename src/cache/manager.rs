//! Per-provider result cache.

use super::backend::{CacheBackend, MemoryCache};
use super::key::CacheKey;
use crate::provider::Parameters;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const DEFAULT_MAX_ENTRIES: usize = 1024;

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
}

impl AtomicStats {
    fn to_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
        }
    }
}

/// Successful results of one provider, kept for the provider's `cache_ttl`.
pub struct ResultCache {
    ttl: Duration,
    backend: Box<dyn CacheBackend>,
    stats: AtomicStats,
}

impl ResultCache {
    fn new(ttl: Duration, backend: Box<dyn CacheBackend>) -> Self {
        Self {
            ttl,
            backend,
            stats: AtomicStats::default(),
        }
    }

    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(ttl, Box::new(MemoryCache::new(DEFAULT_MAX_ENTRIES)))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(
        &self,
        service: &str,
        provider: &str,
        params: &Parameters,
    ) -> Option<serde_json::Value> {
        let key = CacheKey::for_call(service, provider, params);
        let hit = self.backend.get(&key).await;
        let counter = if hit.is_some() {
            &self.stats.hits
        } else {
            &self.stats.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        hit
    }

    pub async fn put(
        &self,
        service: &str,
        provider: &str,
        params: &Parameters,
        value: serde_json::Value,
    ) {
        let key = CacheKey::for_call(service, provider, params);
        self.backend.set(&key, value, self.ttl).await;
        self.stats.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.to_stats()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("ttl", &self.ttl)
            .field("backend", &self.backend.name())
            .finish()
    }
}
