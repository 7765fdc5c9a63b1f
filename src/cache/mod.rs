//! Provider result caching.
//!
//! Providers configured with a non-zero `cache_ttl_ms` get a [`ResultCache`].
//! The orchestrator consults it before spending rate-limit budget on that
//! provider and stores every successful result it returns.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`ResultCache`] | TTL cache for one provider over a bounded in-memory LRU, with hit/miss statistics |
//! | [`CacheKey`] | SHA-256 key over service, provider and parameters |

mod backend;
mod key;
mod manager;

pub use key::CacheKey;
pub use manager::{CacheStats, ResultCache};
