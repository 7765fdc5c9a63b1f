//! Per-provider counters and timers.
//!
//! Recording and reading are lock-free; a snapshot never blocks the call path.

use crate::resilience::LimitKind;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub errors: u64,
    pub total_duration_us: u64,
    /// Unix epoch milliseconds of the last completed request.
    pub last_request_unix_ms: Option<u64>,
    pub retries: u64,
    pub cache_hits: u64,
    pub rate_limited: u64,
    pub circuit_open: u64,
}

impl MetricsSnapshot {
    pub fn error_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.errors as f64 / self.requests as f64
        }
    }

    pub fn avg_duration(&self) -> Duration {
        if self.requests == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(self.total_duration_us / self.requests)
        }
    }

    /// Flat counter/gauge view for an external metrics system.
    pub fn to_flat(&self) -> BTreeMap<String, f64> {
        let mut m = BTreeMap::new();
        m.insert("requests_total".to_string(), self.requests as f64);
        m.insert("errors_total".to_string(), self.errors as f64);
        m.insert("retries_total".to_string(), self.retries as f64);
        m.insert("cache_hits_total".to_string(), self.cache_hits as f64);
        m.insert("rate_limited_total".to_string(), self.rate_limited as f64);
        m.insert("circuit_open_total".to_string(), self.circuit_open as f64);
        m.insert("error_rate".to_string(), self.error_rate());
        m.insert(
            "avg_duration_ms".to_string(),
            self.avg_duration().as_secs_f64() * 1000.0,
        );
        if let Some(ts) = self.last_request_unix_ms {
            m.insert("last_request_unix_ms".to_string(), ts as f64);
        }
        m
    }
}

/// Why a call skipped a provider without invoking it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    RateLimited(LimitKind),
    CircuitOpen,
}

#[derive(Debug, Default)]
pub struct MetricsCollector {
    requests: AtomicU64,
    errors: AtomicU64,
    total_duration_us: AtomicU64,
    last_request_unix_ms: AtomicU64,
    retries: AtomicU64,
    cache_hits: AtomicU64,
    rate_limited: AtomicU64,
    circuit_open: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_request(&self, duration: Duration) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.total_duration_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.last_request_unix_ms
            .store(now_unix_ms(), Ordering::Relaxed);
    }

    pub fn record_success(&self, duration: Duration) {
        self.record_request(duration);
    }

    pub fn record_failure(&self, duration: Duration) {
        self.record_request(duration);
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retries(&self, n: u32) {
        if n > 0 {
            self.retries.fetch_add(u64::from(n), Ordering::Relaxed);
        }
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejection(&self, rejection: Rejection) {
        match rejection {
            Rejection::RateLimited(_) => self.rate_limited.fetch_add(1, Ordering::Relaxed),
            Rejection::CircuitOpen => self.circuit_open.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let last = self.last_request_unix_ms.load(Ordering::Relaxed);
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            total_duration_us: self.total_duration_us.load(Ordering::Relaxed),
            last_request_unix_ms: (last > 0).then_some(last),
            retries: self.retries.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            circuit_open: self.circuit_open.load(Ordering::Relaxed),
        }
    }
}

/// Metrics for one provider of one service, as exported to observability tooling.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderMetricsRecord {
    pub service: String,
    pub provider: String,
    pub metrics: MetricsSnapshot,
}

impl ProviderMetricsRecord {
    /// Flat samples named `<service>.<provider>.<metric>`.
    pub fn to_flat(&self) -> BTreeMap<String, f64> {
        self.metrics
            .to_flat()
            .into_iter()
            .map(|(k, v)| (format!("{}.{}.{}", self.service, self.provider, k), v))
            .collect()
    }
}
