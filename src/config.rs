//! Provider and service configuration.
//!
//! These types are handed to the registry by an external loader that has already
//! read and validated configuration files; they only derive `Deserialize` so the
//! loader can use whichever format it likes.

use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::resilience::retry::{Backoff, RetryPolicy};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Opaque provider-specific parameters (endpoint, credentials, vendor options).
pub type ProviderParams = serde_json::Map<String, serde_json::Value>;

/// Request budget for one provider. A window limit of `0` means unlimited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimits {
    pub requests_per_minute: u32,
    pub requests_per_hour: u32,
    pub requests_per_day: Option<u32>,
    pub max_concurrent: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            requests_per_hour: 1000,
            requests_per_day: None,
            max_concurrent: 10,
        }
    }
}

impl RateLimits {
    /// No window limits, only the given concurrency cap.
    pub fn unlimited(max_concurrent: u32) -> Self {
        Self {
            requests_per_minute: 0,
            requests_per_hour: 0,
            requests_per_day: None,
            max_concurrent,
        }
    }

    pub fn with_per_minute(mut self, n: u32) -> Self {
        self.requests_per_minute = n;
        self
    }

    pub fn with_per_hour(mut self, n: u32) -> Self {
        self.requests_per_hour = n;
        self
    }

    pub fn with_per_day(mut self, n: u32) -> Self {
        self.requests_per_day = Some(n);
        self
    }

    pub fn with_max_concurrent(mut self, n: u32) -> Self {
        self.max_concurrent = n;
        self
    }
}

/// Retry delay strategy as it appears in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryBackoff {
    #[default]
    Fixed,
    Exponential,
}

/// Per-provider overrides of the global circuit breaker defaults.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerOverride {
    pub failure_threshold: Option<u32>,
    pub cooldown_ms: Option<u64>,
}

/// Identity and call tuning for one provider instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    /// Variant tag resolved by the provider factory (e.g. "http").
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub retry_backoff: RetryBackoff,
    /// Cap for exponential backoff; ignored for fixed delays.
    #[serde(default)]
    pub max_retry_delay_ms: Option<u64>,
    /// Result cache lifetime; `0` disables caching for this provider.
    #[serde(default)]
    pub cache_ttl_ms: u64,
    #[serde(default)]
    pub rate_limits: RateLimits,
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerOverride>,
    #[serde(default)]
    pub params: ProviderParams,
}

fn default_kind() -> String {
    "http".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: default_kind(),
            enabled: true,
            timeout_ms: default_timeout_ms(),
            retry_count: 0,
            retry_delay_ms: 0,
            retry_backoff: RetryBackoff::Fixed,
            max_retry_delay_ms: None,
            cache_ttl_ms: 0,
            rate_limits: RateLimits::default(),
            circuit_breaker: None,
            params: ProviderParams::new(),
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_retries(mut self, count: u32, delay: Duration) -> Self {
        self.retry_count = count;
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_exponential_backoff(mut self, max_delay: Duration) -> Self {
        self.retry_backoff = RetryBackoff::Exponential;
        self.max_retry_delay_ms = Some(max_delay.as_millis() as u64);
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_ms = ttl.as_millis() as u64;
        self
    }

    pub fn with_rate_limits(mut self, limits: RateLimits) -> Self {
        self.rate_limits = limits;
        self
    }

    pub fn with_circuit_breaker(mut self, threshold: u32, cooldown: Duration) -> Self {
        self.circuit_breaker = Some(CircuitBreakerOverride {
            failure_threshold: Some(threshold),
            cooldown_ms: Some(cooldown.as_millis() as u64),
        });
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        (self.cache_ttl_ms > 0).then(|| Duration::from_millis(self.cache_ttl_ms))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let delay = Duration::from_millis(self.retry_delay_ms);
        let backoff = match self.retry_backoff {
            RetryBackoff::Fixed => Backoff::Fixed,
            RetryBackoff::Exponential => Backoff::Exponential {
                max_delay: self
                    .max_retry_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(delay.saturating_mul(8)),
            },
        };
        RetryPolicy::new(self.retry_count, delay).with_backoff(backoff)
    }

    /// Effective breaker settings: per-provider overrides on top of the defaults.
    pub fn breaker_config(&self, defaults: &CircuitBreakerConfig) -> CircuitBreakerConfig {
        let mut cfg = defaults.clone();
        if let Some(o) = &self.circuit_breaker {
            if let Some(t) = o.failure_threshold {
                cfg.failure_threshold = t.max(1);
            }
            if let Some(ms) = o.cooldown_ms {
                cfg.cooldown = Duration::from_millis(ms);
            }
        }
        cfg
    }

    fn validate(&self, field_path: &str) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::configuration_with_context(
                "provider name must not be empty",
                ErrorContext::new()
                    .with_field_path(format!("{}.name", field_path))
                    .with_source("config"),
            ));
        }
        if self.rate_limits.max_concurrent == 0 {
            return Err(Error::configuration_with_context(
                "max_concurrent must be at least 1",
                ErrorContext::new()
                    .with_field_path(format!("{}.rate_limits.max_concurrent", field_path))
                    .with_source("config"),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(Error::configuration_with_context(
                "timeout_ms must be greater than zero",
                ErrorContext::new()
                    .with_field_path(format!("{}.timeout_ms", field_path))
                    .with_source("config"),
            ));
        }
        Ok(())
    }
}

/// Ordered provider list for one logical service; first entry is most preferred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl ServiceConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            providers: Vec::new(),
        }
    }

    pub fn with_provider(mut self, provider: ProviderConfig) -> Self {
        self.providers.push(provider);
        self
    }

    /// Checks provider name uniqueness and per-provider invariants.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for (idx, p) in self.providers.iter().enumerate() {
            let path = format!("services.{}.providers[{}]", self.name, idx);
            p.validate(&path)?;
            if !seen.insert(p.name.as_str()) {
                return Err(Error::configuration_with_context(
                    format!("duplicate provider name '{}'", p.name),
                    ErrorContext::new()
                        .with_field_path(format!("{}.name", path))
                        .with_source("config"),
                ));
            }
        }
        Ok(())
    }
}

/// Top-level input to the registry.
///
/// When no breaker section is given, defaults come from
/// [`CircuitBreakerConfig::from_env`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default = "CircuitBreakerConfig::from_env")]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerConfig::from_env(),
            services: Vec::new(),
        }
    }
}

impl ResilienceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_circuit_breaker(mut self, cfg: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = cfg;
        self
    }

    pub fn with_service(mut self, service: ServiceConfig) -> Self {
        self.services.push(service);
        self
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for s in &self.services {
            if !seen.insert(s.name.as_str()) {
                return Err(Error::configuration_with_context(
                    format!("duplicate service name '{}'", s.name),
                    ErrorContext::new()
                        .with_field_path("services")
                        .with_source("config"),
                ));
            }
            s.validate()?;
        }
        Ok(())
    }
}
