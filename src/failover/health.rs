//! Read-only health view of a service.

use crate::metrics::MetricsSnapshot;
use crate::registry::ProviderEntry;
use crate::resilience::{CircuitBreakerSnapshot, CircuitState, RateLimiterSnapshot};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub name: String,
    pub enabled: bool,
    /// Result of the provider's own health check.
    pub healthy: bool,
    pub circuit: CircuitBreakerSnapshot,
    pub rate_limiter: RateLimiterSnapshot,
    /// Metrics recorded by the orchestrator.
    pub metrics: MetricsSnapshot,
    /// Metrics the provider reports about itself, if any.
    pub provider_metrics: Option<MetricsSnapshot>,
}

impl ProviderHealth {
    pub(crate) fn collect(entry: &ProviderEntry, healthy: bool) -> Self {
        Self {
            name: entry.name().to_string(),
            enabled: entry.is_enabled(),
            healthy,
            circuit: entry.breaker().snapshot(),
            rate_limiter: entry.limiter().snapshot(),
            metrics: entry.metrics().snapshot(),
            provider_metrics: entry.provider().metrics(),
        }
    }

    /// Enabled, reporting healthy and not currently fast-failing.
    pub fn is_available(&self) -> bool {
        self.enabled && self.healthy && self.circuit.state != CircuitState::Open
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub service: String,
    /// Providers in priority order.
    pub providers: Vec<ProviderHealth>,
}

impl ServiceHealth {
    pub fn provider(&self, name: &str) -> Option<&ProviderHealth> {
        self.providers.iter().find(|p| p.name == name)
    }

    /// Whether at least one provider could currently serve a call.
    pub fn is_available(&self) -> bool {
        self.providers.iter().any(ProviderHealth::is_available)
    }
}
