//! Failover orchestrator.
//!
//! For one logical service, walks the registry's providers in priority order:
//!
//! ```text
//! for each enabled provider:
//!     cached result?            → return it
//!     rate limiter admission    → rejected: record "rate limited", next provider
//!     circuit breaker admission → rejected: record "circuit open", next provider
//!     execute with retry + per-attempt timeout
//!         success → record, close/reset breaker, return
//!         failure → record, count one breaker failure, next provider
//! all exhausted → AllProvidersFailed with one entry per provider considered
//! ```
//!
//! Admission rejections are local control decisions: they never touch the
//! breaker's failure counter and are never retried.

mod health;

pub use health::{ProviderHealth, ServiceHealth};

use crate::error::{FailureReason, ProviderFailure};
use crate::metrics::{ProviderMetricsRecord, Rejection};
use crate::provider::{Parameters, ProviderError};
use crate::registry::{ProviderEntry, ProviderRegistry};
use crate::resilience::CircuitState;
use crate::telemetry::{noop_sink, EventSink, FailoverEvent};
use crate::{Error, Result};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Per-call statistics for observability and provider selection tuning.
#[derive(Debug, Clone)]
pub struct CallStats {
    pub call_id: String,
    pub service: String,
    /// Provider that served the result.
    pub provider: String,
    /// Attempts made against the serving provider (0 for a cache hit).
    pub attempts: u32,
    /// Enabled providers considered, including the one that served.
    pub providers_tried: usize,
    pub duration: Duration,
    pub cached: bool,
    /// Why each more-preferred provider did not serve, in priority order.
    pub failovers: Vec<ProviderFailure>,
}

enum Visit {
    Served {
        value: serde_json::Value,
        attempts: u32,
        cached: bool,
    },
    Skipped(FailureReason),
    Failed {
        reason: FailureReason,
        attempts: u32,
    },
}

pub struct FailoverOrchestrator {
    registry: Arc<ProviderRegistry>,
    events: Arc<dyn EventSink>,
}

impl FailoverOrchestrator {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            events: noop_sink(),
        }
    }

    /// Inject an event sink. Default is a no-op sink.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Call `service`, failing over across its providers.
    ///
    /// Fails with [`Error::ServiceNotFound`] when the service is unknown or has
    /// no enabled provider, and with [`Error::AllProvidersFailed`] when every
    /// enabled provider was skipped or failed.
    pub async fn call(&self, service: &str, params: &Parameters) -> Result<serde_json::Value> {
        Ok(self.call_with_stats(service, params).await?.0)
    }

    /// Like [`call`](Self::call), also returning per-call stats.
    pub async fn call_with_stats(
        &self,
        service: &str,
        params: &Parameters,
    ) -> Result<(serde_json::Value, CallStats)> {
        let registration = self
            .registry
            .service(service)
            .filter(|s| s.enabled_count() > 0)
            .ok_or_else(|| {
                debug!(service, "no enabled providers registered");
                Error::service_not_found(service)
            })?;

        let call_id = Uuid::new_v4().to_string();
        let start = Instant::now();
        let mut failures: Vec<ProviderFailure> = Vec::new();
        let mut first_enabled: Option<&str> = None;

        for entry in registration.providers() {
            if !entry.is_enabled() {
                debug!(service, provider = entry.name(), "skipping disabled provider");
                continue;
            }
            let preferred = *first_enabled.get_or_insert(entry.name());

            match self.visit(service, entry, params).await {
                Visit::Served {
                    value,
                    attempts,
                    cached,
                } => {
                    let duration = start.elapsed();
                    if entry.name() != preferred {
                        info!(
                            service,
                            from = preferred,
                            to = entry.name(),
                            skipped = failures.len(),
                            "failed over to lower-priority provider"
                        );
                        self.events
                            .report(FailoverEvent::FailedOver {
                                call_id: call_id.clone(),
                                service: service.to_string(),
                                from: preferred.to_string(),
                                to: entry.name().to_string(),
                            })
                            .await;
                    }
                    self.events
                        .report(FailoverEvent::CallSucceeded {
                            call_id: call_id.clone(),
                            service: service.to_string(),
                            provider: entry.name().to_string(),
                            duration_ms: duration.as_millis() as u64,
                            cached,
                        })
                        .await;

                    let stats = CallStats {
                        call_id,
                        service: service.to_string(),
                        provider: entry.name().to_string(),
                        attempts,
                        providers_tried: failures.len() + 1,
                        duration,
                        cached,
                        failovers: failures,
                    };
                    return Ok((value, stats));
                }
                Visit::Skipped(reason) => {
                    self.events
                        .report(FailoverEvent::ProviderSkipped {
                            call_id: call_id.clone(),
                            service: service.to_string(),
                            provider: entry.name().to_string(),
                            reason: reason.to_string(),
                        })
                        .await;
                    failures.push(ProviderFailure::new(entry.name(), reason));
                }
                Visit::Failed { reason, attempts } => {
                    self.events
                        .report(FailoverEvent::ProviderFailed {
                            call_id: call_id.clone(),
                            service: service.to_string(),
                            provider: entry.name().to_string(),
                            attempts,
                            error: reason.to_string(),
                        })
                        .await;
                    failures.push(ProviderFailure::new(entry.name(), reason));
                }
            }
        }

        warn!(
            service,
            providers_tried = failures.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "all providers failed"
        );
        self.events
            .report(FailoverEvent::CallFailed {
                call_id,
                service: service.to_string(),
                providers_tried: failures.len(),
            })
            .await;
        Err(Error::AllProvidersFailed {
            service: service.to_string(),
            failures,
        })
    }

    /// One provider's turn within a call.
    async fn visit(&self, service: &str, entry: &ProviderEntry, params: &Parameters) -> Visit {
        let name = entry.name();

        if let Some(cache) = entry.cache() {
            if let Some(value) = cache.get(service, name, params).await {
                debug!(service, provider = name, "served from result cache");
                entry.metrics().record_cache_hit();
                return Visit::Served {
                    value,
                    attempts: 0,
                    cached: true,
                };
            }
        }

        let rate_permit = match entry.limiter().try_acquire() {
            Ok(p) => p,
            Err(rejection) => {
                debug!(
                    service,
                    provider = name,
                    window = %rejection.limit,
                    "rate limit admission rejected"
                );
                entry
                    .metrics()
                    .record_rejection(Rejection::RateLimited(rejection.limit));
                return Visit::Skipped(FailureReason::RateLimited {
                    window: rejection.limit.to_string(),
                });
            }
        };

        let circuit_permit = match entry.breaker().try_acquire() {
            Ok(p) => p,
            Err(rejection) => {
                debug!(
                    service,
                    provider = name,
                    retry_in_ms = rejection.retry_in.as_millis() as u64,
                    "circuit open, skipping provider"
                );
                rate_permit.refund();
                entry.metrics().record_rejection(Rejection::CircuitOpen);
                return Visit::Skipped(FailureReason::CircuitOpen);
            }
        };
        if circuit_permit.is_probe() {
            info!(service, provider = name, "circuit half-open, probing provider");
        }

        let provider = entry.provider();
        let started = Instant::now();
        let outcome = entry
            .retry_policy()
            .run(entry.config().timeout(), |_attempt| provider.execute(params))
            .await;
        let elapsed = started.elapsed();
        drop(rate_permit);

        entry
            .metrics()
            .record_retries(outcome.attempts.saturating_sub(1));

        match outcome.result {
            Ok(value) => {
                entry.metrics().record_success(elapsed);
                let was_probe = circuit_permit.is_probe();
                circuit_permit.success();
                if was_probe {
                    info!(service, provider = name, "probe succeeded, circuit closed");
                }
                if let Some(cache) = entry.cache() {
                    cache.put(service, name, params, value.clone()).await;
                }
                Visit::Served {
                    value,
                    attempts: outcome.attempts,
                    cached: false,
                }
            }
            Err(e) => {
                entry.metrics().record_failure(elapsed);
                let before = entry.breaker().state();
                circuit_permit.failure();
                if before != CircuitState::Open && entry.breaker().state() == CircuitState::Open {
                    warn!(
                        service,
                        provider = name,
                        failures = entry.breaker().snapshot().consecutive_failures,
                        "circuit opened"
                    );
                }
                warn!(
                    service,
                    provider = name,
                    attempts = outcome.attempts,
                    duration_ms = elapsed.as_millis() as u64,
                    error = %e,
                    "provider failed after retries"
                );
                let reason = match e {
                    ProviderError::Timeout { after } => FailureReason::Timeout { after },
                    other => FailureReason::Provider {
                        message: other.to_string(),
                    },
                };
                Visit::Failed {
                    reason,
                    attempts: outcome.attempts,
                }
            }
        }
    }

    /// Probe every provider of `service` concurrently and collect its state.
    ///
    /// Health probes never touch breaker, limiter or metrics state. A probe that
    /// panics or outlives the provider's timeout reports unhealthy.
    pub async fn service_health(&self, service: &str) -> Result<ServiceHealth> {
        let registration = self
            .registry
            .service(service)
            .ok_or_else(|| Error::service_not_found(service))?;

        let checks = registration.providers().iter().map(|entry| async move {
            let healthy = Self::probe(service, entry).await;
            ProviderHealth::collect(entry, healthy)
        });
        let providers = futures::future::join_all(checks).await;

        Ok(ServiceHealth {
            service: service.to_string(),
            providers,
        })
    }

    async fn probe(service: &str, entry: &ProviderEntry) -> bool {
        let check = AssertUnwindSafe(entry.provider().health_check()).catch_unwind();
        match tokio::time::timeout(entry.config().timeout(), check).await {
            Ok(Ok(healthy)) => healthy,
            Ok(Err(_)) => {
                warn!(service, provider = entry.name(), "health check panicked");
                false
            }
            Err(_) => {
                warn!(service, provider = entry.name(), "health check timed out");
                false
            }
        }
    }

    /// Flat metrics of every registered provider.
    pub fn metrics_snapshot(&self) -> Vec<ProviderMetricsRecord> {
        self.registry.metrics_snapshot()
    }
}
