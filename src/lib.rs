//! # provider-failover
//!
//! Resilient multi-provider invocation for logical services.
//!
//! An application calls a logical service ("email", "sms", "payments") and this
//! crate picks a concrete provider for it: the most preferred one that is
//! enabled, within its rate limits and not behind an open circuit. Failures are
//! retried per provider, then failed over down the priority list. When nothing
//! can serve, the caller gets one error listing why each provider was passed
//! over.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use provider_failover::{
//!     FailoverOrchestrator, Parameters, ProviderKinds, ProviderRegistry, ResilienceConfig,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> provider_failover::Result<()> {
//!     let config: ResilienceConfig = serde_json::from_str(
//!         r#"{
//!             "services": [{
//!                 "name": "email",
//!                 "providers": [
//!                     {"name": "primary", "params": {"base_url": "https://mail-a.example"}},
//!                     {"name": "backup", "params": {"base_url": "https://mail-b.example"}}
//!                 ]
//!             }]
//!         }"#,
//!     )
//!     .expect("valid config");
//!
//!     let registry = Arc::new(ProviderRegistry::from_config(&config, &ProviderKinds::new())?);
//!     let orchestrator = FailoverOrchestrator::new(registry);
//!
//!     let mut params = Parameters::new();
//!     params.insert("to".into(), "ops@example.com".into());
//!     let receipt = orchestrator.call("email", &params).await?;
//!     println!("{receipt}");
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`failover`] | Orchestrator: priority walk, admission, retry, aggregation |
//! | [`registry`] | Service name → ordered provider entries with runtime state |
//! | [`provider`] | Provider trait, HTTP provider and kind-tag factory |
//! | [`resilience`] | Circuit breaker, rate limiter and retry policy |
//! | [`metrics`] | Per-provider counters and flat export |
//! | [`cache`] | Optional per-provider result cache |
//! | [`telemetry`] | Failover events and sinks |
//! | [`config`] | Declarative configuration |

pub mod cache;
pub mod config;
pub mod error;
pub mod failover;
pub mod metrics;
pub mod provider;
pub mod registry;
pub mod resilience;
pub mod telemetry;

pub use config::{ProviderConfig, RateLimits, ResilienceConfig, ServiceConfig};
pub use error::{Error, ErrorContext, FailureReason, ProviderFailure};
pub use failover::{CallStats, FailoverOrchestrator, ProviderHealth, ServiceHealth};
pub use metrics::{MetricsSnapshot, ProviderMetricsRecord};
pub use provider::{
    HttpProvider, Parameters, Provider, ProviderError, ProviderFactory, ProviderKinds,
};
pub use registry::{ProviderEntry, ProviderRegistry, ServiceRegistration};
pub use resilience::{CircuitBreakerConfig, CircuitState};

/// Result type alias for the library.
pub type Result<T> = std::result::Result<T, Error>;
