//! Shared fixtures for integration tests.
#![allow(dead_code)]

pub mod mock_server;

use async_trait::async_trait;
use provider_failover::{
    FailoverOrchestrator, Parameters, Provider, ProviderConfig, ProviderError, ProviderRegistry,
    ServiceRegistration,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Opt-in test logging: `RUST_LOG=provider_failover=debug cargo test`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Ok(Value),
    Fail(String),
    /// Never completes; only a timeout ends the attempt.
    Hang,
}

/// Provider whose attempts follow a script. Once the script is used up every
/// attempt gets the fallback outcome.
pub struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<Outcome>>,
    fallback: Outcome,
    delay: Duration,
    healthy: AtomicBool,
    calls: AtomicU32,
    in_flight: AtomicU32,
    peak_in_flight: AtomicU32,
}

impl ScriptedProvider {
    pub fn new(name: &str, fallback: Outcome) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            fallback,
            delay: Duration::ZERO,
            healthy: AtomicBool::new(true),
            calls: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            peak_in_flight: AtomicU32::new(0),
        }
    }

    /// Always answers `{"provider": name}`.
    pub fn healthy(name: &str) -> Arc<Self> {
        Arc::new(Self::new(name, Outcome::Ok(json!({ "provider": name }))))
    }

    /// Always fails.
    pub fn broken(name: &str) -> Arc<Self> {
        Arc::new(Self::new(name, Outcome::Fail(format!("{} is down", name))))
    }

    pub fn with_script(self, outcomes: impl IntoIterator<Item = Outcome>) -> Self {
        *self.script.lock().unwrap() = outcomes.into_iter().collect();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> u32 {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> Outcome {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

struct InFlight<'a>(&'a AtomicU32);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _params: &Parameters) -> Result<Value, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let outcome = self.next_outcome();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match outcome {
            Outcome::Ok(v) => Ok(v),
            Outcome::Fail(msg) => Err(ProviderError::failed(msg)),
            Outcome::Hang => std::future::pending().await,
        }
    }

    async fn health_check(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

/// Orchestrator over a single service built from `(config, provider)` pairs.
pub fn orchestrator_for(
    service: &str,
    providers: Vec<(ProviderConfig, Arc<ScriptedProvider>)>,
) -> FailoverOrchestrator {
    let mut builder = ServiceRegistration::builder(service);
    for (cfg, p) in providers {
        builder = builder.provider(cfg, p);
    }
    let registry = ProviderRegistry::new();
    registry.register(builder.build().expect("valid service"));
    FailoverOrchestrator::new(Arc::new(registry))
}

pub fn params(pairs: &[(&str, &str)]) -> Parameters {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect()
}
