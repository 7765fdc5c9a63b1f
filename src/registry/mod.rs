//! Provider registry: logical service name → ordered provider entries.
//!
//! The service map is read on every call and replaced only on (re)configuration,
//! so it lives behind an `ArcSwap`: readers never take a lock, writers swap in a
//! whole new map. Each [`ProviderEntry`] owns its own breaker, limiter, metrics
//! and cache; traffic to one provider never contends with another.

use crate::cache::ResultCache;
use crate::config::{ProviderConfig, ResilienceConfig, ServiceConfig};
use crate::metrics::{MetricsCollector, ProviderMetricsRecord};
use crate::provider::{Provider, ProviderFactory};
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, RateLimiter, RetryPolicy};
use crate::Result;
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// One configured provider together with its runtime state.
pub struct ProviderEntry {
    config: ProviderConfig,
    provider: Arc<dyn Provider>,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
    limiter: RateLimiter,
    metrics: MetricsCollector,
    cache: Option<ResultCache>,
}

impl ProviderEntry {
    pub fn new(
        config: ProviderConfig,
        provider: Arc<dyn Provider>,
        breaker_defaults: &CircuitBreakerConfig,
    ) -> Self {
        Self {
            retry: config.retry_policy(),
            breaker: CircuitBreaker::new(config.breaker_config(breaker_defaults)),
            limiter: RateLimiter::new(&config.rate_limits),
            metrics: MetricsCollector::new(),
            cache: config.cache_ttl().map(ResultCache::in_memory),
            config,
            provider,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn cache(&self) -> Option<&ResultCache> {
        self.cache.as_ref()
    }

    /// Whether this entry's runtime state can be carried over to `config`.
    fn matches(&self, config: &ProviderConfig, breaker_defaults: &CircuitBreakerConfig) -> bool {
        &self.config == config
            && self.breaker.config() == &config.breaker_config(breaker_defaults)
    }
}

impl fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("name", &self.config.name)
            .field("enabled", &self.config.enabled)
            .field("state", &self.breaker.state())
            .finish()
    }
}

/// A logical service and its providers in failover priority order.
#[derive(Debug)]
pub struct ServiceRegistration {
    name: String,
    providers: Vec<Arc<ProviderEntry>>,
}

impl ServiceRegistration {
    pub fn builder(name: impl Into<String>) -> ServiceBuilder {
        ServiceBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn providers(&self) -> &[Arc<ProviderEntry>] {
        &self.providers
    }

    pub fn provider(&self, name: &str) -> Option<&Arc<ProviderEntry>> {
        self.providers.iter().find(|p| p.name() == name)
    }

    pub fn enabled_count(&self) -> usize {
        self.providers.iter().filter(|p| p.is_enabled()).count()
    }
}

/// Programmatic construction of a service from already-built providers.
pub struct ServiceBuilder {
    name: String,
    breaker_defaults: CircuitBreakerConfig,
    providers: Vec<(ProviderConfig, Arc<dyn Provider>)>,
}

impl ServiceBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            breaker_defaults: CircuitBreakerConfig::default(),
            providers: Vec::new(),
        }
    }

    pub fn circuit_breaker_defaults(mut self, cfg: CircuitBreakerConfig) -> Self {
        self.breaker_defaults = cfg;
        self
    }

    /// Append a provider; earlier providers are preferred.
    pub fn provider(mut self, config: ProviderConfig, provider: Arc<dyn Provider>) -> Self {
        self.providers.push((config, provider));
        self
    }

    pub fn build(self) -> Result<ServiceRegistration> {
        let service = ServiceConfig {
            name: self.name.clone(),
            providers: self.providers.iter().map(|(c, _)| c.clone()).collect(),
        };
        service.validate()?;

        let providers = self
            .providers
            .into_iter()
            .map(|(cfg, p)| Arc::new(ProviderEntry::new(cfg, p, &self.breaker_defaults)))
            .collect();
        Ok(ServiceRegistration {
            name: self.name,
            providers,
        })
    }
}

type ServiceMap = HashMap<String, Arc<ServiceRegistration>>;

/// Process-wide registry, passed explicitly to the orchestrator.
#[derive(Debug)]
pub struct ProviderRegistry {
    services: ArcSwap<ServiceMap>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            services: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Build every service and provider described by `config`.
    pub fn from_config(config: &ResilienceConfig, factory: &dyn ProviderFactory) -> Result<Self> {
        let registry = Self::new();
        registry.swap_config(config, factory)?;
        Ok(registry)
    }

    /// Add or replace one service. Returns the registration it replaced.
    pub fn register(&self, service: ServiceRegistration) -> Option<Arc<ServiceRegistration>> {
        let service = Arc::new(service);
        info!(
            service = service.name(),
            providers = service.providers().len(),
            enabled = service.enabled_count(),
            "registered service"
        );
        let previous = self.services.rcu(|current| {
            let mut updated = ServiceMap::clone(current);
            updated.insert(service.name().to_string(), Arc::clone(&service));
            updated
        });
        previous.get(service.name()).cloned()
    }

    /// Atomically replace the whole service map with one built from `config`.
    ///
    /// Providers whose configuration is unchanged keep their breaker, limiter,
    /// metrics and cache. Providers that are no longer referenced, including
    /// those of services added with [`register`](Self::register) but absent
    /// from `config`, are shut down once the new map is live; calls already
    /// running against them finish on the old entries. On error the current
    /// map is left untouched.
    pub async fn reconfigure(
        &self,
        config: &ResilienceConfig,
        factory: &dyn ProviderFactory,
    ) -> Result<()> {
        let retired = self.swap_config(config, factory)?;
        if !retired.is_empty() {
            futures::future::join_all(retired.iter().map(|p| p.provider().shutdown())).await;
            info!(providers = retired.len(), "retired providers shut down");
        }
        Ok(())
    }

    /// Swap in the map for `config` and return the entries it dropped.
    ///
    /// The new map is built against a snapshot and installed with a
    /// compare-and-swap; if a concurrent writer got there first it is rebuilt
    /// against the newer map.
    fn swap_config(
        &self,
        config: &ResilienceConfig,
        factory: &dyn ProviderFactory,
    ) -> Result<Vec<Arc<ProviderEntry>>> {
        config.validate()?;
        loop {
            let current = self.services.load_full();
            let (next, reused) = Self::build_map(config, factory, &current)?;
            let next = Arc::new(next);
            let previous = self.services.compare_and_swap(&current, Arc::clone(&next));
            if !Arc::ptr_eq(&*previous, &current) {
                debug!("service map changed during reconfigure, rebuilding");
                continue;
            }

            let retired = retired_entries(&current, &next);
            info!(
                services = next.len(),
                reused_providers = reused,
                retired_providers = retired.len(),
                "provider registry configured"
            );
            return Ok(retired);
        }
    }

    fn build_map(
        config: &ResilienceConfig,
        factory: &dyn ProviderFactory,
        current: &ServiceMap,
    ) -> Result<(ServiceMap, usize)> {
        let defaults = &config.circuit_breaker;
        let mut next = ServiceMap::with_capacity(config.services.len());
        let mut reused = 0usize;
        for svc in &config.services {
            let previous = current.get(&svc.name);
            let mut providers = Vec::with_capacity(svc.providers.len());
            for p in &svc.providers {
                let existing = previous
                    .and_then(|s| s.provider(&p.name))
                    .filter(|e| e.matches(p, defaults));
                let entry = match existing {
                    Some(e) => {
                        reused += 1;
                        Arc::clone(e)
                    }
                    None => {
                        let provider = factory.create(&svc.name, p)?;
                        Arc::new(ProviderEntry::new(p.clone(), provider, defaults))
                    }
                };
                providers.push(entry);
            }
            next.insert(
                svc.name.clone(),
                Arc::new(ServiceRegistration {
                    name: svc.name.clone(),
                    providers,
                }),
            );
        }
        Ok((next, reused))
    }

    pub fn service(&self, name: &str) -> Option<Arc<ServiceRegistration>> {
        self.services.load().get(name).cloned()
    }

    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.load().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Metrics of every provider of every service, sorted by service then priority.
    pub fn metrics_snapshot(&self) -> Vec<ProviderMetricsRecord> {
        let services = self.services.load();
        let mut names: Vec<&String> = services.keys().collect();
        names.sort_unstable();
        names
            .into_iter()
            .flat_map(|name| {
                services[name].providers().iter().map(move |p| ProviderMetricsRecord {
                    service: name.clone(),
                    provider: p.name().to_string(),
                    metrics: p.metrics().snapshot(),
                })
            })
            .collect()
    }

    /// Empty the registry and release every provider's resources.
    pub async fn shutdown(&self) {
        let services = self.services.swap(Arc::new(HashMap::new()));
        let providers: Vec<Arc<ProviderEntry>> = services
            .values()
            .flat_map(|s| s.providers().iter().cloned())
            .collect();
        futures::future::join_all(providers.iter().map(|p| p.provider().shutdown())).await;
        info!(
            services = services.len(),
            providers = providers.len(),
            "provider registry shut down"
        );
    }
}

/// Entries of `old` whose provider no entry of `new` still uses, one per provider.
fn retired_entries(old: &ServiceMap, new: &ServiceMap) -> Vec<Arc<ProviderEntry>> {
    let kept: Vec<&Arc<dyn Provider>> = new
        .values()
        .flat_map(|s| s.providers())
        .map(|e| e.provider())
        .collect();
    let mut retired: Vec<Arc<ProviderEntry>> = Vec::new();
    for entry in old.values().flat_map(|s| s.providers()) {
        let provider = entry.provider();
        if kept.iter().any(|k| same_provider(k, provider))
            || retired.iter().any(|r| same_provider(r.provider(), provider))
        {
            continue;
        }
        retired.push(Arc::clone(entry));
    }
    retired
}

fn same_provider(a: &Arc<dyn Provider>, b: &Arc<dyn Provider>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
