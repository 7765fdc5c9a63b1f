//! Provider contract and factory.
//!
//! A provider is one concrete backend of a logical service ("sms via vendor X").
//! The orchestrator only sees [`Provider`]; variants are created from
//! [`ProviderConfig`] by a [`ProviderFactory`] keyed on the config's `kind` tag.

mod http;

pub use http::HttpProvider;

use crate::config::ProviderConfig;
use crate::metrics::MetricsSnapshot;
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Call arguments handed through to the provider.
pub type Parameters = serde_json::Map<String, serde_json::Value>;

/// Failure of a single provider attempt. Never surfaced raw to callers.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("attempt timed out after {}ms", .after.as_millis())]
    Timeout { after: Duration },

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {message}")]
    Malformed { message: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{message}")]
    Failed { message: String },
}

impl ProviderError {
    pub fn failed(message: impl Into<String>) -> Self {
        ProviderError::Failed {
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Perform one call against the backend.
    async fn execute(&self, params: &Parameters) -> std::result::Result<serde_json::Value, ProviderError>;

    /// Liveness probe. Implementations report problems as `false` instead of failing.
    async fn health_check(&self) -> bool;

    /// Provider-native metrics, if the backend exposes any. The registry keeps
    /// its own authoritative counters for every provider.
    fn metrics(&self) -> Option<MetricsSnapshot> {
        None
    }

    /// Release held connections. Called once on registry shutdown.
    async fn shutdown(&self) {}
}

/// Builds provider instances from configuration.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, service: &str, config: &ProviderConfig) -> Result<Arc<dyn Provider>>;
}

pub type ProviderConstructor =
    Arc<dyn Fn(&ProviderConfig) -> Result<Arc<dyn Provider>> + Send + Sync>;

/// Default factory: a table of kind tag → constructor, with `"http"` built in.
#[derive(Clone)]
pub struct ProviderKinds {
    kinds: HashMap<String, ProviderConstructor>,
}

impl ProviderKinds {
    pub fn new() -> Self {
        Self::empty().with_kind("http", |cfg| {
            Ok(Arc::new(HttpProvider::from_config(cfg)?) as Arc<dyn Provider>)
        })
    }

    pub fn empty() -> Self {
        Self {
            kinds: HashMap::new(),
        }
    }

    /// Register (or replace) a constructor for `kind`.
    pub fn with_kind<F>(mut self, kind: impl Into<String>, ctor: F) -> Self
    where
        F: Fn(&ProviderConfig) -> Result<Arc<dyn Provider>> + Send + Sync + 'static,
    {
        self.kinds.insert(kind.into(), Arc::new(ctor));
        self
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut v: Vec<&str> = self.kinds.keys().map(|k| k.as_str()).collect();
        v.sort_unstable();
        v
    }
}

impl Default for ProviderKinds {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProviderKinds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderKinds")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl ProviderFactory for ProviderKinds {
    fn create(&self, service: &str, config: &ProviderConfig) -> Result<Arc<dyn Provider>> {
        let ctor = self.kinds.get(&config.kind).ok_or_else(|| {
            Error::configuration_with_context(
                format!("unknown provider kind '{}'", config.kind),
                ErrorContext::new()
                    .with_field_path(format!("services.{}.{}.kind", service, config.name))
                    .with_details(format!("known kinds: {}", self.kinds().join(", ")))
                    .with_source("provider_factory"),
            )
        })?;
        ctor(config)
    }
}
