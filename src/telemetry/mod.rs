//! Failover events.
//!
//! The orchestrator reports what happened during each call (skips, failures,
//! failovers, final outcome) to an application-supplied [`EventSink`]. The
//! default sink discards everything.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`FailoverEvent`] | Typed event enum |
//! | [`EventSink`] | Trait for event destinations |
//! | [`NoopEventSink`] | Default no-op sink |
//! | [`InMemoryEventSink`] | Bounded in-memory sink for testing |
//! | [`TracingEventSink`] | Emits events as `tracing` records |
//! | [`CompositeEventSink`] | Multi-destination composite sink |

use async_trait::async_trait;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailoverEvent {
    /// A provider was not invoked because an admission check rejected it.
    ProviderSkipped {
        call_id: String,
        service: String,
        provider: String,
        reason: String,
    },
    /// A provider was invoked and failed after exhausting its retries.
    ProviderFailed {
        call_id: String,
        service: String,
        provider: String,
        attempts: u32,
        error: String,
    },
    /// A call was served by a provider other than the most preferred one.
    FailedOver {
        call_id: String,
        service: String,
        from: String,
        to: String,
    },
    CallSucceeded {
        call_id: String,
        service: String,
        provider: String,
        duration_ms: u64,
        cached: bool,
    },
    CallFailed {
        call_id: String,
        service: String,
        providers_tried: usize,
    },
}

impl FailoverEvent {
    pub fn call_id(&self) -> &str {
        match self {
            FailoverEvent::ProviderSkipped { call_id, .. }
            | FailoverEvent::ProviderFailed { call_id, .. }
            | FailoverEvent::FailedOver { call_id, .. }
            | FailoverEvent::CallSucceeded { call_id, .. }
            | FailoverEvent::CallFailed { call_id, .. } => call_id,
        }
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn report(&self, event: FailoverEvent);
}

pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn report(&self, _event: FailoverEvent) {}
}

pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoopEventSink)
}

/// In-memory sink for testing. Keeps the most recent `max` events.
pub struct InMemoryEventSink {
    events: Mutex<VecDeque<FailoverEvent>>,
    max_events: usize,
}

impl InMemoryEventSink {
    pub fn new(max: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            max_events: max,
        }
    }

    pub fn events(&self) -> Vec<FailoverEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn events_for_call(&self, call_id: &str) -> Vec<FailoverEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.call_id() == call_id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventSink for InMemoryEventSink {
    async fn report(&self, event: FailoverEvent) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        events.push_back(event);
        while events.len() > self.max_events {
            events.pop_front();
        }
    }
}

/// Logs every event through `tracing`.
#[derive(Default)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn report(&self, event: FailoverEvent) {
        match &event {
            FailoverEvent::ProviderFailed { .. } | FailoverEvent::CallFailed { .. } => {
                warn!(event = ?event, "failover event")
            }
            _ => info!(event = ?event, "failover event"),
        }
    }
}

/// Composite sink for multiple destinations.
#[derive(Default)]
pub struct CompositeEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl CompositeEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl EventSink for CompositeEventSink {
    async fn report(&self, event: FailoverEvent) {
        for s in &self.sinks {
            s.report(event.clone()).await;
        }
    }
}
