use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Structured error context for configuration and registry errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "services[0].providers[1].name")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "registry", "http_provider")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a single provider could not serve an orchestrated call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Admission denied by the provider's rate limiter.
    RateLimited { window: String },
    /// Admission denied by the provider's circuit breaker.
    CircuitOpen,
    /// The last attempt exceeded the configured per-attempt timeout.
    Timeout { after: Duration },
    /// Any other provider-side failure, after retries were exhausted.
    Provider { message: String },
}

impl FailureReason {
    /// True when the provider was never invoked for this call.
    pub fn is_skip(&self) -> bool {
        matches!(self, FailureReason::RateLimited { .. } | FailureReason::CircuitOpen)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::RateLimited { window } => write!(f, "rate limited ({})", window),
            FailureReason::CircuitOpen => write!(f, "circuit open"),
            FailureReason::Timeout { after } => {
                write!(f, "timed out after {}ms", after.as_millis())
            }
            FailureReason::Provider { message } => write!(f, "provider error: {}", message),
        }
    }
}

/// One entry of an aggregate failure: a provider and why it was unavailable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFailure {
    pub provider: String,
    pub reason: FailureReason,
}

impl ProviderFailure {
    pub fn new(provider: impl Into<String>, reason: FailureReason) -> Self {
        Self {
            provider: provider.into(),
            reason,
        }
    }
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.provider, self.reason)
    }
}

/// Unified error type surfaced to callers of the resilience layer.
///
/// Per-attempt provider errors never escape raw; they are folded into
/// [`Error::AllProvidersFailed`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("service not found: {service}")]
    ServiceNotFound { service: String },

    #[error("all providers failed for service '{service}': {}", format_failures(.failures))]
    AllProvidersFailed {
        service: String,
        failures: Vec<ProviderFailure>,
    },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },
}

fn format_failures(failures: &[ProviderFailure]) -> String {
    if failures.is_empty() {
        return "no providers attempted".to_string();
    }
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn service_not_found(service: impl Into<String>) -> Self {
        Error::ServiceNotFound {
            service: service.into(),
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Per-provider failure entries of an aggregate failure, in priority order.
    pub fn failures(&self) -> &[ProviderFailure] {
        match self {
            Error::AllProvidersFailed { failures, .. } => failures,
            _ => &[],
        }
    }
}
