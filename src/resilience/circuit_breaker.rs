use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    pub consecutive_failures: u32,
    /// Remaining cooldown in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
    pub probe_in_flight: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    #[serde(rename = "cooldown_secs", with = "duration_secs")]
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, overridable via env:
    /// - `FAILOVER_BREAKER_FAILURE_THRESHOLD` (default 5)
    /// - `FAILOVER_BREAKER_COOLDOWN_SECS` (default 30)
    pub fn from_env() -> Self {
        let threshold = std::env::var("FAILOVER_BREAKER_FAILURE_THRESHOLD")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(5);
        let cooldown_secs = std::env::var("FAILOVER_BREAKER_COOLDOWN_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(30);
        Self {
            failure_threshold: threshold.max(1),
            cooldown: Duration::from_secs(cooldown_secs),
        }
    }

    /// Set the failure threshold
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Set the cooldown duration
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// Admission denied because the circuit is open (or a probe is already running).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitOpenRejection {
    /// Time left until the next probe may be admitted; zero while a probe is in flight.
    pub retry_in: Duration,
}

#[derive(Debug)]
struct State {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
}

/// Per-provider circuit breaker.
///
/// - Counts consecutive genuine provider failures
/// - Opens at the threshold and fast-fails for the cooldown
/// - Admits exactly one probe once the cooldown has elapsed
///
/// Every transition happens under the breaker's own lock, so the probe slot is
/// claimed by at most one caller.
#[derive(Debug)]
pub struct CircuitBreaker {
    cfg: CircuitBreakerConfig,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(cfg: CircuitBreakerConfig) -> Self {
        Self {
            cfg,
            state: Mutex::new(State {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.cfg
    }

    // Counters stay consistent even if a holder panicked; keep serving.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admission check. The returned permit must be resolved with
    /// [`CircuitPermit::success`] or [`CircuitPermit::failure`].
    pub fn try_acquire(&self) -> Result<CircuitPermit<'_>, CircuitOpenRejection> {
        let mut st = self.lock();
        match st.state {
            CircuitState::Closed => Ok(CircuitPermit::new(self, false)),
            CircuitState::Open => {
                let elapsed = st
                    .last_failure
                    .map(|t| t.elapsed())
                    .unwrap_or(self.cfg.cooldown);
                if elapsed < self.cfg.cooldown {
                    return Err(CircuitOpenRejection {
                        retry_in: self.cfg.cooldown - elapsed,
                    });
                }
                st.state = CircuitState::HalfOpen;
                st.probe_in_flight = true;
                Ok(CircuitPermit::new(self, true))
            }
            CircuitState::HalfOpen => {
                if st.probe_in_flight {
                    return Err(CircuitOpenRejection {
                        retry_in: Duration::ZERO,
                    });
                }
                st.probe_in_flight = true;
                Ok(CircuitPermit::new(self, true))
            }
        }
    }

    fn on_success(&self, probe: bool) {
        let mut st = self.lock();
        match (st.state, probe) {
            (CircuitState::HalfOpen, true) => {
                st.state = CircuitState::Closed;
                st.consecutive_failures = 0;
                st.probe_in_flight = false;
                st.last_failure = None;
            }
            (CircuitState::Closed, _) => {
                st.consecutive_failures = 0;
            }
            // Admitted before the circuit tripped; only the probe may close it.
            _ => {}
        }
    }

    fn on_failure(&self, probe: bool) {
        let mut st = self.lock();
        st.consecutive_failures = st.consecutive_failures.saturating_add(1);
        st.last_failure = Some(Instant::now());
        match st.state {
            CircuitState::HalfOpen if probe => {
                st.state = CircuitState::Open;
                st.probe_in_flight = false;
            }
            CircuitState::Closed if st.consecutive_failures >= self.cfg.failure_threshold => {
                st.state = CircuitState::Open;
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let st = self.lock();
        let open_remaining_ms = match (st.state, st.last_failure) {
            (CircuitState::Open, Some(t)) => {
                let elapsed = t.elapsed();
                (elapsed < self.cfg.cooldown)
                    .then(|| (self.cfg.cooldown - elapsed).as_millis() as u64)
            }
            _ => None,
        };
        CircuitBreakerSnapshot {
            state: st.state,
            failure_threshold: self.cfg.failure_threshold,
            cooldown_ms: self.cfg.cooldown.as_millis() as u64,
            consecutive_failures: st.consecutive_failures,
            open_remaining_ms,
            probe_in_flight: st.probe_in_flight,
        }
    }
}

/// Proof of admission through a [`CircuitBreaker`].
///
/// An unresolved probe permit counts as a failed probe when dropped, so a
/// cancelled call cannot leave the breaker stuck in half-open.
#[must_use = "resolve the permit with success() or failure()"]
#[derive(Debug)]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    resolved: bool,
}

impl<'a> CircuitPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            resolved: false,
        }
    }

    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.on_success(self.probe);
    }

    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.on_failure(self.probe);
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved && self.probe {
            self.breaker.on_failure(true);
        }
    }
}
