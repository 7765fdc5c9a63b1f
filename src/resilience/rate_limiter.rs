use crate::config::RateLimits;
use serde::Serialize;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// The budget that denied an admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    Minute,
    Hour,
    Day,
    Concurrency,
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LimitKind::Minute => "minute",
            LimitKind::Hour => "hour",
            LimitKind::Day => "day",
            LimitKind::Concurrency => "concurrency",
        };
        f.write_str(s)
    }
}

/// Admission denied by the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRejection {
    pub limit: LimitKind,
    /// Time until the exhausted window resets; `None` for the concurrency cap.
    pub retry_after: Option<Duration>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WindowSnapshot {
    pub limit: u32,
    pub used: u32,
    pub resets_in_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterSnapshot {
    pub minute: Option<WindowSnapshot>,
    pub hour: Option<WindowSnapshot>,
    pub day: Option<WindowSnapshot>,
    pub in_flight: u32,
    pub max_concurrent: u32,
}

#[derive(Debug)]
struct Window {
    length: Duration,
    limit: u32,
    count: u32,
    start: Instant,
}

impl Window {
    fn new(length: Duration, limit: u32, now: Instant) -> Self {
        Self {
            length,
            limit,
            count: 0,
            start: now,
        }
    }

    /// Lazy reset: a crossed boundary is only noticed on the next check.
    fn roll(&mut self, now: Instant) {
        if now.duration_since(self.start) >= self.length {
            self.start = now;
            self.count = 0;
        }
    }

    fn exhausted(&self) -> bool {
        self.limit > 0 && self.count >= self.limit
    }

    fn resets_in(&self, now: Instant) -> Duration {
        self.length.saturating_sub(now.duration_since(self.start))
    }

    fn snapshot(&self, now: Instant) -> Option<WindowSnapshot> {
        (self.limit > 0).then(|| WindowSnapshot {
            limit: self.limit,
            used: self.count,
            resets_in_ms: self.resets_in(now).as_millis() as u64,
        })
    }
}

#[derive(Debug)]
struct State {
    minute: Window,
    hour: Window,
    day: Window,
    in_flight: u32,
}

impl State {
    fn windows_mut(&mut self) -> [(&mut Window, LimitKind); 3] {
        [
            (&mut self.minute, LimitKind::Minute),
            (&mut self.hour, LimitKind::Hour),
            (&mut self.day, LimitKind::Day),
        ]
    }
}

/// Fixed-window rate limiter with a concurrency gate, one per provider.
///
/// Windows are anchored at the first admission after a reset and reset lazily
/// on the following admission check; there is no housekeeping task.
#[derive(Debug)]
pub struct RateLimiter {
    max_concurrent: u32,
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new(limits: &RateLimits) -> Self {
        let now = Instant::now();
        Self {
            max_concurrent: limits.max_concurrent.max(1),
            state: Mutex::new(State {
                minute: Window::new(MINUTE, limits.requests_per_minute, now),
                hour: Window::new(HOUR, limits.requests_per_hour, now),
                day: Window::new(DAY, limits.requests_per_day.unwrap_or(0), now),
                in_flight: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admission check. On success every window counter and the in-flight
    /// count are incremented; the in-flight slot is released when the permit drops.
    pub fn try_acquire(&self) -> Result<RatePermit<'_>, RateLimitRejection> {
        let now = Instant::now();
        let mut st = self.lock();

        for (window, kind) in st.windows_mut() {
            window.roll(now);
            if window.exhausted() {
                return Err(RateLimitRejection {
                    limit: kind,
                    retry_after: Some(window.resets_in(now)),
                });
            }
        }
        if st.in_flight >= self.max_concurrent {
            return Err(RateLimitRejection {
                limit: LimitKind::Concurrency,
                retry_after: None,
            });
        }

        for (window, _) in st.windows_mut() {
            window.count = window.count.saturating_add(1);
        }
        st.in_flight += 1;
        Ok(RatePermit {
            limiter: self,
            window_starts: [st.minute.start, st.hour.start, st.day.start],
        })
    }

    fn release(&self) {
        let mut st = self.lock();
        st.in_flight = st.in_flight.saturating_sub(1);
    }

    /// Only windows that have not rolled since admission are credited.
    fn refund(&self, window_starts: [Instant; 3]) {
        let mut st = self.lock();
        for ((window, _), start) in st.windows_mut().into_iter().zip(window_starts) {
            if window.start == start {
                window.count = window.count.saturating_sub(1);
            }
        }
    }

    pub fn in_flight(&self) -> u32 {
        self.lock().in_flight
    }

    pub fn snapshot(&self) -> RateLimiterSnapshot {
        let now = Instant::now();
        let st = self.lock();
        RateLimiterSnapshot {
            minute: st.minute.snapshot(now),
            hour: st.hour.snapshot(now),
            day: st.day.snapshot(now),
            in_flight: st.in_flight,
            max_concurrent: self.max_concurrent,
        }
    }
}

/// Holds one in-flight slot of a [`RateLimiter`].
#[derive(Debug)]
pub struct RatePermit<'a> {
    limiter: &'a RateLimiter,
    /// Minute, hour and day window starts at admission.
    window_starts: [Instant; 3],
}

impl RatePermit<'_> {
    /// Give back the window budget as well as the slot, for calls that were
    /// admitted here but never reached the provider.
    pub fn refund(self) {
        self.limiter.refund(self.window_starts);
    }
}

impl Drop for RatePermit<'_> {
    fn drop(&mut self) {
        self.limiter.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_minute_limit_admits_kth_rejects_next() {
        let limiter = RateLimiter::new(&RateLimits::unlimited(100).with_per_minute(3));
        for _ in 0..3 {
            drop(limiter.try_acquire().expect("within budget"));
        }
        let rejection = limiter.try_acquire().unwrap_err();
        assert_eq!(rejection.limit, LimitKind::Minute);
        assert!(rejection.retry_after.is_some());
    }

    #[test]
    fn test_concurrency_cap_and_release() {
        let limiter = RateLimiter::new(&RateLimits::unlimited(2));
        let a = limiter.try_acquire().unwrap();
        let _b = limiter.try_acquire().unwrap();
        let rejection = limiter.try_acquire().unwrap_err();
        assert_eq!(rejection.limit, LimitKind::Concurrency);
        assert_eq!(rejection.retry_after, None);

        drop(a);
        assert_eq!(limiter.in_flight(), 1);
        assert!(limiter.try_acquire().is_ok());
    }

    #[test]
    fn test_zero_means_unlimited() {
        let limiter = RateLimiter::new(&RateLimits::unlimited(1));
        for _ in 0..1000 {
            drop(limiter.try_acquire().unwrap());
        }
        let snapshot = limiter.snapshot();
        assert!(snapshot.minute.is_none());
        assert!(snapshot.day.is_none());
        assert_eq!(snapshot.in_flight, 0);
    }

    #[test]
    fn test_refund_returns_window_budget() {
        let limiter = RateLimiter::new(&RateLimits::unlimited(5).with_per_minute(1));
        limiter.try_acquire().unwrap().refund();
        assert_eq!(limiter.in_flight(), 0);
        assert_eq!(limiter.snapshot().minute.unwrap().used, 0);
        assert!(limiter.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refund_after_window_rolled_keeps_new_budget() {
        let limiter = RateLimiter::new(&RateLimits::unlimited(5).with_per_minute(1));

        tokio::time::advance(Duration::from_secs(59)).await;
        let stale = limiter.try_acquire().unwrap();

        tokio::time::advance(Duration::from_secs(1)).await;
        let _fresh = limiter.try_acquire().unwrap();
        assert_eq!(limiter.snapshot().minute.unwrap().used, 1);

        stale.refund();
        assert_eq!(limiter.snapshot().minute.unwrap().used, 1);
        assert_eq!(limiter.try_acquire().unwrap_err().limit, LimitKind::Minute);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_on_next_check() {
        let limiter = RateLimiter::new(&RateLimits::unlimited(10).with_per_minute(2));
        drop(limiter.try_acquire().unwrap());
        drop(limiter.try_acquire().unwrap());
        assert!(limiter.try_acquire().is_err());

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(limiter.try_acquire().is_err());

        tokio::time::advance(Duration::from_secs(1)).await;
        // Counter still reads as used until an admission check rolls the window.
        assert_eq!(limiter.snapshot().minute.unwrap().used, 2);
        assert!(limiter.try_acquire().is_ok());
        assert_eq!(limiter.snapshot().minute.unwrap().used, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hour_window_outlives_minute_window() {
        let limiter = RateLimiter::new(
            &RateLimits::unlimited(10)
                .with_per_minute(5)
                .with_per_hour(3),
        );
        for _ in 0..3 {
            drop(limiter.try_acquire().unwrap());
        }
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(limiter.try_acquire().unwrap_err().limit, LimitKind::Hour);
    }

    #[test]
    fn test_day_window_enforced() {
        let limiter = RateLimiter::new(&RateLimits::unlimited(10).with_per_day(1));
        drop(limiter.try_acquire().unwrap());
        assert_eq!(limiter.try_acquire().unwrap_err().limit, LimitKind::Day);
    }

    #[test]
    fn test_concurrent_admissions_never_exceed_budget() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let limiter = Arc::new(RateLimiter::new(
            &RateLimits::unlimited(1000).with_per_minute(50),
        ));
        let admitted = Arc::new(AtomicU32::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                let admitted = Arc::clone(&admitted);
                std::thread::spawn(move || {
                    for _ in 0..20 {
                        if limiter.try_acquire().is_ok() {
                            admitted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(admitted.load(Ordering::SeqCst), 50);
        assert_eq!(limiter.in_flight(), 0);
    }
}
