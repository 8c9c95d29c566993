//! Call pacing and cooldown for rate-limited collaborators.
//!
//! A [`RateLimiter`] is an explicit object constructed once per process and
//! shared by reference (`Arc`) between the clients that need it. Time comes
//! from an injected [`Clock`], so tests step a [`ManualClock`] instead of
//! sleeping.
//!
//! The limiter never blocks: [`RateLimiter::acquire`] either admits the call
//! or reports how long the caller would have to wait.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Monotonic time source measured from an arbitrary origin.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

/// Wall-clock implementation backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Hand-driven clock for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now = now.saturating_add(by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Default)]
struct LimiterState {
    last_call: Option<Duration>,
    cooldown_until: Option<Duration>,
}

/// Enforces a minimum spacing between calls and a cooldown after the
/// downstream service signals overload.
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    min_interval: Duration,
    default_cooldown: Duration,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        min_interval: Duration,
        default_cooldown: Duration,
    ) -> Self {
        Self {
            clock,
            min_interval,
            default_cooldown,
            state: Mutex::new(LimiterState::default()),
        }
    }

    /// A limiter that never refuses a call unless tripped.
    #[must_use]
    pub fn unlimited(clock: Arc<dyn Clock>, default_cooldown: Duration) -> Self {
        Self::new(clock, Duration::ZERO, default_cooldown)
    }

    /// Admit a call now, or report the remaining wait.
    ///
    /// # Errors
    ///
    /// Returns the time left until a call would be admitted, either because
    /// a cooldown is active or because the minimum interval has not elapsed.
    pub fn acquire(&self) -> Result<(), Duration> {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(until) = state.cooldown_until {
            if now < until {
                return Err(until - now);
            }
            state.cooldown_until = None;
        }

        if let Some(last) = state.last_call {
            let elapsed = now.saturating_sub(last);
            if elapsed < self.min_interval {
                return Err(self.min_interval - elapsed);
            }
        }

        state.last_call = Some(now);
        Ok(())
    }

    /// Start a cooldown of `retry_after`, or the default cooldown when the
    /// service gave no hint. An active longer cooldown is kept.
    pub fn trip(&self, retry_after: Option<Duration>) {
        let now = self.clock.now();
        let until = now.saturating_add(retry_after.unwrap_or(self.default_cooldown));
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.cooldown_until = Some(state.cooldown_until.map_or(until, |cur| cur.max(until)));
        tracing::warn!(cooldown = ?(until - now), "rate limit cooldown armed");
    }

    /// Time left on the active cooldown, or zero. Does not admit a call.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        let now = self.clock.now();
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .cooldown_until
            .map_or(Duration::ZERO, |until| until.saturating_sub(now))
    }

    /// Whether a cooldown is active right now.
    #[must_use]
    pub fn is_cooling_down(&self) -> bool {
        !self.remaining().is_zero()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("min_interval", &self.min_interval)
            .field("default_cooldown", &self.default_cooldown)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(min_interval_ms: u64) -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::new(
            clock.clone(),
            Duration::from_millis(min_interval_ms),
            Duration::from_secs(30),
        );
        (clock, limiter)
    }

    #[test]
    fn unlimited_admits_back_to_back_calls() {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::unlimited(clock, Duration::from_secs(5));
        assert!(limiter.acquire().is_ok());
        assert!(limiter.acquire().is_ok());
    }

    #[test]
    fn min_interval_is_enforced() {
        let (clock, limiter) = limiter(500);
        assert!(limiter.acquire().is_ok());

        clock.advance(Duration::from_millis(200));
        assert_eq!(limiter.acquire(), Err(Duration::from_millis(300)));

        clock.advance(Duration::from_millis(300));
        assert!(limiter.acquire().is_ok());
    }

    #[test]
    fn trip_uses_retry_after_hint() {
        let (clock, limiter) = limiter(0);
        limiter.trip(Some(Duration::from_secs(2)));
        assert!(limiter.is_cooling_down());
        assert_eq!(limiter.acquire(), Err(Duration::from_secs(2)));

        clock.advance(Duration::from_secs(2));
        assert!(!limiter.is_cooling_down());
        assert!(limiter.acquire().is_ok());
    }

    #[test]
    fn trip_without_hint_uses_default_cooldown() {
        let (clock, limiter) = limiter(0);
        limiter.trip(None);
        clock.advance(Duration::from_secs(29));
        assert_eq!(limiter.acquire(), Err(Duration::from_secs(1)));
    }

    #[test]
    fn remaining_does_not_admit_a_call() {
        let (clock, limiter) = limiter(500);
        assert_eq!(limiter.remaining(), Duration::ZERO);
        assert_eq!(limiter.remaining(), Duration::ZERO);
        assert!(limiter.acquire().is_ok());

        limiter.trip(Some(Duration::from_secs(3)));
        clock.advance(Duration::from_secs(1));
        assert_eq!(limiter.remaining(), Duration::from_secs(2));
        assert_eq!(limiter.remaining(), Duration::from_secs(2));

        clock.advance(Duration::from_secs(2));
        assert_eq!(limiter.remaining(), Duration::ZERO);
        assert!(limiter.acquire().is_ok());
    }

    #[test]
    fn shorter_trip_does_not_shorten_active_cooldown() {
        let (_clock, limiter) = limiter(0);
        limiter.trip(Some(Duration::from_secs(10)));
        limiter.trip(Some(Duration::from_secs(1)));
        assert_eq!(limiter.acquire(), Err(Duration::from_secs(10)));
    }
}
