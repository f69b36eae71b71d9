use crate::connection::CloseReason;
use rand::Rng as _;
use std::time::Duration;

/// Exponential backoff with jitter, per venue. The teacher's original backoff policy had no
/// jitter; venues reconnecting on the same wall-clock tick (e.g. after a shared network blip)
/// would otherwise retry in lockstep and re-trip the same rate limit together.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

/// Whether a [`ConnectionClosed`](crate::connection::ConnectionClosed) should trigger a
/// reconnect attempt at all. An operator-requested stop is not a failure to recover from.
pub fn should_reconnect(reason: CloseReason) -> bool {
    !matches!(reason, CloseReason::EngineStopping)
}

/// Tracks attempt count and in-flight state for one venue's reconnect schedule. Computing the
/// next delay is synchronous and side-effect-free beyond internal counters; the caller
/// (the Facade's per-venue task) owns actually sleeping and reopening connections.
#[derive(Debug)]
pub struct Reconnector {
    config: BackoffConfig,
    attempt: u32,
    in_flight: bool,
}

impl Reconnector {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempt: 0,
            in_flight: false,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn exhausted(&self) -> bool {
        self.attempt >= self.config.max_attempts
    }

    /// Starts a reconnect attempt and returns the delay to wait before it, or `None` if one is
    /// already in flight for this venue — reconnects never overlap.
    pub fn try_begin(&mut self) -> Option<Duration> {
        if self.in_flight {
            return None;
        }
        self.in_flight = true;
        self.attempt += 1;
        Some(self.delay_for_attempt(self.attempt))
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let exponential = self.config.base_delay.saturating_mul(1u32 << shift);
        let jitter = Duration::from_millis(rand::rng().random_range(0..1000));
        exponential.saturating_add(jitter).min(self.config.max_delay)
    }

    /// Marks the in-flight attempt as finished, whatever its outcome. Must be called exactly
    /// once per `try_begin` that returned `Some`, or every future attempt is silently refused.
    pub fn finish_attempt(&mut self) {
        self.in_flight = false;
    }

    /// Call once a reopened connection starts receiving data again, resetting the schedule.
    pub fn on_reconnected(&mut self) {
        self.attempt = 0;
        self.in_flight = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BackoffConfig {
        BackoffConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            max_attempts: 3,
        }
    }

    #[test]
    fn test_try_begin_refuses_to_overlap() {
        let mut reconnector = Reconnector::new(config());
        assert!(reconnector.try_begin().is_some());
        assert!(reconnector.try_begin().is_none());
        reconnector.finish_attempt();
        assert!(reconnector.try_begin().is_some());
    }

    #[test]
    fn test_delay_grows_and_is_capped() {
        let mut reconnector = Reconnector::new(config());
        let first = reconnector.try_begin().unwrap();
        reconnector.finish_attempt();
        let second = reconnector.try_begin().unwrap();
        reconnector.finish_attempt();

        // Jitter adds up to 1s, but the exponential floor still grows attempt over attempt.
        assert!(first >= Duration::from_millis(100));
        assert!(second >= Duration::from_millis(200));
        assert!(second <= config().max_delay);
    }

    #[test]
    fn test_exhausted_after_max_attempts() {
        let mut reconnector = Reconnector::new(config());
        for _ in 0..3 {
            reconnector.try_begin();
            reconnector.finish_attempt();
        }
        assert!(reconnector.exhausted());
    }

    #[test]
    fn test_on_reconnected_resets_schedule() {
        let mut reconnector = Reconnector::new(config());
        reconnector.try_begin();
        reconnector.finish_attempt();
        reconnector.on_reconnected();
        assert_eq!(reconnector.attempt(), 0);
        assert!(!reconnector.exhausted());
    }

    #[test]
    fn test_should_reconnect_excludes_engine_stopping() {
        assert!(should_reconnect(CloseReason::DataStarvation));
        assert!(should_reconnect(CloseReason::TransportError));
        assert!(!should_reconnect(CloseReason::EngineStopping));
    }
}
