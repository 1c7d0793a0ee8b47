//! Reconnection after abnormal closure
//!
//! Two pieces cooperate here:
//!
//! - a [`ReconnectionStrategy`] answers "how long before attempt *n*, if at all"
//! - the [`ReconnectionScheduler`] owns the attempt counter and asks the
//!   strategy for the next delay
//!
//! The counter only goes back to zero after a successful connection; a failed
//! attempt just schedules the next one.
//!
//! # Built-in Strategies
//!
//! - **ExponentialBackoff**: `base × 2^attempt`, optional cap and jitter (default)
//! - **FixedDelay**: constant delay between attempts
//! - **NoReconnect**: give up immediately
//!
//! # Examples
//!
//! ```rust
//! use tether_client::{ExponentialBackoff, ReconnectionScheduler};
//! use std::time::Duration;
//!
//! let strategy = ExponentialBackoff::new(Duration::from_millis(1000)).with_max_attempts(3);
//! let mut scheduler = ReconnectionScheduler::new(Box::new(strategy));
//!
//! assert_eq!(scheduler.schedule_next(), Some(Duration::from_millis(1000)));
//! assert_eq!(scheduler.schedule_next(), Some(Duration::from_millis(2000)));
//! assert_eq!(scheduler.schedule_next(), Some(Duration::from_millis(4000)));
//! assert_eq!(scheduler.schedule_next(), None);
//! assert_eq!(scheduler.attempts(), 3);
//! ```

use std::time::Duration;

/// Decides the delay before each reconnection attempt
///
/// Implementations may keep state between calls; `reset` is invoked after a
/// successful connection.
pub trait ReconnectionStrategy: Send + Sync {
    /// Delay before attempt number `attempt` (0-indexed), or `None` to give up
    fn next_delay(&mut self, attempt: u32) -> Option<Duration>;

    /// Forget accumulated state after a successful connection
    fn reset(&mut self);
}

/// Exponential backoff: `base × 2^attempt`
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_delay: Option<Duration>,
    max_attempts: Option<u32>,
    jitter: bool,
}

impl ExponentialBackoff {
    /// Unbounded backoff starting at `base_delay`
    pub fn new(base_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: None,
            max_attempts: None,
            jitter: false,
        }
    }

    /// Give up once `max_attempts` attempts were made
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Never wait longer than `max_delay`
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Add up to 25% random delay to spread out simultaneous reconnects
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1)).with_max_attempts(5)
    }
}

impl ReconnectionStrategy for ExponentialBackoff {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt >= max {
                return None;
            }
        }

        let factor = 2u32.saturating_pow(attempt);
        let mut delay = self.base_delay.saturating_mul(factor);
        if let Some(cap) = self.max_delay {
            delay = delay.min(cap);
        }

        if self.jitter {
            use rand::Rng;
            let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            let jitter_ms = rand::thread_rng().gen_range(0..=(ms / 4));
            delay = delay.saturating_add(Duration::from_millis(jitter_ms));
        }

        Some(delay)
    }

    fn reset(&mut self) {}
}

/// Constant delay between attempts
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
    max_attempts: Option<u32>,
}

impl FixedDelay {
    /// Retry every `delay`, forever
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    /// Give up once `max_attempts` attempts were made
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl ReconnectionStrategy for FixedDelay {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if attempt >= max => None,
            _ => Some(self.delay),
        }
    }

    fn reset(&mut self) {}
}

/// Never reconnect
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReconnect;

impl ReconnectionStrategy for NoReconnect {
    fn next_delay(&mut self, _attempt: u32) -> Option<Duration> {
        None
    }

    fn reset(&mut self) {}
}

/// Owns the attempt counter across a run of reconnection attempts
pub struct ReconnectionScheduler {
    strategy: Box<dyn ReconnectionStrategy>,
    attempts: u32,
}

impl ReconnectionScheduler {
    /// Wrap a strategy with a fresh counter
    pub fn new(strategy: Box<dyn ReconnectionStrategy>) -> Self {
        Self {
            strategy,
            attempts: 0,
        }
    }

    /// Delay before the next attempt, counting it; `None` once exhausted
    ///
    /// After `None` the counter stays where it was, so the caller can report
    /// how many attempts were made.
    pub fn schedule_next(&mut self) -> Option<Duration> {
        let delay = self.strategy.next_delay(self.attempts)?;
        self.attempts += 1;
        Some(delay)
    }

    /// Attempts made since the last successful connection
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Called after a successful connection
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.strategy.reset();
    }
}

impl std::fmt::Debug for ReconnectionScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectionScheduler")
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_doubles() {
        let mut strategy = ExponentialBackoff::new(Duration::from_millis(100)).with_max_attempts(5);

        assert_eq!(strategy.next_delay(0), Some(Duration::from_millis(100)));
        assert_eq!(strategy.next_delay(1), Some(Duration::from_millis(200)));
        assert_eq!(strategy.next_delay(2), Some(Duration::from_millis(400)));
        assert_eq!(strategy.next_delay(4), Some(Duration::from_millis(1600)));
        assert_eq!(strategy.next_delay(5), None);
    }

    #[test]
    fn test_exponential_backoff_cap() {
        let mut strategy = ExponentialBackoff::new(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(1));
        assert_eq!(strategy.next_delay(10), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_exponential_backoff_saturates() {
        let mut strategy = ExponentialBackoff::new(Duration::from_secs(1));
        assert!(strategy.next_delay(200).is_some());
    }

    #[test]
    fn test_exponential_backoff_jitter_bounds() {
        let mut strategy = ExponentialBackoff::new(Duration::from_millis(100)).with_jitter();
        for _ in 0..50 {
            let delay = strategy.next_delay(0).unwrap();
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(125));
        }
    }

    #[test]
    fn test_jitter_on_huge_delay_saturates() {
        let mut strategy = ExponentialBackoff::new(Duration::MAX).with_jitter();
        assert_eq!(strategy.next_delay(0), Some(Duration::MAX));
        assert_eq!(strategy.next_delay(5), Some(Duration::MAX));
    }

    #[test]
    fn test_fixed_delay() {
        let mut strategy = FixedDelay::new(Duration::from_secs(1)).with_max_attempts(3);

        assert_eq!(strategy.next_delay(0), Some(Duration::from_secs(1)));
        assert_eq!(strategy.next_delay(2), Some(Duration::from_secs(1)));
        assert!(strategy.next_delay(3).is_none());
    }

    #[test]
    fn test_no_reconnect() {
        let mut strategy = NoReconnect;
        assert!(strategy.next_delay(0).is_none());
    }

    #[test]
    fn test_scheduler_sequence_then_exhausted() {
        let strategy = ExponentialBackoff::new(Duration::from_millis(1000)).with_max_attempts(3);
        let mut scheduler = ReconnectionScheduler::new(Box::new(strategy));

        let delays: Vec<_> = std::iter::from_fn(|| scheduler.schedule_next()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(4000),
            ]
        );
        assert_eq!(scheduler.attempts(), 3);
        assert_eq!(scheduler.schedule_next(), None);
        assert_eq!(scheduler.attempts(), 3);
    }

    #[test]
    fn test_scheduler_reset_only_on_success() {
        let strategy = ExponentialBackoff::new(Duration::from_millis(50)).with_max_attempts(3);
        let mut scheduler = ReconnectionScheduler::new(Box::new(strategy));

        scheduler.schedule_next();
        scheduler.schedule_next();
        assert_eq!(scheduler.attempts(), 2);

        scheduler.reset();
        assert_eq!(scheduler.attempts(), 0);
        assert_eq!(scheduler.schedule_next(), Some(Duration::from_millis(50)));
    }
}
