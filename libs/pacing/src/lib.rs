//! Pacing and retry-budget primitives for dispatch loops.
//!
//! A [`Pacer`] turns the caller's interval into the waits used after a success,
//! a rate-limit signal or a transient failure. A [`RetryBudget`] bounds how long a
//! session may keep retrying before it gives up.

use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::time::Instant;

const DEFAULT_JITTER_MS: u64 = 600;
const DEFAULT_RATE_LIMIT_FACTOR: u32 = 3;
const DEFAULT_TRANSIENT_FACTOR: u32 = 2;
const DEFAULT_MAX_TRANSIENT: u32 = 10;
const DEFAULT_MAX_RATE_LIMITED: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingPolicy {
    /// Upper bound of the random delay added after each success.
    pub jitter_max: Duration,
    /// Cooldown after a rate-limit signal, as a multiple of the interval.
    pub rate_limit_factor: u32,
    /// Cooldown after a transient failure, as a multiple of the interval.
    pub transient_factor: u32,
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            jitter_max: Duration::from_millis(DEFAULT_JITTER_MS),
            rate_limit_factor: DEFAULT_RATE_LIMIT_FACTOR,
            transient_factor: DEFAULT_TRANSIENT_FACTOR,
        }
    }
}

/// Bounds on retrying. `None` disables a bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryLimits {
    pub max_consecutive_transient: Option<u32>,
    pub max_consecutive_rate_limited: Option<u32>,
    pub max_run_time: Option<Duration>,
}

impl Default for RetryLimits {
    fn default() -> Self {
        Self {
            max_consecutive_transient: Some(DEFAULT_MAX_TRANSIENT),
            max_consecutive_rate_limited: Some(DEFAULT_MAX_RATE_LIMITED),
            max_run_time: None,
        }
    }
}

impl RetryLimits {
    pub fn unbounded() -> Self {
        Self {
            max_consecutive_transient: None,
            max_consecutive_rate_limited: None,
            max_run_time: None,
        }
    }
}

/// Converts a caller-supplied interval in seconds, rejecting non-positive or
/// non-finite values.
///
/// ```
/// use std::time::Duration;
/// use boost_pacing::interval_from_secs;
///
/// assert_eq!(interval_from_secs(1.5), Some(Duration::from_millis(1500)));
/// assert_eq!(interval_from_secs(0.0), None);
/// assert_eq!(interval_from_secs(f64::NAN), None);
/// ```
pub fn interval_from_secs(secs: f64) -> Option<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(secs).ok()
}

#[derive(Debug, Clone, Copy)]
pub struct Pacer {
    interval: Duration,
    policy: PacingPolicy,
}

impl Pacer {
    pub fn new(interval: Duration, policy: PacingPolicy) -> Self {
        Self { interval, policy }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait after an acknowledged call: the interval plus a random jitter.
    pub fn success_delay(&self) -> Duration {
        self.interval.saturating_add(self.jitter())
    }

    /// Cooldown after a rate-limit signal. A server-provided `Retry-After`
    /// lengthens it but never shortens it.
    pub fn rate_limit_cooldown(&self, retry_after: Option<Duration>) -> Duration {
        let base = scale(self.interval, self.policy.rate_limit_factor);
        match retry_after {
            Some(hint) if hint > base => hint,
            _ => base,
        }
    }

    pub fn transient_cooldown(&self) -> Duration {
        scale(self.interval, self.policy.transient_factor)
    }

    fn jitter(&self) -> Duration {
        let max_ms = u64::try_from(self.policy.jitter_max.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }
}

fn scale(interval: Duration, factor: u32) -> Duration {
    interval.checked_mul(factor).unwrap_or(Duration::MAX)
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BudgetExhausted {
    #[error("gave up after {0} consecutive transient failures")]
    Transient(u32),
    #[error("gave up after {0} consecutive rate-limit cooldowns")]
    RateLimited(u32),
    #[error("run time limit of {0:?} exceeded")]
    RunTime(Duration),
}

/// Per-session retry accounting. Successes reset the consecutive counters.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    limits: RetryLimits,
    started: Instant,
    transient: u32,
    rate_limited: u32,
}

impl RetryBudget {
    pub fn new(limits: RetryLimits) -> Self {
        Self {
            limits,
            started: Instant::now(),
            transient: 0,
            rate_limited: 0,
        }
    }

    pub fn record_success(&mut self) {
        self.transient = 0;
        self.rate_limited = 0;
    }

    pub fn record_transient(&mut self) -> Result<u32, BudgetExhausted> {
        self.transient = self.transient.saturating_add(1);
        match self.limits.max_consecutive_transient {
            Some(max) if self.transient > max => Err(BudgetExhausted::Transient(self.transient - 1)),
            _ => Ok(self.transient),
        }
    }

    pub fn record_rate_limit(&mut self) -> Result<u32, BudgetExhausted> {
        self.rate_limited = self.rate_limited.saturating_add(1);
        match self.limits.max_consecutive_rate_limited {
            Some(max) if self.rate_limited > max => {
                Err(BudgetExhausted::RateLimited(self.rate_limited - 1))
            }
            _ => Ok(self.rate_limited),
        }
    }

    pub fn check_deadline(&self) -> Result<(), BudgetExhausted> {
        match self.limits.max_run_time {
            Some(limit) if self.started.elapsed() >= limit => Err(BudgetExhausted::RunTime(limit)),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pacer(interval_ms: u64) -> Pacer {
        Pacer::new(Duration::from_millis(interval_ms), PacingPolicy::default())
    }

    #[test]
    fn success_delay_stays_within_jitter_window() {
        let pacer = pacer(1_000);
        for _ in 0..200 {
            let delay = pacer.success_delay();
            assert!(delay >= Duration::from_millis(1_000));
            assert!(delay <= Duration::from_millis(1_600));
        }
    }

    #[test]
    fn zero_jitter_is_exact() {
        let pacer = Pacer::new(
            Duration::from_secs(2),
            PacingPolicy {
                jitter_max: Duration::ZERO,
                ..PacingPolicy::default()
            },
        );
        assert_eq!(pacer.success_delay(), Duration::from_secs(2));
    }

    #[test]
    fn cooldowns_scale_with_interval() {
        let pacer = pacer(1_000);
        assert_eq!(pacer.rate_limit_cooldown(None), Duration::from_secs(3));
        assert_eq!(pacer.transient_cooldown(), Duration::from_secs(2));
    }

    #[test]
    fn retry_after_only_extends_cooldown() {
        let pacer = pacer(1_000);
        assert_eq!(
            pacer.rate_limit_cooldown(Some(Duration::from_secs(10))),
            Duration::from_secs(10)
        );
        assert_eq!(
            pacer.rate_limit_cooldown(Some(Duration::from_secs(1))),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn huge_intervals_saturate_instead_of_overflowing() {
        let pacer = Pacer::new(Duration::MAX / 2, PacingPolicy::default());
        assert_eq!(pacer.rate_limit_cooldown(None), Duration::MAX);
        assert_eq!(pacer.transient_cooldown(), Duration::MAX);
        assert!(pacer.success_delay() >= Duration::MAX / 2);
    }

    #[tokio::test]
    async fn transient_budget_counts_consecutive_failures() {
        let mut budget = RetryBudget::new(RetryLimits {
            max_consecutive_transient: Some(2),
            ..RetryLimits::unbounded()
        });
        assert_eq!(budget.record_transient(), Ok(1));
        assert_eq!(budget.record_transient(), Ok(2));
        budget.record_success();
        assert_eq!(budget.record_transient(), Ok(1));
        assert_eq!(budget.record_transient(), Ok(2));
        assert_eq!(budget.record_transient(), Err(BudgetExhausted::Transient(2)));
    }

    #[tokio::test]
    async fn rate_limit_budget_can_be_unbounded() {
        let mut budget = RetryBudget::new(RetryLimits::unbounded());
        for n in 1..=1_000 {
            assert_eq!(budget.record_rate_limit(), Ok(n));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_trips_after_run_time() {
        let budget = RetryBudget::new(RetryLimits {
            max_run_time: Some(Duration::from_secs(30)),
            ..RetryLimits::unbounded()
        });
        assert!(budget.check_deadline().is_ok());
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(
            budget.check_deadline(),
            Err(BudgetExhausted::RunTime(Duration::from_secs(30)))
        );
    }
}
