//! A policy-driven retry executor with pluggable backoff strategies,
//! optionally gated by a [`CircuitBreaker`](crate::breaker::CircuitBreaker).

use std::collections::HashSet;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::breaker::CircuitBreaker;
use crate::category::ErrorCategory;

/// How the delay between attempts grows.
#[derive(Debug, Clone, Copy)]
pub enum BackoffStrategy {
    /// Always wait `initial_delay`.
    Fixed,
    /// `initial_delay * factor^attempt`.
    Exponential { factor: f64 },
    /// `initial_delay * factor^attempt * (1 + U(-jitter, +jitter))`.
    ExponentialWithJitter { factor: f64, jitter: f64 },
    /// `initial_delay + increment * attempt`.
    Linear { increment: Duration },
}

/// Configuration for one [`execute`] call (or a whole class of calls,
/// if shared by reference).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_total_time: Option<Duration>,
    pub strategy: BackoffStrategy,
    pub retryable_categories: HashSet<ErrorCategory>,
    pub use_circuit_breaker: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        let mut retryable_categories = HashSet::new();
        retryable_categories.insert(ErrorCategory::Connection);
        retryable_categories.insert(ErrorCategory::TransientRejection);
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            max_total_time: None,
            strategy: BackoffStrategy::ExponentialWithJitter { factor: 2.0, jitter: 0.2 },
            retryable_categories,
            use_circuit_breaker: true,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_attempts(mut self, value: u32) -> Self {
        self.max_attempts = value;
        self
    }

    pub fn initial_delay(mut self, value: Duration) -> Self {
        self.initial_delay = value;
        self
    }

    pub fn max_delay(mut self, value: Duration) -> Self {
        self.max_delay = value;
        self
    }

    pub fn max_total_time(mut self, value: Duration) -> Self {
        self.max_total_time = Some(value);
        self
    }

    pub fn strategy(mut self, value: BackoffStrategy) -> Self {
        self.strategy = value;
        self
    }

    pub fn retryable(mut self, category: ErrorCategory) -> Self {
        self.retryable_categories.insert(category);
        self
    }

    pub fn use_circuit_breaker(mut self, value: bool) -> Self {
        self.use_circuit_breaker = value;
        self
    }

    /// The delay before the attempt numbered `attempt` (0-based),
    /// capped at `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64();
        let raw = match self.strategy {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Exponential { factor } => base * factor.powi(attempt as i32),
            BackoffStrategy::ExponentialWithJitter { factor, jitter } => {
                let scaled = base * factor.powi(attempt as i32);
                let noise = rand::thread_rng().gen_range(-jitter..=jitter);
                scaled * (1.0 + noise)
            }
            BackoffStrategy::Linear { increment } => {
                base + increment.as_secs_f64() * attempt as f64
            }
        };
        let capped = raw.max(0.0).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }
}

/// Why [`execute`] gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The operation's own error, on its last permitted attempt.
    Exhausted { attempts: u32, source: E },
    /// The category was not in `retryable_categories`.
    NotRetryable { source: E },
    /// The circuit breaker for this endpoint is open.
    CircuitOpen { host: String, port: u16, retry_after: Instant },
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryError::Exhausted { attempts, source } => {
                write!(f, "retry exhausted after {attempts} attempts: {source}")
            }
            RetryError::NotRetryable { source } => write!(f, "non-retryable failure: {source}"),
            RetryError::CircuitOpen { host, port, .. } => {
                write!(f, "circuit breaker open for {host}:{port}")
            }
        }
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for RetryError<E> {}

/// Run `op` under `policy`, classifying failures with `classify` and,
/// if `policy.use_circuit_breaker` and `breaker` is supplied, gating
/// and recording outcomes against it.
pub fn execute<F, T, E>(
    policy: &RetryPolicy,
    breaker: Option<&CircuitBreaker>,
    classify: impl Fn(&E) -> ErrorCategory,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Result<T, E>,
{
    let started = Instant::now();
    let mut attempt = 0;

    loop {
        if let (true, Some(breaker)) = (policy.use_circuit_breaker, breaker) {
            if let Err(retry_after) = breaker.check_state() {
                if let Some(budget) = policy.max_total_time {
                    if retry_after <= started + budget {
                        let wait = retry_after.saturating_duration_since(Instant::now());
                        std::thread::sleep(wait);
                        continue;
                    }
                }
                return Err(RetryError::CircuitOpen {
                    host: breaker.host().to_string(),
                    port: breaker.port(),
                    retry_after,
                });
            }
        }

        match op() {
            Ok(value) => {
                if let Some(breaker) = breaker {
                    breaker.record_success();
                }
                return Ok(value);
            }
            Err(error) => {
                let category = classify(&error);
                if let Some(breaker) = breaker {
                    if category.counts_toward_breaker() {
                        breaker.record_failure();
                    }
                }

                attempt += 1;
                let exceeded_attempts = attempt >= policy.max_attempts;
                let exceeded_time = policy
                    .max_total_time
                    .is_some_and(|budget| started.elapsed() >= budget);

                if !policy.retryable_categories.contains(&category) {
                    return Err(RetryError::NotRetryable { source: error });
                }
                if exceeded_attempts || exceeded_time {
                    return Err(RetryError::Exhausted { attempts: attempt, source: error });
                }

                std::thread::sleep(policy.delay(attempt - 1));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn fixed_strategy_never_grows() {
        let policy = RetryPolicy::new()
            .initial_delay(Duration::from_millis(50))
            .strategy(BackoffStrategy::Fixed);
        assert_eq!(policy.delay(0), Duration::from_millis(50));
        assert_eq!(policy.delay(5), Duration::from_millis(50));
    }

    #[test]
    fn exponential_strategy_doubles() {
        let policy = RetryPolicy::new()
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_secs(10))
            .strategy(BackoffStrategy::Exponential { factor: 2.0 });
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
    }

    #[test]
    fn delay_is_capped_at_max_delay() {
        let policy = RetryPolicy::new()
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(300))
            .strategy(BackoffStrategy::Exponential { factor: 2.0 });
        assert_eq!(policy.delay(10), Duration::from_millis(300));
    }

    #[rstest]
    #[case(0, 10.0)]
    #[case(1, 20.0)]
    fn linear_strategy_adds_increment_per_attempt(#[case] attempt: u32, #[case] expected_ms: f64) {
        let policy = RetryPolicy::new()
            .initial_delay(Duration::from_millis(10))
            .max_delay(Duration::from_secs(10))
            .strategy(BackoffStrategy::Linear { increment: Duration::from_millis(10) });
        assert_eq!(policy.delay(attempt), Duration::from_secs_f64(expected_ms / 1000.0));
    }

    #[test]
    fn non_retryable_category_fails_immediately() {
        let policy = RetryPolicy::new();
        let mut calls = 0;
        let result: Result<(), RetryError<&str>> = execute(&policy, None, |_| ErrorCategory::Configuration, || {
            calls += 1;
            Err("bad config")
        });
        assert!(matches!(result, Err(RetryError::NotRetryable { .. })));
        assert_eq!(calls, 1);
    }

    #[test]
    fn retryable_category_is_attempted_up_to_max_attempts() {
        let policy = RetryPolicy::new()
            .max_attempts(3)
            .initial_delay(Duration::from_millis(1))
            .strategy(BackoffStrategy::Fixed);
        let mut calls = 0;
        let result: Result<(), RetryError<&str>> = execute(&policy, None, |_| ErrorCategory::Connection, || {
            calls += 1;
            Err("down")
        });
        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 3, .. })));
        assert_eq!(calls, 3);
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let policy = RetryPolicy::new()
            .max_attempts(5)
            .initial_delay(Duration::from_millis(1))
            .strategy(BackoffStrategy::Fixed);
        let mut calls = 0;
        let result = execute(&policy, None, |_: &&str| ErrorCategory::Connection, || {
            calls += 1;
            if calls < 3 {
                Err("down")
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 3);
    }
}
