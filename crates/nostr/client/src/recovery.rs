//! Failure recovery primitives: a per-relay circuit breaker and retry backoff
//! policies.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow normally
    Closed,
    /// Requests are refused until the open timeout elapses
    Open,
    /// A trial request is allowed through
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: u32,
    successes: u32,
    opened_at: Option<Instant>,
    /// Start of the half-open trial still awaiting its outcome
    trial_started: Option<Instant>,
}

/// Circuit breaker shared by every call that touches one relay.
///
/// All transitions happen under one lock, so concurrent broadcasts never
/// interleave a read and a write of the counters.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    success_threshold: u32,
    open_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, success_threshold: u32, open_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            success_threshold: success_threshold.max(1),
            open_timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                opened_at: None,
                trial_started: None,
            }),
        }
    }

    /// Whether a request may proceed. An open circuit whose timeout has
    /// elapsed moves to half-open and lets the caller through as the trial.
    /// While half-open only one trial runs at a time; a trial that never
    /// reports back is abandoned after the open timeout.
    pub async fn is_allowed(&self) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                let free = inner
                    .trial_started
                    .is_none_or(|at| at.elapsed() >= self.open_timeout);
                if free {
                    inner.trial_started = Some(Instant::now());
                }
                free
            }
            CircuitState::Open => {
                let expired = inner
                    .opened_at
                    .is_none_or(|at| at.elapsed() >= self.open_timeout);
                if expired {
                    debug!("Circuit half-open after {:?}", self.open_timeout);
                    inner.state = CircuitState::HalfOpen;
                    inner.successes = 0;
                    inner.trial_started = Some(Instant::now());
                }
                expired
            }
        }
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        inner.trial_started = None;
        match inner.state {
            CircuitState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.success_threshold {
                    debug!("Circuit closed");
                    inner.state = CircuitState::Closed;
                    inner.failures = 0;
                    inner.successes = 0;
                    inner.opened_at = None;
                }
            }
            CircuitState::Closed => inner.failures = 0,
            CircuitState::Open => {}
        }
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.trial_started = None;
        match inner.state {
            CircuitState::HalfOpen => {
                warn!("Trial request failed, circuit re-opened");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.failure_threshold {
                    warn!("Circuit opened after {} consecutive failures", inner.failures);
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::Open => inner.opened_at = Some(Instant::now()),
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.successes = 0;
        inner.opened_at = None;
        inner.trial_started = None;
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Successes in half-open state before the circuit closes
    pub success_threshold: u32,
    /// Seconds an open circuit waits before allowing a trial request
    pub open_timeout_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout_secs: 30,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn build(&self) -> CircuitBreaker {
        CircuitBreaker::new(
            self.failure_threshold,
            self.success_threshold,
            Duration::from_secs(self.open_timeout_secs),
        )
    }
}

/// Delay before retry number `attempt` (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffPolicy {
    Fixed { delay_ms: u64 },
    Exponential { initial_ms: u64, max_ms: u64 },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            initial_ms: 250,
            max_ms: 5_000,
        }
    }
}

impl BackoffPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            BackoffPolicy::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            BackoffPolicy::Exponential { initial_ms, max_ms } => {
                let exponent = attempt.saturating_sub(1).min(31);
                let delay = initial_ms.saturating_mul(1u64 << exponent);
                Duration::from_millis(delay.min(max_ms))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_circuit_opens_after_threshold() {
        let breaker = CircuitBreaker::new(3, 1, Duration::from_secs(60));
        for _ in 0..2 {
            breaker.record_failure().await;
        }
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert!(breaker.is_allowed().await);

        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);
        assert!(!breaker.is_allowed().await);

        breaker.reset().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new(2, 1, Duration::from_secs(60));
        breaker.record_failure().await;
        breaker.record_success().await;
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_transitions() {
        let breaker = CircuitBreaker::new(1, 2, Duration::from_millis(0));
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);

        // Zero timeout: next check moves to half-open.
        assert!(breaker.is_allowed().await);
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);

        breaker.record_success().await;
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
        breaker.record_success().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);

        breaker.record_failure().await;
        assert!(breaker.is_allowed().await);
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_half_open_admits_one_trial() {
        let breaker = CircuitBreaker::new(1, 2, Duration::from_millis(50));
        breaker.record_failure().await;
        assert!(!breaker.is_allowed().await);
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(breaker.is_allowed().await);
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
        assert!(!breaker.is_allowed().await);

        // The outcome frees the slot for the next trial.
        breaker.record_success().await;
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
        assert!(breaker.is_allowed().await);
        assert!(!breaker.is_allowed().await);

        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);
        assert!(!breaker.is_allowed().await);
    }

    #[tokio::test]
    async fn test_abandoned_trial_expires() {
        let breaker = CircuitBreaker::new(1, 1, Duration::from_millis(30));
        breaker.record_failure().await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(breaker.is_allowed().await);
        assert!(!breaker.is_allowed().await);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(breaker.is_allowed().await);
    }

    #[test]
    fn test_backoff_policies() {
        let fixed = BackoffPolicy::Fixed { delay_ms: 100 };
        assert_eq!(fixed.delay(1), Duration::from_millis(100));
        assert_eq!(fixed.delay(7), Duration::from_millis(100));

        let exp = BackoffPolicy::Exponential {
            initial_ms: 100,
            max_ms: 1_000,
        };
        assert_eq!(exp.delay(1), Duration::from_millis(100));
        assert_eq!(exp.delay(2), Duration::from_millis(200));
        assert_eq!(exp.delay(4), Duration::from_millis(800));
        assert_eq!(exp.delay(5), Duration::from_millis(1_000));
        assert_eq!(exp.delay(64), Duration::from_millis(1_000));
    }

    #[test]
    fn test_backoff_policy_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            backoff: BackoffPolicy,
        }
        let parsed: Wrapper = toml::from_str(
            r#"
            [backoff]
            type = "fixed"
            delay_ms = 50
            "#,
        )
        .unwrap();
        assert_eq!(parsed.backoff, BackoffPolicy::Fixed { delay_ms: 50 });
    }
}
