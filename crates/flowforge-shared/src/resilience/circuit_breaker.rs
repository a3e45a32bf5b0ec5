//! Concrete circuit breaker, protecting the queue/database/search-index
//! collaborators (spec.md §5 "shared resources").

use super::{CircuitBreakerBehavior, CircuitBreakerMetrics, CircuitState};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

fn state_from_u8(raw: u8) -> CircuitState {
    match raw {
        STATE_OPEN => CircuitState::Open,
        STATE_HALF_OPEN => CircuitState::HalfOpen,
        _ => CircuitState::Closed,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
        }
    }
}

/// A single named circuit breaker. Threshold-triggered open, timeout-gated
/// half-open probing, success-threshold-gated close — the same state
/// machine the messaging client wraps its provider calls in.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    half_open_successes: AtomicU32,
    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    opened_at: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: AtomicU8::new(STATE_CLOSED),
            consecutive_failures: AtomicU32::new(0),
            half_open_successes: AtomicU32::new(0),
            total_calls: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            opened_at: Mutex::new(None),
        }
    }

    /// Runs `op` through the breaker: short-circuits with `circuit_open`
    /// if the breaker is not currently allowing calls, otherwise records
    /// the outcome against the breaker before returning it.
    pub async fn call<F, T, E, Fut>(&self, op: F) -> Result<T, CircuitOpenOr<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        if !self.should_allow() {
            return Err(CircuitOpenOr::Open);
        }
        let start = Instant::now();
        match op().await {
            Ok(value) => {
                self.record_success(start.elapsed());
                Ok(value)
            }
            Err(err) => {
                self.record_failure(start.elapsed());
                Err(CircuitOpenOr::Inner(err))
            }
        }
    }

    fn try_transition_to_half_open(&self) -> bool {
        let mut opened_at = self.opened_at.lock().expect("circuit breaker mutex poisoned");
        match *opened_at {
            Some(since) if since.elapsed() >= self.config.timeout => {
                self.state.store(STATE_HALF_OPEN, Ordering::SeqCst);
                self.half_open_successes.store(0, Ordering::SeqCst);
                *opened_at = None;
                true
            }
            _ => false,
        }
    }
}

/// Wraps either the breaker's own rejection or the wrapped operation's error.
#[derive(Debug)]
pub enum CircuitOpenOr<E> {
    Open,
    Inner(E),
}

impl CircuitBreakerBehavior for CircuitBreaker {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> CircuitState {
        state_from_u8(self.state.load(Ordering::SeqCst))
    }

    fn should_allow(&self) -> bool {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => self.try_transition_to_half_open(),
        }
    }

    fn record_success(&self, _duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::SeqCst);

        if self.state() == CircuitState::HalfOpen {
            let successes = self.half_open_successes.fetch_add(1, Ordering::SeqCst) + 1;
            if successes >= self.config.success_threshold {
                self.state.store(STATE_CLOSED, Ordering::SeqCst);
            }
        }
    }

    fn record_failure(&self, _duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.failure_count.fetch_add(1, Ordering::Relaxed);

        if self.state() == CircuitState::HalfOpen {
            self.force_open();
            return;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.config.failure_threshold {
            self.force_open();
        }
    }

    fn force_open(&self) {
        self.state.store(STATE_OPEN, Ordering::SeqCst);
        *self.opened_at.lock().expect("circuit breaker mutex poisoned") = Some(Instant::now());
    }

    fn force_closed(&self) {
        self.state.store(STATE_CLOSED, Ordering::SeqCst);
        self.consecutive_failures.store(0, Ordering::SeqCst);
        *self.opened_at.lock().expect("circuit breaker mutex poisoned") = None;
    }

    fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            success_count: self.success_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::SeqCst),
            current_state: self.state(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32, success_threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold,
                success_threshold,
                timeout: Duration::from_millis(20),
            },
        )
    }

    #[test]
    fn opens_after_failure_threshold() {
        let cb = breaker(2, 1);
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure(Duration::ZERO);
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure(Duration::ZERO);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.should_allow_without_timeout_elapsed());
    }

    impl CircuitBreaker {
        fn should_allow_without_timeout_elapsed(&self) -> bool {
            matches!(self.state(), CircuitState::Open)
        }
    }

    #[tokio::test]
    async fn half_open_after_timeout_then_closes_on_success_threshold() {
        let cb = breaker(1, 2);
        cb.record_failure(Duration::ZERO);
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(cb.should_allow());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success(Duration::ZERO);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success(Duration::ZERO);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn failure_in_half_open_reopens_immediately() {
        let cb = breaker(1, 2);
        cb.record_failure(Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(cb.should_allow());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_failure(Duration::ZERO);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn call_short_circuits_while_open() {
        let cb = breaker(1, 1);
        cb.force_open();
        let result: Result<(), CircuitOpenOr<&str>> = cb.call(|| async { Ok(()) }).await;
        assert!(matches!(result, Err(CircuitOpenOr::Open)));
    }
}
