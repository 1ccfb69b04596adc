//! Circuit breaker for a single downstream dependency.
//!
//! A circuit breaker watches the outcome of calls to one dependency and stops
//! sending traffic to it while it is failing, giving it time to recover.
//!
//! # States
//!
//! - **Closed**: calls pass through; outcomes land in a bounded sliding window
//! - **Open**: calls fail immediately with [`CircuitBreakerError::Open`]
//! - **HalfOpen**: a limited number of probe calls test whether the
//!   dependency recovered
//!
//! The circuit opens once the window holds at least `minimum_throughput`
//! outcomes and either the failure rate reaches
//! `failure_threshold / minimum_throughput` or the slow-call rate reaches
//! `slow_call_rate_threshold`. It moves to half-open lazily, on the first
//! call attempt after `timeout` has passed since the last failure.
//!
//! # Example
//!
//! ```no_run
//! use llm_resilience_core::domain::CircuitBreakerConfig;
//! use llm_resilience_engine::resilience::circuit_breaker::CircuitBreaker;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let breaker = CircuitBreaker::new("search", CircuitBreakerConfig::default());
//!
//! match breaker.call(|| async { Ok::<_, std::io::Error>(42) }).await {
//!     Ok(result) => println!("Success: {}", result),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use llm_resilience_core::domain::{
    CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitMetrics, CircuitState,
};
use metrics::{counter, gauge};
use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, the operation was not invoked
    #[error("Circuit breaker is open for {name}")]
    Open { name: String },

    /// Half-open probe limit reached, the operation was not invoked
    #[error("Circuit breaker rejected request for {name}")]
    Rejected { name: String },

    /// The operation ran and failed
    #[error("Execution failed: {0}")]
    Execution(E),
}

impl<E> CircuitBreakerError<E> {
    /// Returns the operation's own error, if the operation ran.
    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitBreakerError::Execution(e) => Some(e),
            _ => None,
        }
    }

    /// True when the breaker refused the call without running it.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, CircuitBreakerError::Execution(_))
    }
}

#[derive(Debug, Clone, Copy)]
struct Outcome {
    failed: bool,
    slow: bool,
}

/// Mutable state, guarded by the breaker's mutex
struct BreakerState {
    state: CircuitState,
    metrics: CircuitMetrics,
    window: VecDeque<Outcome>,
    half_open_successes: u32,
    half_open_in_flight: u32,
    last_failure_time: Option<Instant>,
    opened_at: Option<Instant>,
    state_changed_at: DateTime<Utc>,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            metrics: CircuitMetrics::default(),
            window: VecDeque::new(),
            half_open_successes: 0,
            half_open_in_flight: 0,
            last_failure_time: None,
            opened_at: None,
            state_changed_at: Utc::now(),
        }
    }
}

/// Circuit breaker implementation
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!("Creating circuit breaker: {}", name);
        gauge!("circuit_breaker_state", "breaker" => name.clone())
            .set(CircuitState::Closed.as_gauge());

        Self {
            name,
            config,
            state: Mutex::new(BreakerState::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state. Does not trigger the lazy open to half-open move.
    pub async fn state(&self) -> CircuitState {
        self.state.lock().await.state
    }

    /// Lifetime counters
    pub async fn metrics(&self) -> CircuitMetrics {
        self.state.lock().await.metrics.clone()
    }

    pub async fn snapshot(&self) -> CircuitBreakerSnapshot {
        let state = self.state.lock().await;
        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state: state.state,
            average_response_time_ms: state.metrics.average_response_time_ms(),
            metrics: state.metrics.clone(),
            config: self.config.clone(),
            state_changed_at: state.state_changed_at,
        }
    }

    /// Call a function with circuit breaker protection.
    ///
    /// The operation runs outside the breaker's lock. Its wall-clock duration
    /// is measured and a call at or above `slow_call_threshold` counts as slow
    /// even when it succeeds.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let half_open_probe = self.before_call().await?;

        let started = Instant::now();
        let result = f().await;
        let elapsed = started.elapsed();

        {
            let mut state = self.state.lock().await;
            if half_open_probe {
                state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);
            }
            self.record_outcome(&mut state, elapsed, result.is_ok());
        }

        result.map_err(CircuitBreakerError::Execution)
    }

    /// Admission check for `call`. Returns whether the call is a half-open probe.
    async fn before_call<E>(&self) -> Result<bool, CircuitBreakerError<E>> {
        let mut state = self.state.lock().await;
        self.refresh(&mut state);

        match state.state {
            CircuitState::Closed => Ok(false),
            CircuitState::Open => {
                self.reject(&mut state, "open");
                Err(CircuitBreakerError::Open {
                    name: self.name.clone(),
                })
            }
            CircuitState::HalfOpen => {
                if state.half_open_in_flight >= self.config.half_open_max_calls {
                    self.reject(&mut state, "half_open_limit");
                    Err(CircuitBreakerError::Rejected {
                        name: self.name.clone(),
                    })
                } else {
                    state.half_open_in_flight += 1;
                    Ok(true)
                }
            }
        }
    }

    /// Admission check for callers that drive the breaker explicitly.
    ///
    /// Performs the lazy open to half-open move but does not count half-open
    /// admissions. A refused request is recorded as rejected.
    pub async fn allow_request(&self) -> bool {
        let mut state = self.state.lock().await;
        self.refresh(&mut state);

        if state.state == CircuitState::Open {
            self.reject(&mut state, "open");
            return false;
        }
        true
    }

    /// Reports a successful call made outside [`CircuitBreaker::call`].
    pub async fn record_success(&self, elapsed: Duration) {
        let mut state = self.state.lock().await;
        self.record_outcome(&mut state, elapsed, true);
    }

    /// Reports a failed call made outside [`CircuitBreaker::call`].
    pub async fn record_failure(&self, elapsed: Duration) {
        let mut state = self.state.lock().await;
        self.record_outcome(&mut state, elapsed, false);
    }

    /// Reset the circuit breaker to closed state and zero its metrics
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        info!("Manually resetting circuit breaker: {}", self.name);
        *state = BreakerState::new();
        gauge!("circuit_breaker_state", "breaker" => self.name.clone())
            .set(CircuitState::Closed.as_gauge());
    }

    fn refresh(&self, state: &mut BreakerState) {
        if state.state != CircuitState::Open {
            return;
        }
        // The open period runs from the later of the opening and the last failure
        let since = match (state.opened_at, state.last_failure_time) {
            (Some(opened), Some(failed)) => opened.max(failed),
            (Some(opened), None) => opened,
            (None, Some(failed)) => failed,
            (None, None) => return,
        };
        let timed_out = since.elapsed() >= self.config.timeout;
        if timed_out {
            self.transition(state, CircuitState::HalfOpen);
        }
    }

    fn reject(&self, state: &mut BreakerState, reason: &'static str) {
        state.metrics.record_rejected();
        counter!(
            "circuit_breaker_rejected_total",
            "breaker" => self.name.clone(),
            "reason" => reason
        )
        .increment(1);
        debug!("Circuit breaker {} rejected a call ({})", self.name, reason);
    }

    fn record_outcome(&self, state: &mut BreakerState, elapsed: Duration, success: bool) {
        let slow = elapsed >= self.config.slow_call_threshold;

        if success {
            state.metrics.record_success(elapsed, slow);
        } else {
            state.metrics.record_failure(elapsed, slow);
            state.last_failure_time = Some(Instant::now());
        }

        counter!(
            "circuit_breaker_calls_total",
            "breaker" => self.name.clone(),
            "outcome" => if success { "success" } else { "failure" }
        )
        .increment(1);

        match state.state {
            CircuitState::Closed => {
                if state.window.len() >= self.config.sliding_window_size as usize {
                    state.window.pop_front();
                }
                state.window.push_back(Outcome {
                    failed: !success,
                    slow,
                });
                if self.should_open(&state.window) {
                    self.transition(state, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                if success {
                    state.half_open_successes += 1;
                    if state.half_open_successes >= self.config.success_threshold {
                        self.transition(state, CircuitState::Closed);
                    }
                } else {
                    self.transition(state, CircuitState::Open);
                }
            }
            CircuitState::Open => {
                // Late completion of a call admitted before the circuit opened
            }
        }
    }

    fn should_open(&self, window: &VecDeque<Outcome>) -> bool {
        let calls = window.len();
        if calls < self.config.minimum_throughput as usize {
            return false;
        }

        let failures = window.iter().filter(|o| o.failed).count();
        let slow = window.iter().filter(|o| o.slow).count();
        let failure_rate = failures as f64 / calls as f64;
        let slow_rate = slow as f64 / calls as f64;

        failure_rate >= self.config.failure_rate_threshold()
            || slow_rate >= self.config.slow_call_rate_threshold
    }

    fn transition(&self, state: &mut BreakerState, to: CircuitState) {
        let from = state.state;
        if from == to {
            return;
        }

        state.state = to;
        state.state_changed_at = Utc::now();
        state.half_open_successes = 0;
        state.half_open_in_flight = 0;

        match to {
            CircuitState::Open => {
                state.opened_at = Some(Instant::now());
                state.metrics.times_opened += 1;
                warn!(
                    breaker = %self.name,
                    from = %from,
                    failed_calls = state.metrics.failed_calls,
                    "Circuit breaker {} opening",
                    self.name
                );
            }
            CircuitState::HalfOpen => {
                info!("Circuit breaker {} transitioning to half-open", self.name);
            }
            CircuitState::Closed => {
                state.metrics.times_closed += 1;
                state.window.clear();
                info!(
                    "Circuit breaker {} closing after {} successes",
                    self.name, self.config.success_threshold
                );
            }
        }

        gauge!("circuit_breaker_state", "breaker" => self.name.clone()).set(to.as_gauge());
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
