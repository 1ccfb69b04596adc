use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use validator::{Validate, ValidationError};

use super::duration::secs;

/// Number of recent response times kept for the moving average.
pub const RESPONSE_TIME_WINDOW: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through, outcomes are counted
    Closed,
    /// Calls fail immediately without reaching the dependency
    Open,
    /// Probe calls are admitted to test recovery
    HalfOpen,
}

impl CircuitState {
    /// Numeric encoding used for gauges.
    pub fn as_gauge(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Circuit breaker tuning. Immutable once the breaker is built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_circuit_config"))]
pub struct CircuitBreakerConfig {
    /// Failures (out of `minimum_throughput` calls) that open the circuit
    #[validate(range(min = 1))]
    pub failure_threshold: u32,
    /// Successes in half-open needed to close the circuit
    #[validate(range(min = 1))]
    pub success_threshold: u32,
    /// Time after the last failure before a probe is allowed
    #[serde(with = "secs")]
    pub timeout: Duration,
    /// Calls at or above this latency count as slow
    #[serde(with = "secs")]
    pub slow_call_threshold: Duration,
    #[validate(range(min = 0.0, max = 1.0))]
    pub slow_call_rate_threshold: f64,
    /// Calls needed in the window before rates are evaluated
    #[validate(range(min = 1))]
    pub minimum_throughput: u32,
    /// Number of recent outcomes rates are computed over
    pub sliding_window_size: u32,
    /// Concurrent probes admitted by `call` while half-open
    #[validate(range(min = 1))]
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            timeout: Duration::from_secs(60),
            slow_call_threshold: Duration::from_secs(10),
            slow_call_rate_threshold: 0.5,
            minimum_throughput: 10,
            sliding_window_size: 100,
            half_open_max_calls: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Failure rate at which the circuit opens.
    pub fn failure_rate_threshold(&self) -> f64 {
        self.failure_threshold as f64 / self.minimum_throughput.max(1) as f64
    }
}

fn validate_circuit_config(config: &CircuitBreakerConfig) -> Result<(), ValidationError> {
    if config.failure_threshold > config.minimum_throughput {
        return Err(ValidationError::new("failure_threshold_exceeds_minimum_throughput"));
    }
    if config.sliding_window_size < config.minimum_throughput {
        return Err(ValidationError::new("sliding_window_smaller_than_minimum_throughput"));
    }
    Ok(())
}

/// Lifetime counters for one breaker.
///
/// Counters only grow; the whole struct is replaced on an explicit reset.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CircuitMetrics {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub slow_calls: u64,
    pub rejected_calls: u64,
    pub times_opened: u64,
    pub times_closed: u64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub recent_response_times_ms: VecDeque<f64>,
}

impl CircuitMetrics {
    pub fn record_success(&mut self, elapsed: Duration, slow: bool) {
        self.total_calls += 1;
        self.successful_calls += 1;
        if slow {
            self.slow_calls += 1;
        }
        self.last_success_at = Some(Utc::now());
        self.push_response_time(elapsed);
    }

    pub fn record_failure(&mut self, elapsed: Duration, slow: bool) {
        self.total_calls += 1;
        self.failed_calls += 1;
        if slow {
            self.slow_calls += 1;
        }
        self.last_failure_at = Some(Utc::now());
        self.push_response_time(elapsed);
    }

    pub fn record_rejected(&mut self) {
        self.rejected_calls += 1;
    }

    fn push_response_time(&mut self, elapsed: Duration) {
        if self.recent_response_times_ms.len() >= RESPONSE_TIME_WINDOW {
            self.recent_response_times_ms.pop_front();
        }
        self.recent_response_times_ms
            .push_back(elapsed.as_secs_f64() * 1000.0);
    }

    /// Moving average over the last [`RESPONSE_TIME_WINDOW`] calls.
    pub fn average_response_time_ms(&self) -> Option<f64> {
        if self.recent_response_times_ms.is_empty() {
            return None;
        }
        let sum: f64 = self.recent_response_times_ms.iter().sum();
        Some(sum / self.recent_response_times_ms.len() as f64)
    }
}

/// Serializable point-in-time view of a breaker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub metrics: CircuitMetrics,
    pub config: CircuitBreakerConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_response_time_ms: Option<f64>,
    pub state_changed_at: DateTime<Utc>,
}
