//! Retry manager with classification-driven decisions and adaptive backoff.
//!
//! Every call is tracked under an operation key: the operation name, or the
//! name plus a hash of the call's arguments for [`RetryManager::run_with_args`].
//! Each key owns a [`RetryStats`] record and, when enabled, a circuit breaker
//! from the shared [`CircuitBreakerRegistry`].
//!
//! Per attempt:
//!
//! 1. an open breaker fails the call with [`RetryError::CircuitOpen`]
//!    without invoking the operation, keeping the error of the previous
//!    attempt if there was one
//! 2. a success is recorded and reported to the breaker
//! 3. a failure is classified; a fail-fast classification or the last
//!    attempt reports the failure to the breaker and returns the original
//!    error, anything else sleeps for the backoff delay and retries
//!
//! Only the final failure of a call is reported to the breaker, so one
//! retried call weighs the same as one unretried call.
//!
//! # Example
//!
//! ```no_run
//! use llm_resilience_engine::classifier::ErrorClassifier;
//! use llm_resilience_engine::resilience::{CircuitBreakerRegistry, RetryManager};
//! use llm_resilience_core::domain::RetryConfig;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = RetryManager::new(
//!     Arc::new(ErrorClassifier::default()),
//!     Arc::new(CircuitBreakerRegistry::default()),
//!     RetryConfig::default(),
//! );
//!
//! let value = manager
//!     .run("search.query", None, || async { Ok::<_, std::io::Error>(42) })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use dashmap::DashMap;
use llm_resilience_core::domain::{
    BackoffStrategy, CircuitBreakerSnapshot, ClassifiedError, ErrorCategory, ErrorContext,
    RetryAttempt, RetryConfig, RetryStats,
};
use metrics::counter;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backoff::compute_delay;
use super::circuit_breaker::CircuitBreaker;
use super::registry::CircuitBreakerRegistry;
use crate::classifier::ErrorClassifier;

/// Failure rate above which the adaptive policy stretches the base delay.
const HIGH_FAILURE_RATE: f64 = 0.7;
/// Base delay multiplier applied for keys above [`HIGH_FAILURE_RATE`].
const SLOWDOWN_FACTOR: f64 = 1.5;
/// Smallest base delay used once an attempt hit a rate limit.
pub const RATE_LIMIT_MIN_DELAY: Duration = Duration::from_secs(5);

/// Retry errors
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The key's breaker is open; the operation was not invoked again.
    /// `last_error` holds the failure of an earlier attempt of this call.
    #[error("Circuit breaker is open for {name}")]
    CircuitOpen {
        name: String,
        last_error: Option<E>,
        attempts: u32,
    },

    /// The operation failed and no further attempt will be made
    #[error("Operation failed after {attempts} attempt(s): {error}")]
    Failed {
        error: E,
        attempts: u32,
        classification: Box<ClassifiedError>,
    },

    /// A retry wait was cancelled
    #[error("Retry cancelled after {attempts} attempt(s)")]
    Cancelled { last_error: Option<E>, attempts: u32 },
}

impl<E> RetryError<E> {
    /// Returns the operation's own error, unchanged.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Failed { error, .. } => Some(error),
            RetryError::CircuitOpen { last_error, .. }
            | RetryError::Cancelled { last_error, .. } => last_error,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::CircuitOpen { attempts, .. }
            | RetryError::Failed { attempts, .. }
            | RetryError::Cancelled { attempts, .. } => *attempts,
        }
    }

    pub fn classification(&self) -> Option<&ClassifiedError> {
        match self {
            RetryError::Failed { classification, .. } => Some(classification),
            _ => None,
        }
    }
}

/// Builds the key used for stats and breakers of a call with arguments.
pub fn operation_key<A: Hash + ?Sized>(operation: &str, args: &A) -> String {
    let mut hasher = DefaultHasher::new();
    args.hash(&mut hasher);
    format!("{}:{:016x}", operation, hasher.finish())
}

/// Executes operations with bounded, classified, adaptive retries.
pub struct RetryManager {
    classifier: Arc<ErrorClassifier>,
    breakers: Arc<CircuitBreakerRegistry>,
    default_config: RetryConfig,
    stats: DashMap<String, RetryStats>,
    shutdown: CancellationToken,
}

impl RetryManager {
    pub fn new(
        classifier: Arc<ErrorClassifier>,
        breakers: Arc<CircuitBreakerRegistry>,
        default_config: RetryConfig,
    ) -> Self {
        Self {
            classifier,
            breakers,
            default_config,
            stats: DashMap::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn default_config(&self) -> &RetryConfig {
        &self.default_config
    }

    /// Runs `f` under the operation's own key.
    pub async fn run<F, Fut, T, E>(
        &self,
        operation: &str,
        config: Option<&RetryConfig>,
        f: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.execute(operation, operation.to_string(), config, None, f)
            .await
    }

    /// Runs `f` under a key derived from the operation name and `args`.
    pub async fn run_with_args<A, F, Fut, T, E>(
        &self,
        operation: &str,
        args: &A,
        config: Option<&RetryConfig>,
        f: F,
    ) -> Result<T, RetryError<E>>
    where
        A: Hash + ?Sized,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.execute(operation, operation_key(operation, args), config, None, f)
            .await
    }

    /// Runs `f` with an extra token that cancels this call's retry waits.
    pub async fn run_with_token<F, Fut, T, E>(
        &self,
        operation: &str,
        config: Option<&RetryConfig>,
        token: &CancellationToken,
        f: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.execute(operation, operation.to_string(), config, Some(token), f)
            .await
    }

    async fn execute<F, Fut, T, E>(
        &self,
        operation: &str,
        key: String,
        config: Option<&RetryConfig>,
        token: Option<&CancellationToken>,
        mut f: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut config = self.effective_config(&key, config.unwrap_or(&self.default_config));
        let breaker = config
            .circuit_breaker_enabled
            .then(|| self.breakers.get_or_create(&key, &config.circuit_breaker));

        let mut attempt: u32 = 0;
        let mut last_error: Option<E> = None;

        loop {
            if self.is_cancelled(token) {
                self.record_call(operation, &key, false);
                return Err(RetryError::Cancelled {
                    last_error,
                    attempts: attempt,
                });
            }

            attempt += 1;

            if let Some(breaker) = &breaker {
                if !breaker.allow_request().await {
                    debug!("Circuit open for {}, not invoking {}", key, operation);
                    self.record_call(operation, &key, false);
                    return Err(RetryError::CircuitOpen {
                        name: key,
                        last_error,
                        attempts: attempt - 1,
                    });
                }
            }

            let started = Instant::now();
            let result = f().await;
            let elapsed = started.elapsed();

            let error = match result {
                Ok(value) => {
                    self.record_attempt(operation, &key, attempt, Duration::ZERO, true, elapsed, None);
                    self.record_call(operation, &key, true);
                    report(&breaker, elapsed, true).await;
                    if attempt > 1 {
                        info!("{} succeeded on attempt {}", operation, attempt);
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let context = ErrorContext::new(operation)
                .with_metadata("retry_key", key.as_str())
                .with_metadata("attempt", attempt);
            let classified = self.classifier.classify(&error, &context);

            if classified.category == ErrorCategory::RateLimit {
                config.backoff = BackoffStrategy::JitteredExponential;
                config.base_delay = config.base_delay.max(RATE_LIMIT_MIN_DELAY);
            }

            let fail_fast = classified.is_fail_fast();
            if fail_fast || attempt >= config.max_attempts {
                self.record_attempt(
                    operation,
                    &key,
                    attempt,
                    Duration::ZERO,
                    false,
                    elapsed,
                    Some(classified.category),
                );
                self.record_call(operation, &key, false);
                report(&breaker, elapsed, false).await;

                let reason = if fail_fast { "fail_fast" } else { "exhausted" };
                counter!(
                    "retry_exhausted_total",
                    "operation" => operation.to_string(),
                    "reason" => reason
                )
                .increment(1);
                warn!(
                    category = %classified.category,
                    strategy = ?classified.recovery_strategy,
                    "{} failed after {} attempt(s) ({}): {}",
                    operation,
                    attempt,
                    reason,
                    error
                );

                return Err(RetryError::Failed {
                    error,
                    attempts: attempt,
                    classification: Box::new(classified),
                });
            }

            let delay = compute_delay(&config, attempt);
            self.record_attempt(
                operation,
                &key,
                attempt,
                delay,
                false,
                elapsed,
                Some(classified.category),
            );
            debug!(
                category = %classified.category,
                "{} attempt {}/{} failed: {}. Retrying in {:?}",
                operation,
                attempt,
                config.max_attempts,
                error,
                delay
            );
            last_error = Some(error);

            if !self.wait(delay, token).await {
                info!("Retry of {} cancelled after {} attempt(s)", operation, attempt);
                self.record_call(operation, &key, false);
                return Err(RetryError::Cancelled {
                    last_error,
                    attempts: attempt,
                });
            }
        }
    }

    /// Per-call copy of `base`, adjusted from the key's history.
    pub fn effective_config(&self, key: &str, base: &RetryConfig) -> RetryConfig {
        let mut config = base.clone();
        if !config.adaptive {
            return config;
        }

        let Some(stats) = self.stats.get(key) else {
            return config;
        };
        if stats.total_attempts < config.adaptive_min_samples {
            return config;
        }

        if stats.success_rate() < config.adaptive_success_threshold {
            config.max_attempts = config.max_attempts.saturating_sub(1).max(1);
        }
        if stats.failure_rate() > HIGH_FAILURE_RATE {
            let stretched = config.base_delay.mul_f64(SLOWDOWN_FACTOR);
            config.base_delay = stretched.min(config.max_delay);
        }

        debug!(
            "Adaptive policy for {}: max_attempts={}, base_delay={:?}",
            key, config.max_attempts, config.base_delay
        );
        config
    }

    fn is_cancelled(&self, token: Option<&CancellationToken>) -> bool {
        self.shutdown.is_cancelled() || token.is_some_and(|t| t.is_cancelled())
    }

    /// Sleeps for `delay`; returns false if cancelled first.
    async fn wait(&self, delay: Duration, token: Option<&CancellationToken>) -> bool {
        let call_cancelled = async {
            match token {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.shutdown.cancelled() => false,
            _ = call_cancelled => false,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record_attempt(
        &self,
        operation: &str,
        key: &str,
        attempt: u32,
        delay: Duration,
        success: bool,
        response_time: Duration,
        error_category: Option<ErrorCategory>,
    ) {
        counter!(
            "retry_attempts_total",
            "operation" => operation.to_string(),
            "outcome" => if success { "success" } else { "failure" }
        )
        .increment(1);

        self.stats
            .entry(key.to_string())
            .or_insert_with(|| RetryStats::new(operation, key))
            .record_attempt(RetryAttempt {
                attempt,
                delay,
                success,
                response_time,
                error_category,
                timestamp: chrono::Utc::now(),
            });
    }

    fn record_call(&self, operation: &str, key: &str, success: bool) {
        self.stats
            .entry(key.to_string())
            .or_insert_with(|| RetryStats::new(operation, key))
            .record_call(success);
    }

    /// Stats for every key, or only for keys of `operation`.
    pub fn operation_stats(&self, operation: Option<&str>) -> Vec<RetryStats> {
        let mut stats: Vec<RetryStats> = self
            .stats
            .iter()
            .filter(|entry| operation.map_or(true, |op| entry.value().operation == op))
            .map(|entry| entry.value().clone())
            .collect();
        stats.sort_by(|a, b| a.key.cmp(&b.key));
        stats
    }

    pub fn key_stats(&self, key: &str) -> Option<RetryStats> {
        self.stats.get(key).map(|s| s.clone())
    }

    /// Breaker snapshots keyed by operation key.
    pub async fn circuit_breaker_status(&self) -> HashMap<String, CircuitBreakerSnapshot> {
        self.breakers.snapshots().await
    }

    /// Drops recorded stats for `operation`, or for every key.
    pub fn reset_stats(&self, operation: Option<&str>) {
        match operation {
            Some(op) => self.stats.retain(|_, stats| stats.operation != op),
            None => self.stats.clear(),
        }
    }

    /// Cancels every pending retry wait; later calls return `Cancelled` immediately.
    pub fn shutdown(&self) {
        info!("Shutting down retry manager");
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

async fn report(breaker: &Option<Arc<CircuitBreaker>>, elapsed: Duration, success: bool) {
    if let Some(breaker) = breaker {
        if success {
            breaker.record_success(elapsed).await;
        } else {
            breaker.record_failure(elapsed).await;
        }
    }
}
