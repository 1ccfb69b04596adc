use llm_resilience_core::domain::{
    BackoffStrategy, CircuitBreakerConfig, CircuitState, ErrorCategory, RetryConfig,
};
use llm_resilience_engine::resilience::{compute_delay, operation_key};
use llm_resilience_engine::{CircuitBreakerRegistry, ErrorClassifier, RetryError, RetryManager};
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{0}")]
struct CallError(String);

impl CallError {
    fn new(message: &str) -> Self {
        Self(message.to_string())
    }
}

fn manager() -> RetryManager {
    RetryManager::new(
        Arc::new(ErrorClassifier::default()),
        Arc::new(CircuitBreakerRegistry::default()),
        RetryConfig::default(),
    )
}

fn policy(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(60),
        multiplier: 2.0,
        backoff: BackoffStrategy::Exponential,
        adaptive: false,
        ..Default::default()
    }
}

// ===== Backoff =====

#[rstest]
#[case(1, 1)]
#[case(2, 2)]
#[case(3, 4)]
#[case(4, 8)]
fn test_exponential_backoff_doubles(#[case] attempt: u32, #[case] expected_secs: u64) {
    assert_eq!(
        compute_delay(&policy(5), attempt),
        Duration::from_secs(expected_secs)
    );
}

#[test]
fn test_backoff_never_exceeds_max_delay() {
    let config = RetryConfig {
        max_delay: Duration::from_secs(10),
        ..policy(20)
    };
    for attempt in 1..=20 {
        assert!(compute_delay(&config, attempt) <= Duration::from_secs(10));
    }
}

// ===== Attempts =====

#[tokio::test(start_paused = true)]
async fn test_always_failing_operation_runs_max_attempts() {
    let manager = manager();
    let calls = AtomicU32::new(0);
    let started = Instant::now();

    let result: Result<(), _> = manager
        .run("fetch_documents", Some(&policy(3)), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CallError::new("connection refused"))
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let err = result.unwrap_err();
    assert_eq!(err.attempts(), 3);
    assert_eq!(
        err.classification().map(|c| c.category),
        Some(ErrorCategory::Network)
    );
    assert_eq!(err.into_inner(), Some(CallError::new("connection refused")));

    // Waits of 1s and 2s between the three attempts
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(3));
    assert!(waited < Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_succeeds_after_transient_failures() {
    let manager = manager();
    let calls = AtomicU32::new(0);

    let result = manager
        .run("generate", Some(&policy(5)), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(CallError::new("service unavailable"))
            } else {
                Ok(n)
            }
        })
        .await;

    assert_eq!(result.unwrap(), 3);

    let stats = manager.key_stats("generate").unwrap();
    assert_eq!(stats.total_calls, 1);
    assert_eq!(stats.successful_calls, 1);
    assert_eq!(stats.total_attempts, 3);
    assert_eq!(stats.failed_attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_fail_fast_errors_are_not_retried() {
    let manager = manager();
    let calls = AtomicU32::new(0);

    let result: Result<(), _> = manager
        .run("generate", Some(&policy(5)), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CallError::new("401 unauthorized: invalid api key"))
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let err = result.unwrap_err();
    assert_eq!(
        err.classification().map(|c| c.category),
        Some(ErrorCategory::Authentication)
    );
}

#[tokio::test(start_paused = true)]
async fn test_unclassified_errors_are_retried() {
    let manager = manager();
    let calls = AtomicU32::new(0);

    let result: Result<(), _> = manager
        .run("rerank", Some(&policy(3)), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CallError::new("something odd happened"))
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        result.unwrap_err().classification().map(|c| c.category),
        Some(ErrorCategory::Unknown)
    );
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_waits_at_least_five_seconds() {
    let manager = manager();
    let started = Instant::now();

    let result: Result<(), _> = manager
        .run("generate", Some(&policy(2)), || async {
            Err(CallError::new("429 too many requests"))
        })
        .await;

    assert!(result.is_err());
    assert!(started.elapsed() >= Duration::from_secs(5));
}

// ===== Circuit breaking =====

#[tokio::test(start_paused = true)]
async fn test_open_breaker_stops_further_calls() {
    let manager = manager();
    let config = RetryConfig {
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 1,
            minimum_throughput: 1,
            sliding_window_size: 5,
            timeout: Duration::from_secs(60),
            ..Default::default()
        },
        ..policy(2)
    };
    let calls = AtomicU32::new(0);

    let first: Result<(), _> = manager
        .run("search", Some(&config), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CallError::new("connection reset by peer"))
        })
        .await;
    assert!(matches!(first, Err(RetryError::Failed { attempts: 2, .. })));

    let second: Result<(), _> = manager
        .run("search", Some(&config), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<(), CallError>(())
        })
        .await;
    assert!(matches!(second, Err(RetryError::CircuitOpen { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let status = manager.circuit_breaker_status().await;
    assert_eq!(status["search"].state, CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_opened_between_attempts_keeps_last_error() {
    let registry = Arc::new(CircuitBreakerRegistry::default());
    let manager = RetryManager::new(
        Arc::new(ErrorClassifier::default()),
        Arc::clone(&registry),
        RetryConfig::default(),
    );
    let config = RetryConfig {
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 1,
            minimum_throughput: 1,
            timeout: Duration::from_secs(60),
            ..Default::default()
        },
        ..policy(3)
    };
    let breaker = registry.get_or_create("search", &config.circuit_breaker);
    let calls = AtomicU32::new(0);

    let result: Result<(), _> = manager
        .run("search", Some(&config), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            // A concurrent caller trips the shared breaker
            breaker.record_failure(Duration::from_millis(5)).await;
            Err(CallError::new("connection reset by peer"))
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let err = result.unwrap_err();
    assert!(matches!(err, RetryError::CircuitOpen { attempts: 1, .. }));
    assert_eq!(err.attempts(), 1);
    assert_eq!(err.into_inner(), Some(CallError::new("connection reset by peer")));
}

#[tokio::test(start_paused = true)]
async fn test_anyhow_errors_are_classified_and_retried() {
    let manager = manager();
    let calls = AtomicU32::new(0);

    let result: Result<(), RetryError<anyhow::Error>> = manager
        .run("fetch_documents", Some(&policy(3)), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("connection refused"))
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let err = result.unwrap_err();
    assert_eq!(
        err.classification().map(|c| c.category),
        Some(ErrorCategory::Network)
    );
    assert_eq!(
        err.into_inner().map(|e| e.to_string()),
        Some("connection refused".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn test_arguments_select_separate_keys() {
    let manager = manager();

    let ok: Result<u32, RetryError<CallError>> = manager
        .run_with_args("lookup", &("user", 1), Some(&policy(1)), || async { Ok(1) })
        .await;
    assert!(ok.is_ok());
    let _: Result<u32, RetryError<CallError>> = manager
        .run_with_args("lookup", &("user", 2), Some(&policy(1)), || async { Ok(2) })
        .await;

    let stats = manager.operation_stats(Some("lookup"));
    assert_eq!(stats.len(), 2);
    assert!(manager
        .key_stats(&operation_key("lookup", &("user", 1)))
        .is_some());
}

// ===== Cancellation =====

#[tokio::test(start_paused = true)]
async fn test_token_cancels_pending_wait() {
    let manager = manager();
    let token = CancellationToken::new();
    let calls = AtomicU32::new(0);
    let config = RetryConfig {
        base_delay: Duration::from_secs(10),
        ..policy(5)
    };

    let canceller = {
        let token = token.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        }
    };
    let run = manager.run_with_token("generate", Some(&config), &token, || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Err::<(), _>(CallError::new("upstream overloaded"))
    });

    let (result, ()) = tokio::join!(run, canceller);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let err = result.unwrap_err();
    assert!(matches!(err, RetryError::Cancelled { attempts: 1, .. }));
    assert_eq!(err.into_inner(), Some(CallError::new("upstream overloaded")));
}

#[tokio::test]
async fn test_shutdown_rejects_new_runs() {
    let manager = manager();
    manager.shutdown();
    assert!(manager.is_shut_down());

    let calls = AtomicU32::new(0);
    let result: Result<(), RetryError<CallError>> = manager
        .run("generate", None, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;

    assert!(matches!(result, Err(RetryError::Cancelled { attempts: 0, .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

// ===== Adaptive policy =====

#[tokio::test(start_paused = true)]
async fn test_history_of_failures_tightens_policy() {
    let manager = manager();
    let config = RetryConfig {
        adaptive: true,
        adaptive_min_samples: 4,
        circuit_breaker_enabled: false,
        ..policy(2)
    };

    for _ in 0..2 {
        let _: Result<(), _> = manager
            .run("embed", Some(&config), || async {
                Err(CallError::new("connection refused"))
            })
            .await;
    }

    let effective = manager.effective_config("embed", &config);
    assert_eq!(effective.max_attempts, 1);
    assert_eq!(effective.base_delay, Duration::from_millis(1500));

    manager.reset_stats(Some("embed"));
    assert_eq!(manager.effective_config("embed", &config), config);
}
