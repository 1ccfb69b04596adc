//! Delay computation for retries.
//!
//! `attempt` is the 1-based number of the attempt that just failed; the
//! returned delay is slept before the next one. Every strategy is clamped to
//! `max_delay`.
//!
//! | Strategy              | Delay after attempt `n`                          |
//! |-----------------------|--------------------------------------------------|
//! | `Fixed`               | `base`                                           |
//! | `Linear`              | `base * n`                                       |
//! | `Exponential`         | `base * multiplier^(n - 1)`                      |
//! | `Fibonacci`           | `base * fib(n)` with `fib(1) = fib(2) = 1`       |
//! | `JitteredExponential` | exponential plus `U(0, exponential * jitter)`    |

use llm_resilience_core::domain::{BackoffStrategy, RetryConfig};
use rand::Rng;
use std::time::Duration;

/// Computes the delay after `attempt` using the thread-local RNG for jitter.
pub fn compute_delay(config: &RetryConfig, attempt: u32) -> Duration {
    compute_delay_with(config, attempt, &mut rand::thread_rng())
}

/// Computes the delay after `attempt` with a caller-supplied RNG.
pub fn compute_delay_with<R: Rng + ?Sized>(
    config: &RetryConfig,
    attempt: u32,
    rng: &mut R,
) -> Duration {
    let n = attempt.max(1);
    let base = config.base_delay.as_secs_f64();

    let secs = match config.backoff {
        BackoffStrategy::Fixed => base,
        BackoffStrategy::Linear => base * n as f64,
        BackoffStrategy::Exponential => exponential(base, config.multiplier, n),
        BackoffStrategy::Fibonacci => base * fibonacci(n),
        BackoffStrategy::JitteredExponential => {
            let delay = exponential(base, config.multiplier, n);
            delay + rng.gen::<f64>() * delay * config.jitter_factor
        }
    };

    clamp(secs, config.max_delay)
}

fn exponential(base: f64, multiplier: f64, n: u32) -> f64 {
    let exponent = i32::try_from(n - 1).unwrap_or(i32::MAX);
    base * multiplier.powi(exponent)
}

fn fibonacci(n: u32) -> f64 {
    let (mut prev, mut current) = (0.0_f64, 1.0_f64);
    for _ in 1..n {
        let next = prev + current;
        prev = current;
        current = next;
        if current.is_infinite() {
            break;
        }
    }
    current
}

fn clamp(secs: f64, max: Duration) -> Duration {
    let max_secs = max.as_secs_f64();
    if !secs.is_finite() || secs >= max_secs {
        max
    } else if secs <= 0.0 {
        Duration::ZERO
    } else {
        Duration::from_secs_f64(secs)
    }
}
