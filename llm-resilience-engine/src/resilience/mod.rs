//! Resilience patterns for calls to downstream dependencies.
//!
//! - **Circuit Breaker**: stops traffic to a failing dependency until it recovers
//! - **Registry**: named breakers shared between callers
//! - **Backoff**: delay computation for retries
//! - **Retry**: classified, adaptive retries on top of the breakers
//! - **Timeout**: bounds how long a single operation may run
//!
//! # Example
//!
//! ```no_run
//! use llm_resilience_core::domain::{CircuitBreakerConfig, RetryConfig};
//! use llm_resilience_engine::classifier::ErrorClassifier;
//! use llm_resilience_engine::resilience::{with_timeout, CircuitBreakerRegistry, RetryManager};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = RetryManager::new(
//!     Arc::new(ErrorClassifier::default()),
//!     Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default())),
//!     RetryConfig::default(),
//! );
//!
//! let result = manager
//!     .run("moderation.check", None, || async {
//!         with_timeout(Duration::from_secs(5), async {
//!             // Your operation here
//!             Ok::<_, std::io::Error>(42)
//!         })
//!         .await
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod circuit_breaker;
pub mod registry;
pub mod retry;
pub mod timeout;

pub use backoff::{compute_delay, compute_delay_with};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError};
pub use registry::CircuitBreakerRegistry;
pub use retry::{operation_key, RetryError, RetryManager, RATE_LIMIT_MIN_DELAY};
pub use timeout::{with_timeout, TimeoutError};
