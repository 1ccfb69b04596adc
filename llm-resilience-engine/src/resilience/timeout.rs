//! Timeout wrapper for fallible async operations.
//!
//! # Example
//!
//! ```no_run
//! use llm_resilience_engine::resilience::timeout::with_timeout;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let result = with_timeout(
//!     Duration::from_secs(5),
//!     async { Ok::<_, std::io::Error>(42) }
//! ).await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

/// Timeout errors
#[derive(Debug, Clone, Error)]
pub enum TimeoutError<E> {
    /// Operation timed out
    #[error("Operation timed out after {elapsed:?}")]
    Elapsed { elapsed: Duration },

    /// Inner operation failed
    #[error("Operation failed: {0}")]
    Inner(E),
}

impl<E> TimeoutError<E> {
    pub fn is_elapsed(&self) -> bool {
        matches!(self, TimeoutError::Elapsed { .. })
    }
}

/// Apply a timeout to an async operation, keeping the operation's own error.
pub async fn with_timeout<F, T, E>(duration: Duration, future: F) -> Result<T, TimeoutError<E>>
where
    F: Future<Output = Result<T, E>>,
{
    match timeout(duration, future).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(TimeoutError::Inner(e)),
        Err(_) => Err(TimeoutError::Elapsed { elapsed: duration }),
    }
}
