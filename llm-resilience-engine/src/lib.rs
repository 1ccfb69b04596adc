pub mod classifier;
pub mod layer;
pub mod observability;
pub mod resilience;

pub use classifier::{ClassifierStatistics, ErrorClassifier};
pub use layer::{ResilienceLayer, ResilienceSettings};
pub use observability::{HealthMonitor, HealthMonitorError};
pub use resilience::{
    CircuitBreaker, CircuitBreakerError, CircuitBreakerRegistry, RetryError, RetryManager,
};
