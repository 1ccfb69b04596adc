//! The composed resilience layer.
//!
//! Built once per process and shared by `Arc`; there are no global
//! registries.

use llm_resilience_core::domain::{
    CircuitBreakerConfig, ClassifierConfig, HealthMonitorConfig, OverallHealth, RetryConfig,
};
use llm_resilience_core::CoreError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use validator::Validate;

use crate::classifier::ErrorClassifier;
use crate::observability::HealthMonitor;
use crate::resilience::{CircuitBreakerRegistry, RetryManager};

/// Settings for every component of the layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Validate)]
#[serde(default)]
pub struct ResilienceSettings {
    #[validate(nested)]
    pub classifier: ClassifierConfig,
    /// Default config for breakers created by name
    #[validate(nested)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[validate(nested)]
    pub retry: RetryConfig,
    #[validate(nested)]
    pub health: HealthMonitorConfig,
}

/// Classifier, breakers, retry manager and health monitor wired together.
#[derive(Clone)]
pub struct ResilienceLayer {
    pub classifier: Arc<ErrorClassifier>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub retry: Arc<RetryManager>,
    pub health: Arc<HealthMonitor>,
}

impl ResilienceLayer {
    /// Validates `settings` and builds every component from them.
    pub fn from_settings(settings: &ResilienceSettings) -> Result<Self, CoreError> {
        settings.validate()?;

        let classifier = Arc::new(ErrorClassifier::new(settings.classifier.clone()));
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            settings.circuit_breaker.clone(),
        ));
        let retry = Arc::new(RetryManager::new(
            Arc::clone(&classifier),
            Arc::clone(&breakers),
            settings.retry.clone(),
        ));
        let health = Arc::new(HealthMonitor::new(settings.health.clone()));

        info!("Resilience layer initialized");
        Ok(Self {
            classifier,
            breakers,
            retry,
            health,
        })
    }

    /// Snapshot of every monitored service.
    pub async fn overall_health(&self) -> OverallHealth {
        self.health.overall_health().await
    }

    /// Stops the health monitor and cancels pending retry waits.
    pub async fn shutdown(&self) {
        self.retry.shutdown();
        self.health.stop().await;
        info!("Resilience layer shut down");
    }
}
