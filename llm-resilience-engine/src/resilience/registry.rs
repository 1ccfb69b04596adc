//! Named circuit breakers shared across callers.

use dashmap::DashMap;
use llm_resilience_core::domain::{CircuitBreakerConfig, CircuitBreakerSnapshot};
use std::collections::HashMap;
use std::sync::Arc;

use super::circuit_breaker::CircuitBreaker;

/// Registry of circuit breakers keyed by name.
///
/// A breaker is created on first use with the config supplied at that time;
/// later lookups with a different config get the existing breaker.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    default_config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            default_config,
        }
    }

    /// Returns the named breaker, creating it with the registry default.
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_or_create(name, &self.default_config)
    }

    /// Returns the named breaker, creating it with `config` if absent.
    pub fn get_or_create(&self, name: &str, config: &CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return existing.clone();
        }
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config.clone())))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| b.clone())
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Snapshots of every registered breaker, keyed by name.
    pub async fn snapshots(&self) -> HashMap<String, CircuitBreakerSnapshot> {
        // Collect first so no map guard is held across an await
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|e| e.value().clone()).collect();

        let mut snapshots = HashMap::with_capacity(breakers.len());
        for breaker in breakers {
            snapshots.insert(breaker.name().to_string(), breaker.snapshot().await);
        }
        snapshots
    }

    pub async fn reset_all(&self) {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|e| e.value().clone()).collect();
        for breaker in breakers {
            breaker.reset().await;
        }
    }
}
