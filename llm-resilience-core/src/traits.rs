use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::HealthStatus;

/// A health probe for one dependency.
///
/// `Ok(true)` means the dependency answered and is usable, `Ok(false)` that it
/// answered negatively. An `Err` counts as a failed check as well.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> anyhow::Result<bool>;
}

/// Raised when a monitored service changes status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthAlert {
    pub service: String,
    pub previous: HealthStatus,
    pub current: HealthStatus,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
}

#[async_trait]
pub trait AlertHandler: Send + Sync {
    async fn handle_alert(&self, alert: HealthAlert);
}
