//! Alert handlers for health status transitions.

use async_trait::async_trait;
use llm_resilience_core::domain::HealthStatus;
use llm_resilience_core::traits::{AlertHandler, HealthAlert};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Logs alerts using the tracing system
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingAlertHandler;

#[async_trait]
impl AlertHandler for LoggingAlertHandler {
    async fn handle_alert(&self, alert: HealthAlert) {
        match alert.current {
            HealthStatus::Healthy => {
                info!(service = %alert.service, previous = %alert.previous, "{}", alert.message);
            }
            HealthStatus::Degraded => {
                warn!(service = %alert.service, previous = %alert.previous, "{}", alert.message);
            }
            HealthStatus::Unhealthy | HealthStatus::Critical => {
                error!(
                    service = %alert.service,
                    previous = %alert.previous,
                    "{} health alert: {}",
                    alert.current.to_string().to_uppercase(),
                    alert.message
                );
            }
        }
    }
}

/// Forwards alerts into an unbounded channel.
///
/// Alerts are dropped once the receiving side is closed.
#[derive(Debug, Clone)]
pub struct ChannelAlertHandler {
    sender: mpsc::UnboundedSender<HealthAlert>,
}

impl ChannelAlertHandler {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<HealthAlert>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl AlertHandler for ChannelAlertHandler {
    async fn handle_alert(&self, alert: HealthAlert) {
        let _ = self.sender.send(alert);
    }
}
