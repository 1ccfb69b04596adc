use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use validator::Validate;

use super::duration::secs;

/// Metadata key holding the last probe error string.
pub const META_LAST_ERROR: &str = "last_error";
/// Metadata key distinguishing how the last check failed.
pub const META_FAILURE_KIND: &str = "failure_kind";

/// Health status of a service, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Service is fully operational
    Healthy,
    /// Service is operational but slow or intermittently failing
    Degraded,
    /// Service is mostly failing
    Unhealthy,
    /// Service is effectively down
    Critical,
}

impl HealthStatus {
    /// Returns true if the status is healthy or degraded
    pub fn is_available(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }

    /// Combines two health statuses, returning the worst status
    pub fn combine(&self, other: &HealthStatus) -> HealthStatus {
        (*self).max(*other)
    }

    /// Numeric encoding used for gauges.
    pub fn as_gauge(&self) -> f64 {
        match self {
            HealthStatus::Healthy => 0.0,
            HealthStatus::Degraded => 1.0,
            HealthStatus::Unhealthy => 2.0,
            HealthStatus::Critical => 3.0,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Critical => write!(f, "critical"),
        }
    }
}

/// How a failed check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeFailureKind {
    /// Probe completed and reported the service as down
    Negative,
    /// Probe returned an error
    Exception,
    /// Probe did not finish within the probe timeout
    Timeout,
    /// Probe task panicked
    Panic,
}

impl fmt::Display for ProbeFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeFailureKind::Negative => write!(f, "negative"),
            ProbeFailureKind::Exception => write!(f, "exception"),
            ProbeFailureKind::Timeout => write!(f, "timeout"),
            ProbeFailureKind::Panic => write!(f, "panic"),
        }
    }
}

/// Health state of one registered service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthRecord {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_response_time_ms: Option<f64>,
    /// Success rate over the recent check window
    pub success_rate: f64,
    pub check_count: u64,
    pub error_count: u64,
    pub consecutive_failures: u64,
    /// Lifetime percentage of successful checks
    pub uptime_percentage: f64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl HealthRecord {
    pub fn new(name: impl Into<String>, metadata: HashMap<String, String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            last_check: None,
            last_response_time_ms: None,
            success_rate: 1.0,
            check_count: 0,
            error_count: 0,
            consecutive_failures: 0,
            uptime_percentage: 100.0,
            metadata,
        }
    }
}

/// Count of services per status.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthSummary {
    pub total: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    pub critical: usize,
}

impl HealthSummary {
    pub fn add(&mut self, status: HealthStatus) {
        self.total += 1;
        match status {
            HealthStatus::Healthy => self.healthy += 1,
            HealthStatus::Degraded => self.degraded += 1,
            HealthStatus::Unhealthy => self.unhealthy += 1,
            HealthStatus::Critical => self.critical += 1,
        }
    }
}

/// Aggregate health across every registered service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OverallHealth {
    pub status: HealthStatus,
    pub services: HashMap<String, HealthRecord>,
    pub summary: HealthSummary,
    pub timestamp: DateTime<Utc>,
}

impl OverallHealth {
    /// Builds the aggregate; the overall status is the worst service status.
    pub fn new(services: HashMap<String, HealthRecord>) -> Self {
        let mut summary = HealthSummary::default();
        let status = services.values().fold(HealthStatus::Healthy, |acc, record| {
            summary.add(record.status);
            acc.combine(&record.status)
        });

        Self {
            status,
            services,
            summary,
            timestamp: Utc::now(),
        }
    }
}

/// Health monitor tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
#[serde(default)]
pub struct HealthMonitorConfig {
    /// Time between polling ticks
    #[serde(with = "secs")]
    pub check_interval: Duration,
    /// Per-probe timeout
    #[serde(with = "secs")]
    pub probe_timeout: Duration,
    /// Response time above which a service is degraded
    #[serde(with = "secs")]
    pub degraded_response_time: Duration,
    /// Success rate below which a service is unhealthy
    #[validate(range(min = 0.1, max = 0.9))]
    pub unhealthy_threshold: f64,
    /// Number of recent checks the success rate is computed over
    #[validate(range(min = 1))]
    pub success_window: usize,
    /// Entries kept in each service's check history
    #[validate(range(min = 1))]
    pub history_size: usize,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(10),
            degraded_response_time: Duration::from_secs(5),
            unhealthy_threshold: 0.5,
            success_window: 10,
            history_size: 100,
        }
    }
}

/// One entry of a service's check history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthCheckEntry {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub response_time_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<ProbeFailureKind>,
    pub status: HealthStatus,
}
