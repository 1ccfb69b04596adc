//! Health monitoring, alerting and logging.

pub mod alerting;
pub mod health;
pub mod logging;

pub use alerting::{ChannelAlertHandler, LoggingAlertHandler};

pub use health::{evaluate_status, FnProbe, HealthMonitor, HealthMonitorError};

pub use logging::{
    // Configuration
    LogConfig, LogFormat, LoggingError,
    // Initialization
    init_logging, init_default_logging,
};
