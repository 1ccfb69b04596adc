use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;
use validator::Validate;

use super::context::ErrorContext;
use super::duration::secs;

/// Number of message characters that participate in a signature.
pub const DEFAULT_MESSAGE_TRUNCATION: usize = 100;

// ===== Taxonomy =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Authentication,
    Authorization,
    Network,
    Database,
    ExternalService,
    RateLimit,
    Timeout,
    ResourceExhaustion,
    Validation,
    Configuration,
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Authorization => "authorization",
            ErrorCategory::Network => "network",
            ErrorCategory::Database => "database",
            ErrorCategory::ExternalService => "external_service",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::ResourceExhaustion => "resource_exhaustion",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Severity levels, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorSeverity::Info => "info",
            ErrorSeverity::Low => "low",
            ErrorSeverity::Medium => "medium",
            ErrorSeverity::High => "high",
            ErrorSeverity::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// Which part of the backend an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSource {
    Llm,
    Search,
    Moderation,
    Review,
    Database,
    Network,
    Internal,
    External,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    Retry,
    Fallback,
    Degrade,
    Escalate,
    FailFast,
    CircuitBreak,
    Ignore,
}

impl RecoveryStrategy {
    /// Whether a retry loop may attempt the operation again.
    pub fn allows_retry(&self) -> bool {
        !matches!(self, RecoveryStrategy::FailFast)
    }
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecoveryStrategy::Retry => "retry",
            RecoveryStrategy::Fallback => "fallback",
            RecoveryStrategy::Degrade => "degrade",
            RecoveryStrategy::Escalate => "escalate",
            RecoveryStrategy::FailFast => "fail_fast",
            RecoveryStrategy::CircuitBreak => "circuit_break",
            RecoveryStrategy::Ignore => "ignore",
        };
        f.write_str(name)
    }
}

// ===== Patterns =====

/// A row of the classification table.
///
/// Type patterns are matched as substrings of the error's type name, message
/// patterns case-insensitively against its message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorPattern {
    pub name: String,
    #[serde(default)]
    pub type_patterns: Vec<String>,
    #[serde(default)]
    pub message_patterns: Vec<String>,
    #[serde(default)]
    pub status_codes: Vec<u16>,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub source: ErrorSource,
    pub recovery_strategy: RecoveryStrategy,
    pub max_retries: u32,
    #[serde(with = "secs")]
    pub retry_delay: Duration,
}

impl ErrorPattern {
    pub fn new(name: impl Into<String>, category: ErrorCategory, severity: ErrorSeverity) -> Self {
        Self {
            name: name.into(),
            type_patterns: Vec::new(),
            message_patterns: Vec::new(),
            status_codes: Vec::new(),
            category,
            severity,
            source: ErrorSource::Unknown,
            recovery_strategy: RecoveryStrategy::FailFast,
            max_retries: 0,
            retry_delay: Duration::ZERO,
        }
    }

    pub fn with_types(mut self, patterns: &[&str]) -> Self {
        self.type_patterns = patterns.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_messages(mut self, patterns: &[&str]) -> Self {
        self.message_patterns = patterns.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_status_codes(mut self, codes: &[u16]) -> Self {
        self.status_codes = codes.to_vec();
        self
    }

    pub fn with_source(mut self, source: ErrorSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_recovery(
        mut self,
        strategy: RecoveryStrategy,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Self {
        self.recovery_strategy = strategy;
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }
}

// ===== Classified errors =====

/// Classification result for one distinct failure mode.
///
/// Records are keyed by [`ClassifiedError::signature`] and updated in place
/// on repeat occurrences; values handed to callers are snapshots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassifiedError {
    pub signature: String,
    pub error_type: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub source: ErrorSource,
    pub recovery_strategy: RecoveryStrategy,
    pub max_retries: u32,
    #[serde(with = "secs")]
    pub retry_delay: Duration,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_pattern: Option<String>,
    pub frequency: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub context: ErrorContext,
}

impl ClassifiedError {
    /// Whether the retry loop should give up immediately on this error.
    pub fn is_fail_fast(&self) -> bool {
        self.recovery_strategy == RecoveryStrategy::FailFast
            && self.category != ErrorCategory::Unknown
    }
}

/// Truncates a message to `max_chars` characters on a char boundary.
pub fn truncate_message(message: &str, max_chars: usize) -> &str {
    match message.char_indices().nth(max_chars) {
        Some((idx, _)) => &message[..idx],
        None => message,
    }
}

/// Deterministic deduplication key for an (error type, message, operation) triple.
///
/// Only the first `max_chars` characters of the message participate, so
/// messages that differ in a trailing request id still collapse together.
pub fn compute_signature(error_type: &str, message: &str, operation: &str, max_chars: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(error_type.as_bytes());
    hasher.update(b"|");
    hasher.update(truncate_message(message, max_chars).as_bytes());
    hasher.update(b"|");
    hasher.update(operation.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

// ===== Classifier configuration =====

/// Minimum occurrences inside the alert window before `should_alert` fires.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AlertThresholds {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            critical: 1,
            high: 3,
            medium: 10,
            low: 25,
        }
    }
}

impl AlertThresholds {
    /// Threshold for a severity; `None` means the severity never alerts.
    pub fn for_severity(&self, severity: ErrorSeverity) -> Option<u32> {
        match severity {
            ErrorSeverity::Critical => Some(self.critical),
            ErrorSeverity::High => Some(self.high),
            ErrorSeverity::Medium => Some(self.medium),
            ErrorSeverity::Low => Some(self.low),
            ErrorSeverity::Info => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
#[serde(default)]
pub struct ClassifierConfig {
    #[validate(range(min = 1))]
    pub message_truncation: usize,
    /// How long occurrence timestamps are kept per signature.
    #[serde(with = "secs")]
    pub retention: Duration,
    #[serde(with = "secs")]
    pub alert_window: Duration,
    #[serde(with = "secs")]
    pub escalation_window: Duration,
    pub alert_thresholds: AlertThresholds,
    #[validate(range(min = 1))]
    pub escalation_threshold: u32,
    /// Register the built-in pattern table on construction.
    pub default_patterns: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            message_truncation: DEFAULT_MESSAGE_TRUNCATION,
            retention: Duration::from_secs(24 * 60 * 60),
            alert_window: Duration::from_secs(5 * 60),
            escalation_window: Duration::from_secs(60 * 60),
            alert_thresholds: AlertThresholds::default(),
            escalation_threshold: 20,
            default_patterns: true,
        }
    }
}
