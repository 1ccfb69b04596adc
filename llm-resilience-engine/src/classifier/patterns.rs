//! Built-in classification table.
//!
//! Order matters: when two patterns score the same, the one registered first
//! wins, so narrower patterns (rate limits, timeouts) come before the broad
//! network and upstream-service rows.

use llm_resilience_core::domain::{
    ErrorCategory, ErrorPattern, ErrorSeverity, ErrorSource, RecoveryStrategy,
};
use std::time::Duration;

pub fn default_patterns() -> Vec<ErrorPattern> {
    vec![
        ErrorPattern::new("rate_limit", ErrorCategory::RateLimit, ErrorSeverity::Medium)
            .with_types(&["RateLimit", "TooManyRequests", "Throttl"])
            .with_messages(&["rate limit", "too many requests", "quota exceeded", "throttl"])
            .with_status_codes(&[429])
            .with_source(ErrorSource::External)
            .with_recovery(RecoveryStrategy::Retry, 5, Duration::from_secs(5)),
        ErrorPattern::new("timeout", ErrorCategory::Timeout, ErrorSeverity::Medium)
            .with_types(&["Timeout", "Elapsed", "TimedOut"])
            .with_messages(&["timed out", "timeout", "deadline exceeded", "deadline has elapsed"])
            .with_status_codes(&[408, 504])
            .with_source(ErrorSource::Network)
            .with_recovery(RecoveryStrategy::Retry, 3, Duration::from_secs(2)),
        ErrorPattern::new("authentication", ErrorCategory::Authentication, ErrorSeverity::High)
            .with_types(&["Auth", "Unauthenticated", "Credential", "Jwt"])
            .with_messages(&[
                "unauthorized",
                "authentication",
                "invalid api key",
                "invalid token",
                "token expired",
            ])
            .with_status_codes(&[401])
            .with_source(ErrorSource::External)
            .with_recovery(RecoveryStrategy::FailFast, 0, Duration::ZERO),
        ErrorPattern::new("authorization", ErrorCategory::Authorization, ErrorSeverity::High)
            .with_types(&["Forbidden", "PermissionDenied", "AccessDenied"])
            .with_messages(&["forbidden", "permission denied", "access denied", "not allowed"])
            .with_status_codes(&[403])
            .with_source(ErrorSource::External)
            .with_recovery(RecoveryStrategy::FailFast, 0, Duration::ZERO),
        ErrorPattern::new("validation", ErrorCategory::Validation, ErrorSeverity::Low)
            .with_types(&["Validation", "Parse", "Invalid", "serde_json"])
            .with_messages(&["invalid", "validation", "malformed", "parse error", "missing field"])
            .with_status_codes(&[400, 422])
            .with_source(ErrorSource::Internal)
            .with_recovery(RecoveryStrategy::FailFast, 0, Duration::ZERO),
        ErrorPattern::new("database", ErrorCategory::Database, ErrorSeverity::High)
            .with_types(&["sqlx", "Database", "Postgres", "Sql", "clickhouse"])
            .with_messages(&["database", "deadlock", "connection pool", "sql", "relation does not exist"])
            .with_source(ErrorSource::Database)
            .with_recovery(RecoveryStrategy::Retry, 2, Duration::from_millis(500)),
        ErrorPattern::new(
            "resource_exhaustion",
            ErrorCategory::ResourceExhaustion,
            ErrorSeverity::Critical,
        )
        .with_types(&["OutOfMemory", "Exhausted", "Capacity"])
        .with_messages(&[
            "out of memory",
            "resource exhausted",
            "too many open files",
            "no space left",
            "context length exceeded",
        ])
        .with_status_codes(&[507])
        .with_source(ErrorSource::Internal)
        .with_recovery(RecoveryStrategy::Degrade, 1, Duration::from_secs(10)),
        ErrorPattern::new("configuration", ErrorCategory::Configuration, ErrorSeverity::Critical)
            .with_types(&["Config", "EnvVar"])
            .with_messages(&["configuration", "not configured", "missing environment", "environment variable"])
            .with_source(ErrorSource::Internal)
            .with_recovery(RecoveryStrategy::Escalate, 0, Duration::ZERO),
        ErrorPattern::new("network", ErrorCategory::Network, ErrorSeverity::High)
            .with_types(&["io::error", "Connect", "Network", "hyper", "reqwest", "Dns"])
            .with_messages(&[
                "connection refused",
                "connection reset",
                "connection closed",
                "broken pipe",
                "network",
                "dns",
                "unreachable",
            ])
            .with_status_codes(&[502])
            .with_source(ErrorSource::Network)
            .with_recovery(RecoveryStrategy::Retry, 3, Duration::from_secs(1)),
        ErrorPattern::new("external_service", ErrorCategory::ExternalService, ErrorSeverity::High)
            .with_types(&["Upstream", "Service", "Api"])
            .with_messages(&[
                "service unavailable",
                "bad gateway",
                "internal server error",
                "upstream",
                "overloaded",
            ])
            .with_status_codes(&[500, 502, 503])
            .with_source(ErrorSource::External)
            .with_recovery(RecoveryStrategy::CircuitBreak, 3, Duration::from_secs(2)),
    ]
}
