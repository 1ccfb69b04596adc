//! Error classification and deduplication.
//!
//! The classifier scores a raised error against an ordered table of
//! [`ErrorPattern`]s and returns a [`ClassifiedError`] carrying a category,
//! severity and recovery strategy. Every distinct failure mode is keyed by a
//! signature; repeat occurrences bump the stored record instead of being
//! classified again.
//!
//! # Scoring
//!
//! | Match                                   | Score |
//! |-----------------------------------------|-------|
//! | type name contains a type pattern       | +0.4  |
//! | message contains a message pattern      | +0.4  |
//! | status code listed by the pattern       | +0.2  |
//!
//! The highest score of at least [`MIN_MATCH_SCORE`] wins; ties go to the
//! pattern registered first. Without a match the error is `unknown` with a
//! confidence of [`UNKNOWN_CONFIDENCE`].
//!
//! # Example
//!
//! ```no_run
//! use llm_resilience_core::domain::{ClassifierConfig, ErrorContext};
//! use llm_resilience_engine::classifier::ErrorClassifier;
//!
//! let classifier = ErrorClassifier::new(ClassifierConfig::default());
//! let error = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused");
//! let classified = classifier.classify(&error, &ErrorContext::new("llm.generate"));
//!
//! if classifier.should_alert(&classified) {
//!     // page someone
//! }
//! ```

pub mod patterns;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use llm_resilience_core::domain::{
    compute_signature, truncate_message, ClassifiedError, ClassifierConfig, ErrorCategory,
    ErrorContext, ErrorPattern, ErrorSeverity, ErrorSource, RecoveryStrategy,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, info};

pub use patterns::default_patterns;

/// Minimum score a pattern needs to be selected.
pub const MIN_MATCH_SCORE: f64 = 0.3;
/// Confidence reported for errors no pattern matched.
pub const UNKNOWN_CONFIDENCE: f64 = 0.5;

const TYPE_MATCH_SCORE: f64 = 0.4;
const MESSAGE_MATCH_SCORE: f64 = 0.4;
const STATUS_MATCH_SCORE: f64 = 0.2;

/// Stored state for one signature.
#[derive(Debug, Clone)]
struct SignatureRecord {
    classified: ClassifiedError,
    occurrences: VecDeque<DateTime<Utc>>,
}

impl SignatureRecord {
    fn record_occurrence(&mut self, at: DateTime<Utc>, retention: Duration) {
        self.occurrences.push_back(at);
        let cutoff = cutoff(at, retention);
        while matches!(self.occurrences.front(), Some(ts) if *ts < cutoff) {
            self.occurrences.pop_front();
        }
    }

    fn count_since(&self, cutoff: DateTime<Utc>) -> usize {
        self.occurrences.iter().rev().take_while(|ts| **ts >= cutoff).count()
    }
}

/// Aggregate view over every stored signature.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClassifierStatistics {
    pub distinct_signatures: usize,
    pub total_occurrences: u64,
    pub by_category: HashMap<ErrorCategory, u64>,
    pub by_severity: HashMap<ErrorSeverity, u64>,
}

/// Pattern-table error classifier.
pub struct ErrorClassifier {
    config: ClassifierConfig,
    patterns: RwLock<Vec<ErrorPattern>>,
    records: DashMap<String, SignatureRecord>,
}

impl ErrorClassifier {
    /// Creates a classifier, seeded with the built-in table when
    /// `config.default_patterns` is set.
    pub fn new(config: ClassifierConfig) -> Self {
        let patterns = if config.default_patterns {
            default_patterns()
        } else {
            Vec::new()
        };

        Self {
            config,
            patterns: RwLock::new(patterns),
            records: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Appends a pattern. Later patterns lose ties against earlier ones.
    pub fn register_pattern(&self, pattern: ErrorPattern) {
        info!("Registering error pattern: {}", pattern.name);
        self.patterns
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(pattern);
    }

    /// Returns the registered patterns in match order.
    pub fn patterns(&self) -> Vec<ErrorPattern> {
        self.patterns
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Classifies an error value raised by `context.operation`.
    pub fn classify<E>(&self, error: &E, context: &ErrorContext) -> ClassifiedError
    where
        E: std::fmt::Display + ?Sized,
    {
        self.classify_with_status(error, context, None)
    }

    /// Classifies an error value, taking a transport status code into account.
    pub fn classify_with_status<E>(
        &self,
        error: &E,
        context: &ErrorContext,
        status_code: Option<u16>,
    ) -> ClassifiedError
    where
        E: std::fmt::Display + ?Sized,
    {
        self.classify_parts(
            std::any::type_name::<E>(),
            &error.to_string(),
            context,
            status_code,
        )
    }

    /// Classifies an error described by its type name and message.
    pub fn classify_parts(
        &self,
        error_type: &str,
        message: &str,
        context: &ErrorContext,
        status_code: Option<u16>,
    ) -> ClassifiedError {
        let signature = compute_signature(
            error_type,
            message,
            &context.operation,
            self.config.message_truncation,
        );
        let now = Utc::now();

        let classified = match self.records.entry(signature.clone()) {
            Entry::Occupied(mut occupied) => {
                let record = occupied.get_mut();
                record.classified.frequency += 1;
                record.classified.last_seen = now;
                record.record_occurrence(now, self.config.retention);
                record.classified.clone()
            }
            Entry::Vacant(vacant) => {
                let classified =
                    self.match_patterns(signature, error_type, message, context, status_code, now);
                debug!(
                    signature = %classified.signature,
                    category = %classified.category,
                    confidence = classified.confidence,
                    "Classified new error for operation {}",
                    context.operation
                );
                let mut record = SignatureRecord {
                    classified: classified.clone(),
                    occurrences: VecDeque::new(),
                };
                record.record_occurrence(now, self.config.retention);
                vacant.insert(record);
                classified
            }
        };

        counter!(
            "classifier_errors_total",
            "category" => classified.category.to_string(),
            "severity" => classified.severity.to_string()
        )
        .increment(1);

        classified
    }

    fn match_patterns(
        &self,
        signature: String,
        error_type: &str,
        message: &str,
        context: &ErrorContext,
        status_code: Option<u16>,
        now: DateTime<Utc>,
    ) -> ClassifiedError {
        let message_lower = message.to_lowercase();
        let patterns = self
            .patterns
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut best: Option<(f64, &ErrorPattern)> = None;
        for pattern in patterns.iter() {
            let score = score_pattern(pattern, error_type, &message_lower, status_code);
            if score < MIN_MATCH_SCORE {
                continue;
            }
            // Strictly greater keeps the earliest pattern on ties
            if best.map_or(true, |(best_score, _)| score > best_score) {
                best = Some((score, pattern));
            }
        }

        let base = ClassifiedError {
            signature,
            error_type: error_type.to_string(),
            message: truncate_message(message, self.config.message_truncation).to_string(),
            status_code,
            category: ErrorCategory::Unknown,
            severity: ErrorSeverity::Medium,
            source: ErrorSource::Unknown,
            recovery_strategy: RecoveryStrategy::FailFast,
            max_retries: 0,
            retry_delay: Duration::ZERO,
            confidence: UNKNOWN_CONFIDENCE,
            matched_pattern: None,
            frequency: 1,
            first_seen: now,
            last_seen: now,
            context: context.clone(),
        };

        match best {
            Some((score, pattern)) => ClassifiedError {
                category: pattern.category,
                severity: pattern.severity,
                source: pattern.source,
                recovery_strategy: pattern.recovery_strategy,
                max_retries: pattern.max_retries,
                retry_delay: pattern.retry_delay,
                confidence: score.min(1.0),
                matched_pattern: Some(pattern.name.clone()),
                ..base
            },
            None => base,
        }
    }

    /// Returns the stored record for a signature.
    pub fn record(&self, signature: &str) -> Option<ClassifiedError> {
        self.records
            .get(signature)
            .map(|record| record.classified.clone())
    }

    /// Occurrences of `signature` within the trailing `window`.
    ///
    /// Only occurrences inside the retention period are kept, so windows
    /// longer than it are effectively clamped.
    pub fn error_frequency(&self, signature: &str, window: Duration) -> usize {
        let since = cutoff(Utc::now(), window);
        self.records
            .get(signature)
            .map(|record| record.count_since(since))
            .unwrap_or(0)
    }

    /// Whether the error occurred often enough in the alert window for its severity.
    pub fn should_alert(&self, classified: &ClassifiedError) -> bool {
        match self.config.alert_thresholds.for_severity(classified.severity) {
            Some(threshold) => {
                self.error_frequency(&classified.signature, self.config.alert_window)
                    >= threshold as usize
            }
            None => false,
        }
    }

    /// Critical errors always escalate; others once they pass the escalation threshold.
    pub fn should_escalate(&self, classified: &ClassifiedError) -> bool {
        if classified.severity == ErrorSeverity::Critical {
            return true;
        }
        self.error_frequency(&classified.signature, self.config.escalation_window)
            >= self.config.escalation_threshold as usize
    }

    /// Most frequent failure modes, highest first.
    pub fn most_frequent(&self, limit: usize) -> Vec<ClassifiedError> {
        let mut all: Vec<ClassifiedError> = self
            .records
            .iter()
            .map(|entry| entry.value().classified.clone())
            .collect();
        all.sort_by(|a, b| b.frequency.cmp(&a.frequency));
        all.truncate(limit);
        all
    }

    pub fn statistics(&self) -> ClassifierStatistics {
        let mut stats = ClassifierStatistics::default();
        for entry in self.records.iter() {
            let classified = &entry.value().classified;
            stats.distinct_signatures += 1;
            stats.total_occurrences += classified.frequency;
            *stats.by_category.entry(classified.category).or_insert(0) += classified.frequency;
            *stats.by_severity.entry(classified.severity).or_insert(0) += classified.frequency;
        }
        stats
    }

    /// Drops expired occurrence timestamps and records not seen within the
    /// retention period. Returns the number of records removed.
    pub fn prune_expired(&self) -> usize {
        let now = Utc::now();
        let since = cutoff(now, self.config.retention);
        let before = self.records.len();

        self.records.retain(|_, record| {
            while matches!(record.occurrences.front(), Some(ts) if *ts < since) {
                record.occurrences.pop_front();
            }
            record.classified.last_seen >= since
        });

        let removed = before.saturating_sub(self.records.len());
        if removed > 0 {
            debug!("Pruned {} expired error signatures", removed);
        }
        removed
    }

    /// Forgets every stored signature.
    pub fn clear(&self) {
        self.records.clear();
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}

fn score_pattern(
    pattern: &ErrorPattern,
    error_type: &str,
    message_lower: &str,
    status_code: Option<u16>,
) -> f64 {
    let mut score = 0.0;

    if pattern
        .type_patterns
        .iter()
        .any(|p| error_type.contains(p.as_str()))
    {
        score += TYPE_MATCH_SCORE;
    }

    if pattern
        .message_patterns
        .iter()
        .any(|p| message_lower.contains(&p.to_lowercase()))
    {
        score += MESSAGE_MATCH_SCORE;
    }

    if let Some(code) = status_code {
        if pattern.status_codes.contains(&code) {
            score += STATUS_MATCH_SCORE;
        }
    }

    score
}

fn cutoff(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn context(operation: &str) -> ErrorContext {
        ErrorContext::new(operation)
    }

    fn empty_classifier() -> ErrorClassifier {
        ErrorClassifier::new(ClassifierConfig {
            default_patterns: false,
            ..Default::default()
        })
    }

    #[test]
    fn test_unknown_error_defaults() {
        let classifier = empty_classifier();
        let classified =
            classifier.classify_parts("MysteryError", "something odd", &context("op"), None);

        assert_eq!(classified.category, ErrorCategory::Unknown);
        assert_eq!(classified.severity, ErrorSeverity::Medium);
        assert_eq!(classified.recovery_strategy, RecoveryStrategy::FailFast);
        assert_eq!(classified.confidence, UNKNOWN_CONFIDENCE);
        assert!(classified.matched_pattern.is_none());
        assert!(!classified.is_fail_fast());
    }

    #[test]
    fn test_scores_add_up() {
        let pattern = ErrorPattern::new("p", ErrorCategory::Network, ErrorSeverity::High)
            .with_types(&["Connect"])
            .with_messages(&["Refused"])
            .with_status_codes(&[502]);

        assert_eq!(score_pattern(&pattern, "ConnectError", "connection refused", Some(502)), 1.0);
        assert_eq!(score_pattern(&pattern, "ConnectError", "other", None), 0.4);
        assert_eq!(score_pattern(&pattern, "Other", "refused by peer", None), 0.4);
        assert_eq!(score_pattern(&pattern, "Other", "other", Some(502)), 0.2);
    }

    #[test]
    fn test_status_code_alone_is_below_threshold() {
        let classifier = empty_classifier();
        classifier.register_pattern(
            ErrorPattern::new("gateway", ErrorCategory::ExternalService, ErrorSeverity::High)
                .with_status_codes(&[502]),
        );

        let classified = classifier.classify_parts("E", "nope", &context("op"), Some(502));
        assert_eq!(classified.category, ErrorCategory::Unknown);
    }

    #[test]
    fn test_ties_go_to_first_registered_pattern() {
        let classifier = empty_classifier();
        classifier.register_pattern(
            ErrorPattern::new("first", ErrorCategory::Timeout, ErrorSeverity::Low)
                .with_messages(&["slow"]),
        );
        classifier.register_pattern(
            ErrorPattern::new("second", ErrorCategory::Network, ErrorSeverity::High)
                .with_messages(&["slow"]),
        );

        let classified = classifier.classify_parts("E", "upstream is slow", &context("op"), None);
        assert_eq!(classified.matched_pattern.as_deref(), Some("first"));
        assert_eq!(classified.category, ErrorCategory::Timeout);
    }

    #[test]
    fn test_higher_score_beats_registration_order() {
        let classifier = empty_classifier();
        classifier.register_pattern(
            ErrorPattern::new("message_only", ErrorCategory::Timeout, ErrorSeverity::Low)
                .with_messages(&["slow"]),
        );
        classifier.register_pattern(
            ErrorPattern::new("message_and_status", ErrorCategory::Network, ErrorSeverity::High)
                .with_messages(&["slow"])
                .with_status_codes(&[504]),
        );

        let classified = classifier.classify_parts("E", "slow", &context("op"), Some(504));
        assert_eq!(classified.matched_pattern.as_deref(), Some("message_and_status"));
        assert!((classified.confidence - 0.6).abs() < 1e-9);
    }

    #[rstest]
    #[case("reqwest::Error", "error sending request: Too Many Requests", Some(429), ErrorCategory::RateLimit)]
    #[case("tokio::time::error::Elapsed", "deadline has elapsed", None, ErrorCategory::Timeout)]
    #[case("std::io::error::Error", "Connection refused (os error 111)", None, ErrorCategory::Network)]
    #[case("ApiError", "invalid api key provided", Some(401), ErrorCategory::Authentication)]
    #[case("ApiError", "Forbidden", Some(403), ErrorCategory::Authorization)]
    #[case("serde_json::error::Error", "missing field `id`", None, ErrorCategory::Validation)]
    #[case("ApiError", "503 Service Unavailable", Some(503), ErrorCategory::ExternalService)]
    #[case("sqlx::Error", "deadlock detected", None, ErrorCategory::Database)]
    #[case("ConfigError", "OPENAI_API_KEY environment variable not set", None, ErrorCategory::Configuration)]
    fn test_default_table(
        #[case] error_type: &str,
        #[case] message: &str,
        #[case] status: Option<u16>,
        #[case] expected: ErrorCategory,
    ) {
        let classifier = ErrorClassifier::default();
        let classified = classifier.classify_parts(error_type, message, &context("op"), status);
        assert_eq!(classified.category, expected);
    }

    #[test]
    fn test_classify_uses_error_type_name() {
        let classifier = ErrorClassifier::default();
        let error = std::io::Error::new(std::io::ErrorKind::Other, "peer went away");

        let classified = classifier.classify(&error, &context("search.query"));
        assert_eq!(classified.error_type, "std::io::error::Error");
        assert_eq!(classified.category, ErrorCategory::Network);
        assert_eq!(classified.confidence, 0.4);
    }

    #[test]
    fn test_repeat_occurrences_share_identity() {
        let classifier = ErrorClassifier::default();
        let first = classifier.classify_parts("E", "connection reset", &context("op"), None);
        let second = classifier.classify_parts("E", "connection reset", &context("op"), None);

        assert_eq!(first.signature, second.signature);
        assert_eq!(first.frequency, 1);
        assert_eq!(second.frequency, 2);
        assert_eq!(second.first_seen, first.first_seen);
        assert!(second.last_seen >= first.last_seen);
        assert_eq!(classifier.error_frequency(&first.signature, Duration::from_secs(60)), 2);
    }

    #[test]
    fn test_repeat_occurrence_skips_reclassification() {
        let classifier = empty_classifier();
        let first = classifier.classify_parts("E", "flaky", &context("op"), None);
        assert_eq!(first.category, ErrorCategory::Unknown);

        // A pattern registered later does not change an existing record
        classifier.register_pattern(
            ErrorPattern::new("flaky", ErrorCategory::Network, ErrorSeverity::High)
                .with_messages(&["flaky"]),
        );
        let second = classifier.classify_parts("E", "flaky", &context("op"), None);
        assert_eq!(second.category, ErrorCategory::Unknown);
        assert_eq!(second.frequency, 2);
    }

    #[test]
    fn test_should_alert_uses_severity_threshold() {
        let classifier = ErrorClassifier::default();
        let ctx = context("llm.generate");

        // High severity alerts at 3 occurrences
        let mut classified = classifier.classify_parts("E", "connection refused", &ctx, None);
        assert_eq!(classified.severity, ErrorSeverity::High);
        assert!(!classifier.should_alert(&classified));

        classified = classifier.classify_parts("E", "connection refused", &ctx, None);
        assert!(!classifier.should_alert(&classified));

        classified = classifier.classify_parts("E", "connection refused", &ctx, None);
        assert!(classifier.should_alert(&classified));
    }

    #[test]
    fn test_should_escalate_critical_immediately() {
        let classifier = ErrorClassifier::default();
        let classified =
            classifier.classify_parts("E", "out of memory", &context("review.run"), None);

        assert_eq!(classified.severity, ErrorSeverity::Critical);
        assert!(classifier.should_escalate(&classified));
    }

    #[test]
    fn test_should_escalate_by_frequency() {
        let classifier = ErrorClassifier::new(ClassifierConfig {
            escalation_threshold: 2,
            ..Default::default()
        });
        let ctx = context("op");

        let first = classifier.classify_parts("E", "timed out", &ctx, None);
        assert!(!classifier.should_escalate(&first));
        let second = classifier.classify_parts("E", "timed out", &ctx, None);
        assert!(classifier.should_escalate(&second));
    }

    #[test]
    fn test_statistics_and_most_frequent() {
        let classifier = ErrorClassifier::default();
        let ctx = context("op");
        for _ in 0..3 {
            classifier.classify_parts("E", "timed out", &ctx, None);
        }
        classifier.classify_parts("E", "invalid input", &ctx, None);

        let stats = classifier.statistics();
        assert_eq!(stats.distinct_signatures, 2);
        assert_eq!(stats.total_occurrences, 4);
        assert_eq!(stats.by_category.get(&ErrorCategory::Timeout), Some(&3));
        assert_eq!(stats.by_category.get(&ErrorCategory::Validation), Some(&1));

        let top = classifier.most_frequent(1);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].category, ErrorCategory::Timeout);
    }

    #[test]
    fn test_prune_keeps_recent_records() {
        let classifier = ErrorClassifier::default();
        let classified = classifier.classify_parts("E", "timed out", &context("op"), None);

        assert_eq!(classifier.prune_expired(), 0);
        assert!(classifier.record(&classified.signature).is_some());

        classifier.clear();
        assert!(classifier.record(&classified.signature).is_none());
    }
}
