use llm_resilience_core::domain::{
    ClassifierConfig, ErrorCategory, ErrorContext, ErrorPattern, ErrorSeverity, ErrorSource,
    RecoveryStrategy,
};
use llm_resilience_engine::ErrorClassifier;
use pretty_assertions::assert_eq;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
enum ProviderError {
    #[error("connection refused by {0}")]
    Connect(String),
    #[error("rate limit exceeded, retry later")]
    Throttled,
    #[error("model returned garbage")]
    Garbage,
}

#[test]
fn test_repeated_error_keeps_signature_and_counts_up() {
    let classifier = ErrorClassifier::default();
    let context = ErrorContext::new("chat_completion");
    let error = ProviderError::Connect("api.example.com".to_string());

    let mut signature = None;
    for expected in 1..=4u64 {
        let classified = classifier.classify(&error, &context);
        assert_eq!(classified.frequency, expected);
        assert_eq!(classified.category, ErrorCategory::Network);
        match &signature {
            None => signature = Some(classified.signature.clone()),
            Some(first) => assert_eq!(&classified.signature, first),
        }
    }

    let signature = signature.unwrap();
    let stored = classifier.record(&signature).unwrap();
    assert_eq!(stored.frequency, 4);
    assert!(stored.last_seen >= stored.first_seen);
    assert_eq!(
        classifier.error_frequency(&signature, Duration::from_secs(60)),
        4
    );
}

#[test]
fn test_operation_is_part_of_the_signature() {
    let classifier = ErrorClassifier::default();
    let error = ProviderError::Throttled;

    let search = classifier.classify(&error, &ErrorContext::new("search"));
    let generate = classifier.classify(&error, &ErrorContext::new("generate"));

    assert_ne!(search.signature, generate.signature);
    assert_eq!(search.category, ErrorCategory::RateLimit);
    assert_eq!(classifier.statistics().distinct_signatures, 2);
}

#[test]
fn test_unmatched_error_is_unknown_and_retryable() {
    let classifier = ErrorClassifier::default();

    let classified = classifier.classify(&ProviderError::Garbage, &ErrorContext::new("generate"));

    assert_eq!(classified.category, ErrorCategory::Unknown);
    assert_eq!(classified.matched_pattern, None);
    assert_eq!(classified.confidence, 0.5);
    assert!(!classified.is_fail_fast());
}

#[test]
fn test_status_code_raises_confidence() {
    let classifier = ErrorClassifier::default();
    let context = ErrorContext::new("generate");

    let plain = classifier.classify_parts("HttpError", "too many requests", &context, None);
    let with_status =
        classifier.classify_parts("HttpError", "Too Many Requests!", &context, Some(429));

    assert_eq!(plain.category, ErrorCategory::RateLimit);
    assert_eq!(with_status.category, ErrorCategory::RateLimit);
    assert!(with_status.confidence > plain.confidence);
}

#[test]
fn test_custom_pattern_takes_part_in_matching() {
    let classifier = ErrorClassifier::new(ClassifierConfig {
        default_patterns: false,
        ..Default::default()
    });
    classifier.register_pattern(
        ErrorPattern::new("garbage_output", ErrorCategory::ExternalService, ErrorSeverity::Low)
            .with_types(&["ProviderError"])
            .with_messages(&["garbage"])
            .with_source(ErrorSource::Llm)
            .with_recovery(RecoveryStrategy::Fallback, 1, Duration::from_millis(100)),
    );

    let classified = classifier.classify(&ProviderError::Garbage, &ErrorContext::new("generate"));

    assert_eq!(classified.matched_pattern.as_deref(), Some("garbage_output"));
    assert_eq!(classified.source, ErrorSource::Llm);
    assert_eq!(classified.recovery_strategy, RecoveryStrategy::Fallback);
    assert!(classified.confidence > 0.7);
}

#[test]
fn test_alerting_follows_severity_thresholds() {
    let classifier = ErrorClassifier::default();
    let context = ErrorContext::new("search");
    let error = ProviderError::Connect("db".to_string());

    // Network errors are high severity and alert on the third occurrence
    let first = classifier.classify(&error, &context);
    assert!(!classifier.should_alert(&first));
    classifier.classify(&error, &context);
    let third = classifier.classify(&error, &context);
    assert!(classifier.should_alert(&third));
    assert!(!classifier.should_escalate(&third));
}

#[test]
fn test_critical_errors_always_escalate() {
    let classifier = ErrorClassifier::default();
    let classified = classifier.classify_parts(
        "ProviderError",
        "out of memory while loading weights",
        &ErrorContext::new("load_model"),
        None,
    );

    assert_eq!(classified.severity, ErrorSeverity::Critical);
    assert!(classifier.should_escalate(&classified));
}

#[test]
fn test_most_frequent_and_statistics() {
    let classifier = ErrorClassifier::default();
    let context = ErrorContext::new("generate");

    for _ in 0..3 {
        classifier.classify(&ProviderError::Throttled, &context);
    }
    classifier.classify(&ProviderError::Garbage, &context);

    let top = classifier.most_frequent(1);
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].category, ErrorCategory::RateLimit);

    let stats = classifier.statistics();
    assert_eq!(stats.total_occurrences, 4);
    assert_eq!(stats.by_category[&ErrorCategory::RateLimit], 3);
    assert_eq!(stats.by_category[&ErrorCategory::Unknown], 1);

    classifier.clear();
    assert!(classifier.most_frequent(10).is_empty());
}

#[test]
fn test_prune_keeps_recent_signatures() {
    let classifier = ErrorClassifier::default();
    classifier.classify(&ProviderError::Throttled, &ErrorContext::new("generate"));

    assert_eq!(classifier.prune_expired(), 0);
    assert_eq!(classifier.statistics().distinct_signatures, 1);
}
