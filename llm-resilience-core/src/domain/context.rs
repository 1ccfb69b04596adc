use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifies the call site an error was raised from.
///
/// Built by the caller before classification. The builder methods consume
/// the value, so a context is never mutated once it has been handed out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorContext {
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            user_id: None,
            session_id: None,
            request_id: None,
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_request(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_builder() {
        let context = ErrorContext::new("llm.generate")
            .with_user("u-1")
            .with_session("s-1")
            .with_request("r-1")
            .with_metadata("model", "gpt-4");

        assert_eq!(context.operation, "llm.generate");
        assert_eq!(context.user_id.as_deref(), Some("u-1"));
        assert_eq!(context.session_id.as_deref(), Some("s-1"));
        assert_eq!(context.request_id.as_deref(), Some("r-1"));
        assert_eq!(context.metadata["model"], serde_json::json!("gpt-4"));
    }

    #[test]
    fn test_context_skips_absent_identifiers() {
        let json = serde_json::to_value(ErrorContext::new("search.query")).unwrap();
        assert!(json.get("user_id").is_none());
        assert!(json.get("request_id").is_none());
        assert_eq!(json["operation"], "search.query");
    }
}
