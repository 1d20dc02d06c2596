//! Correlation types for request tracking
//!
//! Every batch is submitted with a caller-supplied request identifier. It
//! doubles as the ordering scope (group key) of the notifications the batch
//! produces, so it is carried through every stage of the pipeline.

use serde::{Deserialize, Serialize};

/// Identifier of a single submitted batch
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    /// Get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Create from an existing string
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    /// Parse a caller-supplied header value. Missing, empty or
    /// whitespace-only values yield `None`.
    pub fn parse(value: Option<&str>) -> Option<Self> {
        value
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Self(v.to_string()))
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Context carried through one pipeline invocation
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: RequestId,
    /// Name of the submitting system, `"unknown"` when not supplied
    pub application_name: String,
}

impl RequestContext {
    pub const UNKNOWN_APPLICATION: &'static str = "unknown";

    /// Create a context for the given request with an unknown application
    pub fn with_request_id(request_id: RequestId) -> Self {
        Self {
            request_id,
            application_name: Self::UNKNOWN_APPLICATION.to_string(),
        }
    }

    /// Set the submitting application name
    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_display() {
        let id = RequestId::from_string("43313002-debb-49e3-85fa-34812c150242".to_string());
        assert_eq!(format!("{}", id), id.as_str());
    }

    #[test]
    fn test_parse_rejects_missing_and_blank() {
        assert!(RequestId::parse(None).is_none());
        assert!(RequestId::parse(Some("")).is_none());
        assert!(RequestId::parse(Some("   ")).is_none());
        assert_eq!(
            RequestId::parse(Some(" req-1 ")).unwrap().as_str(),
            "req-1"
        );
    }

    #[test]
    fn test_context_defaults_to_unknown_application() {
        let ctx = RequestContext::with_request_id(RequestId::from_string("req-1".to_string()));
        assert_eq!(ctx.application_name, "unknown");

        let ctx = ctx.with_application_name("test-app");
        assert_eq!(ctx.application_name, "test-app");
    }

    #[test]
    fn test_serialization() {
        let id = RequestId::from_string("req-1".to_string());
        let json = serde_json::to_string(&id).unwrap();
        let deserialized: RequestId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);
    }
}
