//! API error types

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors returned by the API client
#[derive(Error, Debug)]
pub enum HcloudError {
    /// Structured rejection returned by the API
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The API could not be reached
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Non-2xx response without a parseable error envelope
    #[error("unexpected response (HTTP {status}): {body}")]
    UnexpectedResponse { status: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl HcloudError {
    /// Returns the structured API error, if this is one
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            HcloudError::Api(e) => Some(e),
            _ => None,
        }
    }

    /// Whether the API reported the given error code
    pub fn is_code(&self, code: &ErrorCode) -> bool {
        self.api_error().is_some_and(|e| &e.code == code)
    }

    pub fn is_not_found(&self) -> bool {
        self.is_code(&ErrorCode::NotFound)
    }

    /// Build a transport error from any displayable cause
    pub fn transport(message: impl Into<String>) -> Self {
        HcloudError::Transport(message.into().into())
    }
}

impl From<reqwest::Error> for HcloudError {
    fn from(e: reqwest::Error) -> Self {
        HcloudError::Transport(Box::new(e))
    }
}

pub type Result<T> = std::result::Result<T, HcloudError>;

/// Machine-readable error code of an API error
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotFound,
    ServiceError,
    InvalidInput,
    Conflict,
    Locked,
    Forbidden,
    Unauthorized,
    RateLimitExceeded,
    ResourceLimitExceeded,
    UniquenessError,
    Protected,
    Maintenance,
    Timeout,
    ActionFailed,
    Other(String),
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::NotFound => "not_found",
            ErrorCode::ServiceError => "service_error",
            ErrorCode::InvalidInput => "invalid_input",
            ErrorCode::Conflict => "conflict",
            ErrorCode::Locked => "locked",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::RateLimitExceeded => "rate_limit_exceeded",
            ErrorCode::ResourceLimitExceeded => "resource_limit_exceeded",
            ErrorCode::UniquenessError => "uniqueness_error",
            ErrorCode::Protected => "protected",
            ErrorCode::Maintenance => "maintenance",
            ErrorCode::Timeout => "timeout",
            ErrorCode::ActionFailed => "action_failed",
            ErrorCode::Other(code) => code,
        }
    }
}

impl From<&str> for ErrorCode {
    fn from(code: &str) -> Self {
        match code {
            "not_found" => ErrorCode::NotFound,
            "service_error" => ErrorCode::ServiceError,
            "invalid_input" => ErrorCode::InvalidInput,
            "conflict" => ErrorCode::Conflict,
            "locked" => ErrorCode::Locked,
            "forbidden" => ErrorCode::Forbidden,
            "unauthorized" => ErrorCode::Unauthorized,
            "rate_limit_exceeded" => ErrorCode::RateLimitExceeded,
            "resource_limit_exceeded" => ErrorCode::ResourceLimitExceeded,
            "uniqueness_error" => ErrorCode::UniquenessError,
            "protected" => ErrorCode::Protected,
            "maintenance" => ErrorCode::Maintenance,
            "timeout" => ErrorCode::Timeout,
            "action_failed" => ErrorCode::ActionFailed,
            other => ErrorCode::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Ok(ErrorCode::from(code.as_str()))
    }
}

/// Structured error returned by the API
///
/// Displays as `<message> (<code>)`, followed by the offending fields
/// for `invalid_input` errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = Some(details);
        self
    }

    /// Field-level messages of an `invalid_input` error
    pub fn invalid_fields(&self) -> &[InvalidInputField] {
        match &self.details {
            Some(ErrorDetails::InvalidInput { fields }) => fields,
            _ => &[],
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)?;
        let fields = self.invalid_fields();
        if self.code == ErrorCode::InvalidInput && !fields.is_empty() {
            let rendered: Vec<String> = fields
                .iter()
                .map(|field| format!("{} => [{}]", field.name, field.messages.join(" ")))
                .collect();
            write!(f, ": [{}]", rendered.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

/// Code-specific error details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorDetails {
    InvalidInput { fields: Vec<InvalidInputField> },
    Other(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidInputField {
    pub name: String,
    #[serde(default)]
    pub messages: Vec<String>,
}

/// Error envelope of a non-2xx response
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub error: ApiError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_generic_error() {
        let err = ApiError::new(ErrorCode::ServiceError, "Service Error");
        assert_eq!(err.to_string(), "Service Error (service_error)");
    }

    #[test]
    fn test_display_invalid_input() {
        let err = ApiError::new(ErrorCode::InvalidInput, "Invalid Input").with_details(
            ErrorDetails::InvalidInput {
                fields: vec![InvalidInputField {
                    name: "ip".to_string(),
                    messages: vec!["invalid field".to_string()],
                }],
            },
        );
        assert_eq!(
            err.to_string(),
            "Invalid Input (invalid_input): [ip => [invalid field]]"
        );
    }

    #[test]
    fn test_decode_envelope() {
        let body = r#"{"error":{"code":"invalid_input","message":"invalid input in field 'name'","details":{"fields":[{"name":"name","messages":["is too long"]}]}}}"#;
        let envelope: ErrorEnvelope = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.error.code, ErrorCode::InvalidInput);
        assert_eq!(envelope.error.invalid_fields()[0].name, "name");
    }

    #[test]
    fn test_unknown_code_is_preserved() {
        let body = r#"{"error":{"code":"server_not_stopped","message":"server must be stopped"}}"#;
        let envelope: ErrorEnvelope = serde_json::from_str(body).unwrap();
        assert_eq!(
            envelope.error.code,
            ErrorCode::Other("server_not_stopped".to_string())
        );
        assert_eq!(
            envelope.error.to_string(),
            "server must be stopped (server_not_stopped)"
        );
    }

    #[test]
    fn test_not_found_classification() {
        let err = HcloudError::from(ApiError::new(ErrorCode::NotFound, "not found"));
        assert!(err.is_not_found());
        assert!(!HcloudError::transport("connection reset").is_not_found());
    }
}
