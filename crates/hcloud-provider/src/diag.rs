//! Diagnostics returned to the orchestration engine

use crate::error::ProviderError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// A single user-visible message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

impl Diagnostic {
    pub fn error(summary: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            summary: summary.into(),
            detail: String::new(),
        }
    }

    pub fn warning(summary: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            summary: summary.into(),
            detail: String::new(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }
}

/// Ordered collection of diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.0.push(diagnostic);
    }

    pub fn has_error(&self) -> bool {
        self.0.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }
}

impl std::ops::Index<usize> for Diagnostics {
    type Output = Diagnostic;

    fn index(&self, index: usize) -> &Diagnostic {
        &self.0[index]
    }
}

impl From<Diagnostic> for Diagnostics {
    fn from(diagnostic: Diagnostic) -> Self {
        Self(vec![diagnostic])
    }
}

impl From<ProviderError> for Diagnostics {
    fn from(err: ProviderError) -> Self {
        error_to_diag(&err)
    }
}

/// Convert an error into an error diagnostic
///
/// API errors render as `<message> (<code>)`, with `invalid_input` field
/// messages appended. Timeouts carry a detail pointing out that the
/// action may still complete.
pub fn error_to_diag(err: &ProviderError) -> Diagnostics {
    let diagnostic = Diagnostic::error(err.to_string());
    let diagnostic = match err {
        ProviderError::Timeout { .. } | ProviderError::Cancelled(_) => diagnostic.with_detail(
            "The action may still complete. The resource will be read back on the next run.",
        ),
        _ => diagnostic,
    };
    diagnostic.into()
}

/// Collapse an operation result into diagnostics
pub fn to_diagnostics(result: crate::error::Result<()>) -> Diagnostics {
    match result {
        Ok(()) => Diagnostics::new(),
        Err(e) => {
            tracing::debug!(error = %e, "Operation failed");
            error_to_diag(&e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hcloud_api::{ApiError, ErrorCode, ErrorDetails, InvalidInputField};

    #[test]
    fn test_error_to_diag() {
        let cases = vec![
            (
                "basic error",
                ProviderError::Other(anyhow::anyhow!("basic error")),
                "basic error",
            ),
            (
                "hcloud generic error",
                ProviderError::Api(ApiError::new(ErrorCode::ServiceError, "Service Error")),
                "Service Error (service_error)",
            ),
            (
                "hcloud invalid input",
                ProviderError::Api(
                    ApiError::new(ErrorCode::InvalidInput, "Invalid Input").with_details(
                        ErrorDetails::InvalidInput {
                            fields: vec![InvalidInputField {
                                name: "ip".to_string(),
                                messages: vec!["invalid field".to_string()],
                            }],
                        },
                    ),
                ),
                "Invalid Input (invalid_input): [ip => [invalid field]]",
            ),
        ];

        for (name, err, wanted) in cases {
            let got = error_to_diag(&err);
            assert!(got.has_error(), "{}: expected an error", name);
            assert_eq!(got[0].summary, wanted, "{}", name);
        }
    }

    #[test]
    fn test_action_failed_is_verbatim() {
        let err = ProviderError::ActionFailed {
            id: 13,
            command: "create_certificate".to_string(),
            code: "action_failed".to_string(),
            message: "Action failed".to_string(),
        };
        let diags = error_to_diag(&err);
        assert_eq!(
            diags[0].summary,
            "action 13 (create_certificate) failed: Action failed (action_failed)"
        );
        assert!(diags[0].detail.is_empty());
    }

    #[test]
    fn test_ok_has_no_diagnostics() {
        assert!(to_diagnostics(Ok(())).is_empty());
    }
}
