//! Label validation
//!
//! Keys may carry a DNS-style prefix (`example.com/role`). Values are
//! either empty or up to 63 characters starting and ending with an
//! alphanumeric character. Label selectors are evaluated by the API and
//! are not parsed here.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use thiserror::Error;

static KEY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^([a-zA-Z0-9]([-_.a-zA-Z0-9]{0,251}[a-zA-Z0-9])?/)?[a-zA-Z0-9]([-_.a-zA-Z0-9]{0,61}[a-zA-Z0-9])?$",
    )
    .expect("label key pattern is valid")
});

static VALUE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(([a-zA-Z0-9][-_.a-zA-Z0-9]{0,61})?[a-zA-Z0-9])?$")
        .expect("label value pattern is valid")
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LabelError {
    #[error("label key '{0}' is not correctly formatted")]
    InvalidKey(String),

    #[error("label value '{value}' (key: {key}) is not correctly formatted")]
    InvalidValue { key: String, value: String },
}

pub fn validate_label(key: &str, value: &str) -> Result<(), LabelError> {
    if !KEY_PATTERN.is_match(key) {
        return Err(LabelError::InvalidKey(key.to_string()));
    }
    if !VALUE_PATTERN.is_match(value) {
        return Err(LabelError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Validate every label; keys are checked in sorted order so the first
/// reported error is stable.
pub fn validate_labels(labels: &HashMap<String, String>) -> Result<(), LabelError> {
    let mut keys: Vec<&String> = labels.keys().collect();
    keys.sort();
    for key in keys {
        validate_label(key, &labels[key])?;
    }
    Ok(())
}
