//! Provider error types

use hcloud_api::{ApiError, HcloudError};
use std::time::Duration;
use thiserror::Error;

/// Provider errors
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Structured rejection from the API, passed through verbatim
    #[error(transparent)]
    Api(ApiError),

    /// The API could not be reached, or answered with a non-API failure
    #[error("{0}")]
    Transport(String),

    /// An asynchronous action terminated unsuccessfully
    #[error("action {id} ({command}) failed: {message} ({code})")]
    ActionFailed {
        id: i64,
        command: String,
        code: String,
        message: String,
    },

    #[error("action {0} not found")]
    ActionNotFound(i64),

    /// The action was still running when the deadline passed; it may
    /// still complete remotely
    #[error("timed out after {elapsed:?} waiting for action {id}")]
    Timeout { id: i64, elapsed: Duration },

    #[error("cancelled while waiting for action {0}")]
    Cancelled(i64),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Unknown type: {0}")]
    UnknownType(String),

    #[error("State lock failed: {0}")]
    LockError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProviderError {
    /// Whether the outcome of the operation is unknown and state should be re-read
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, ProviderError::Timeout { .. } | ProviderError::Cancelled(_))
    }
}

impl From<HcloudError> for ProviderError {
    fn from(e: HcloudError) -> Self {
        match e {
            HcloudError::Api(api) => ProviderError::Api(api),
            HcloudError::Decode(json) => ProviderError::Json(json),
            other => ProviderError::Transport(other.to_string()),
        }
    }
}

impl From<hcloud_api::LabelError> for ProviderError {
    fn from(e: hcloud_api::LabelError) -> Self {
        ProviderError::InvalidConfig(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;
