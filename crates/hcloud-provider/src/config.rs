//! Provider configuration
//!
//! Read from the engine's provider block (JSON) or from the environment:
//!
//! | variable | default |
//! |---|---|
//! | `HCLOUD_TOKEN` | required, 64 characters |
//! | `HCLOUD_ENDPOINT` | `https://api.hetzner.cloud/v1` |
//! | `HCLOUD_POLL_INTERVAL` | `500ms` |
//! | `HCLOUD_POLL_FUNCTION` | `exponential` |
//! | `HCLOUD_ACTION_TIMEOUT` | `30m` |

use crate::action::{PollConfig, PollFunction, RetryConfig};
use crate::error::{ProviderError, Result};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

const TOKEN_LENGTH: usize = 64;
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(60);
const MAX_ACTION_TIMEOUT: Duration = Duration::from_secs(7 * 24 * 3600);

#[derive(Clone, Deserialize)]
pub struct ProviderConfig {
    pub token: String,

    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_poll_interval", deserialize_with = "de_duration")]
    pub poll_interval: Duration,

    #[serde(default)]
    pub poll_function: PollFunction,

    #[serde(default = "default_action_timeout", deserialize_with = "de_duration")]
    pub action_timeout: Duration,

    /// Attempts per status fetch before a transport error is surfaced
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_endpoint() -> String {
    hcloud_api::DEFAULT_ENDPOINT.to_string()
}
fn default_poll_interval() -> Duration {
    Duration::from_millis(500)
}
fn default_action_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}
fn default_max_retries() -> u32 {
    RetryConfig::default().max_attempts
}

fn de_duration<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Duration, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(serde::de::Error::custom)
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("token", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("poll_interval", &self.poll_interval)
            .field("poll_function", &self.poll_function)
            .field("action_timeout", &self.action_timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl ProviderConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            endpoint: default_endpoint(),
            poll_interval: default_poll_interval(),
            poll_function: PollFunction::default(),
            action_timeout: default_action_timeout(),
            max_retries: default_max_retries(),
        }
    }

    /// Build the configuration from `HCLOUD_*` environment variables
    pub fn from_env() -> Result<Self> {
        let token = std::env::var("HCLOUD_TOKEN")
            .map_err(|_| ProviderError::InvalidConfig("HCLOUD_TOKEN is not set".to_string()))?;
        let mut config = Self::new(token);

        if let Ok(endpoint) = std::env::var("HCLOUD_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Ok(interval) = std::env::var("HCLOUD_POLL_INTERVAL") {
            config.poll_interval = parse_duration(&interval).map_err(ProviderError::InvalidConfig)?;
        }
        if let Ok(function) = std::env::var("HCLOUD_POLL_FUNCTION") {
            config.poll_function = function.parse().map_err(ProviderError::InvalidConfig)?;
        }
        if let Ok(timeout) = std::env::var("HCLOUD_ACTION_TIMEOUT") {
            config.action_timeout = parse_duration(&timeout).map_err(ProviderError::InvalidConfig)?;
        }

        config.validate()?;
        tracing::debug!(?config, "Loaded provider configuration from environment");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.token.len() != TOKEN_LENGTH {
            return Err(ProviderError::InvalidConfig(format!(
                "entered token is invalid (must be exactly {} characters long)",
                TOKEN_LENGTH
            )));
        }
        if self.poll_interval.is_zero() || self.poll_interval > MAX_POLL_INTERVAL {
            return Err(ProviderError::InvalidConfig(format!(
                "poll interval must be between 1ms and {:?}, got {:?}",
                MAX_POLL_INTERVAL, self.poll_interval
            )));
        }
        if self.action_timeout < self.poll_interval {
            return Err(ProviderError::InvalidConfig(
                "action timeout must not be shorter than the poll interval".to_string(),
            ));
        }
        if self.action_timeout > MAX_ACTION_TIMEOUT {
            return Err(ProviderError::InvalidConfig(format!(
                "action timeout must not exceed {:?}, got {:?}",
                MAX_ACTION_TIMEOUT, self.action_timeout
            )));
        }
        Ok(())
    }

    /// Settings for the action waiter
    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: self.poll_interval,
            function: self.poll_function,
            timeout: self.action_timeout,
            retry: RetryConfig {
                max_attempts: self.max_retries.max(1),
                ..RetryConfig::default()
            },
            ..PollConfig::default()
        }
    }

    /// Settings for the API client
    pub fn client_config(&self) -> hcloud_api::ClientConfig {
        hcloud_api::ClientConfig::new(self.token.clone()).with_endpoint(self.endpoint.clone())
    }
}

/// Parse durations of the form `500ms`, `2s`, `5m` or `1h`
pub fn parse_duration(raw: &str) -> std::result::Result<Duration, String> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("missing unit in duration '{}'", raw))?;
    let (value, unit) = raw.split_at(split);
    let value: u64 = value
        .parse()
        .map_err(|_| format!("invalid duration '{}'", raw))?;

    let seconds = |factor: u64| {
        value
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration '{}' is too large", raw))
    };
    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => seconds(1),
        "m" => seconds(60),
        "h" => seconds(3600),
        _ => Err(format!("unknown unit '{}' in duration '{}'", unit, raw)),
    }
}
