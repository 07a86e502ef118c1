//! Resource attribute state and schema upgrades
//!
//! The engine persists each resource as a flat attribute map plus an
//! identifier. [`ResourceData`] carries the desired configuration next to
//! the last known state and converts both to and from typed structs.

use crate::error::{ProviderError, Result};
use crate::timeutil;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Flat attribute map as persisted by the engine
pub type Attributes = serde_json::Map<String, Value>;

/// Desired configuration and last known state of one resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, serde::Deserialize)]
pub struct ResourceData {
    /// Provider-side identifier; empty when the resource is absent
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub config: Attributes,

    #[serde(default)]
    pub state: Attributes,
}

impl ResourceData {
    pub fn new(config: Attributes) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_state(mut self, state: Attributes) -> Self {
        self.state = state;
        self
    }

    pub fn set_id(&mut self, id: i64) {
        self.id = id.to_string();
    }

    pub fn is_absent(&self) -> bool {
        self.id.is_empty()
    }

    /// Forget the resource: clear identifier and state
    pub fn clear(&mut self) {
        self.id.clear();
        self.state.clear();
    }

    /// Decode the desired configuration into its typed form
    pub fn decode_config<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.config.clone()))
            .map_err(|e| ProviderError::InvalidConfig(e.to_string()))
    }

    pub fn decode_state<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.state.clone()))
            .map_err(|e| ProviderError::InvalidState(e.to_string()))
    }

    /// Merge a typed state into the attribute map, keeping attributes it does not name
    pub fn set_state<T: Serialize>(&mut self, state: &T) -> Result<()> {
        match serde_json::to_value(state)? {
            Value::Object(attributes) => {
                self.state.extend(attributes);
                Ok(())
            }
            other => Err(ProviderError::InvalidState(format!(
                "state must serialize to an object, got {}",
                other
            ))),
        }
    }

    /// Copy configured attributes the remote side does not report back
    pub fn fill_from_config(&mut self) {
        for (key, value) in &self.config {
            if !self.state.contains_key(key) {
                self.state.insert(key.clone(), value.clone());
            }
        }
    }

    /// Whether the configured value of `key` differs from the known state
    ///
    /// Missing, null, `false` and empty values compare equal.
    pub fn has_change(&self, key: &str) -> bool {
        normalized(self.config.get(key)) != normalized(self.state.get(key))
    }
}

fn normalized(value: Option<&Value>) -> Option<&Value> {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(Value::Object(o)) if o.is_empty() => None,
        Some(Value::Array(a)) if a.is_empty() => None,
        Some(v) => Some(v),
    }
}

/// One migration step from `version` to `version + 1`
#[derive(Clone, Copy)]
pub struct StateUpgrader {
    pub version: u32,
    pub upgrade: fn(Attributes) -> Result<Attributes>,
}

impl std::fmt::Debug for StateUpgrader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateUpgrader")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl StateUpgrader {
    /// Apply every step from `version` up to `current`
    pub fn upgrade(
        upgraders: &[StateUpgrader],
        current: u32,
        version: u32,
        mut raw: Attributes,
    ) -> Result<Attributes> {
        if version > current {
            return Err(ProviderError::InvalidState(format!(
                "state version {} is newer than supported version {}",
                version, current
            )));
        }

        for step in version..current {
            let upgrader = upgraders
                .iter()
                .find(|u| u.version == step)
                .ok_or_else(|| {
                    ProviderError::InvalidState(format!("no state upgrade from version {}", step))
                })?;
            raw = (upgrader.upgrade)(raw)?;
            tracing::debug!(from = step, to = step + 1, "Upgraded resource state");
        }
        Ok(raw)
    }
}

const CERTIFICATE_TIME_FIELDS: [&str; 3] = ["created", "not_valid_before", "not_valid_after"];

/// Certificate v0 stored timestamps in the legacy layout; v1 uses RFC 3339
pub fn upgrade_certificate_v0(mut raw: Attributes) -> Result<Attributes> {
    for field in CERTIFICATE_TIME_FIELDS {
        let current = match raw.get(field) {
            Some(Value::String(s)) => s,
            Some(other) => {
                return Err(ProviderError::InvalidState(format!(
                    "attribute '{}' must be a string, got {}",
                    field, other
                )));
            }
            None => {
                return Err(ProviderError::InvalidState(format!(
                    "missing attribute '{}'",
                    field
                )));
            }
        };

        match timeutil::legacy_to_rfc3339(current) {
            Some(converted) => {
                raw.insert(field.to_string(), Value::String(converted));
            }
            None => {
                tracing::debug!(field, value = %current, "State upgrade skipped field");
            }
        }
    }
    Ok(raw)
}

/// Upgrade chain shared by both certificate resources
pub static CERTIFICATE_UPGRADERS: [StateUpgrader; 1] = [StateUpgrader {
    version: 0,
    upgrade: upgrade_certificate_v0,
}];

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> Attributes {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_certificate_v0_upgrade() {
        let raw = attrs(json!({
            "name": "cert",
            "created": "2006-01-02 15:04:05 +0000 UTC",
            "not_valid_before": "2021-03-04 10:11:12.5 +0100 CET",
            "not_valid_after": "2022-03-04 10:11:12 +0100 CET",
        }));

        let upgraded = upgrade_certificate_v0(raw).unwrap();
        assert_eq!(upgraded["created"], "2006-01-02T15:04:05Z");
        assert_eq!(upgraded["not_valid_before"], "2021-03-04T10:11:12+01:00");
        assert_eq!(upgraded["not_valid_after"], "2022-03-04T10:11:12+01:00");
        assert_eq!(upgraded["name"], "cert");
    }

    #[test]
    fn test_unparseable_field_is_skipped() {
        let raw = attrs(json!({
            "created": "2006-01-02 15:04:05 +0000 UTC",
            "not_valid_before": "",
            "not_valid_after": "yesterday",
        }));

        let upgraded = upgrade_certificate_v0(raw).unwrap();
        assert_eq!(upgraded["created"], "2006-01-02T15:04:05Z");
        assert_eq!(upgraded["not_valid_before"], "");
        assert_eq!(upgraded["not_valid_after"], "yesterday");
    }

    #[test]
    fn test_upgrade_is_idempotent() {
        let raw = attrs(json!({
            "created": "2006-01-02 15:04:05 +0000 UTC",
            "not_valid_before": "2021-03-04 10:11:12 +0100 CET",
            "not_valid_after": "2022-03-04 10:11:12 -0700 MST",
        }));

        let once = upgrade_certificate_v0(raw).unwrap();
        let twice = upgrade_certificate_v0(once.clone()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_structurally_invalid_state() {
        let missing = attrs(json!({
            "created": "2006-01-02 15:04:05 +0000 UTC",
            "not_valid_before": "2006-01-02 15:04:05 +0000 UTC",
        }));
        assert!(matches!(
            upgrade_certificate_v0(missing),
            Err(ProviderError::InvalidState(_))
        ));

        let not_a_string = attrs(json!({
            "created": 1136214245,
            "not_valid_before": "",
            "not_valid_after": "",
        }));
        assert!(matches!(
            upgrade_certificate_v0(not_a_string),
            Err(ProviderError::InvalidState(_))
        ));
    }

    #[test]
    fn test_upgrade_chain() {
        let raw = attrs(json!({
            "created": "2006-01-02 15:04:05 +0000 UTC",
            "not_valid_before": "",
            "not_valid_after": "",
        }));

        let current = StateUpgrader::upgrade(&CERTIFICATE_UPGRADERS, 1, 1, raw.clone()).unwrap();
        assert_eq!(current, raw, "state at the current version is left alone");

        let upgraded = StateUpgrader::upgrade(&CERTIFICATE_UPGRADERS, 1, 0, raw.clone()).unwrap();
        assert_eq!(upgraded["created"], "2006-01-02T15:04:05Z");

        assert!(StateUpgrader::upgrade(&CERTIFICATE_UPGRADERS, 1, 2, raw.clone()).is_err());
        assert!(StateUpgrader::upgrade(&[], 1, 0, raw).is_err());
    }

    #[test]
    fn test_has_change() {
        let data = ResourceData::new(attrs(json!({
            "name": "new",
            "labels": {},
            "size": 10,
        })))
        .with_state(attrs(json!({
            "name": "old",
            "size": 10,
            "description": "",
        })));

        assert!(data.has_change("name"));
        assert!(!data.has_change("labels"), "empty map equals missing");
        assert!(!data.has_change("size"));
        assert!(!data.has_change("description"));
    }

    #[test]
    fn test_set_state_merges() {
        #[derive(Serialize)]
        struct Partial {
            name: String,
        }

        let mut data = ResourceData::default().with_state(attrs(json!({
            "name": "old",
            "private_key": "secret",
        })));
        data.set_state(&Partial {
            name: "new".to_string(),
        })
        .unwrap();

        assert_eq!(data.state["name"], "new");
        assert_eq!(data.state["private_key"], "secret");
    }

    #[test]
    fn test_clear() {
        let mut data = ResourceData::default()
            .with_id("42")
            .with_state(attrs(json!({"name": "x"})));
        data.clear();
        assert!(data.is_absent());
        assert!(data.state.is_empty());
    }
}
