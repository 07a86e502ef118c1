//! Treating "resource is gone" as a state change instead of an error
//!
//! When the provider no longer knows a resource, the local record is
//! stale. Each helper below logs a warning, clears the identifier and
//! state, and returns `Ok(None)` so the caller can stop early. Any other
//! error passes through unchanged. Nothing here retries.

use crate::error::Result;
use crate::state::ResourceData;
use hcloud_api::HcloudError;

fn forget(data: &mut ResourceData, kind: &str) {
    tracing::warn!(kind, id = %data.id, "Resource not found, removing it from state");
    data.clear();
}

/// Reconcile the result of a lookup
pub fn reconcile_lookup<T>(
    data: &mut ResourceData,
    kind: &str,
    result: std::result::Result<Option<T>, HcloudError>,
) -> Result<Option<T>> {
    match result {
        Ok(Some(found)) => Ok(Some(found)),
        Ok(None) => {
            forget(data, kind);
            Ok(None)
        }
        Err(e) if e.is_not_found() => {
            forget(data, kind);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Reconcile the result of an update, delete or action call
pub fn reconcile_mutation<T>(
    data: &mut ResourceData,
    kind: &str,
    result: std::result::Result<T, HcloudError>,
) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => {
            forget(data, kind);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Parse the stored identifier; one that is not a positive integer counts as gone
pub fn reconcile_id(data: &mut ResourceData, kind: &str) -> Option<i64> {
    match parse_id(&data.id) {
        Some(id) => Some(id),
        None => {
            tracing::warn!(kind, id = %data.id, "Invalid identifier, removing it from state");
            data.clear();
            None
        }
    }
}

pub fn parse_id(raw: &str) -> Option<i64> {
    raw.parse::<i64>().ok().filter(|id| *id > 0)
}
