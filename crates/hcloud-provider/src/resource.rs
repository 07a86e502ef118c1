//! Resource and data source abstractions
//!
//! A [`Resource`] implements the CRUD lifecycle of one resource type, a
//! [`DataSource`] a read-only lookup. Both receive a [`Context`] carrying
//! the injected API client, the action waiter and the caller's
//! cancellation token.

use crate::action::ActionWaiter;
use crate::error::{ProviderError, Result};
use crate::state::{ResourceData, StateUpgrader};
use async_trait::async_trait;
use hcloud_api::{
    Action, ActionApi, CertificateApi, FloatingIpApi, ListOpts, PlacementGroupApi, VolumeApi,
};
use serde::Deserialize;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Every API service the provider talks to
pub trait CloudApi: ActionApi + CertificateApi + PlacementGroupApi + VolumeApi + FloatingIpApi {}

impl<T> CloudApi for T where T: ActionApi + CertificateApi + PlacementGroupApi + VolumeApi + FloatingIpApi
{}

/// Per-call dependencies of a handler
pub struct Context<'a> {
    pub client: &'a dyn CloudApi,
    pub waiter: &'a ActionWaiter,
    pub cancel: &'a CancellationToken,
}

impl Context<'_> {
    /// Wait for an optional action returned by a mutating call
    pub async fn wait(&self, action: Option<&Action>) -> Result<()> {
        self.waiter.wait_for(self.client, action, self.cancel).await
    }

    /// Wait for a primary action and its follow-ups, in order
    pub async fn wait_all(&self, primary: Option<&Action>, next: &[Action]) -> Result<()> {
        self.wait(primary).await?;
        self.waiter.wait_all(self.client, next, self.cancel).await
    }
}

#[async_trait]
pub trait Resource: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn schema_version(&self) -> u32 {
        0
    }

    /// Migration steps, keyed by source version
    fn state_upgraders(&self) -> &'static [StateUpgrader] {
        &[]
    }

    /// Whether a change from `old` to `new` of `attribute` is cosmetic
    fn suppress_diff(&self, _attribute: &str, _old: &str, _new: &str) -> bool {
        false
    }

    /// Attributes whose change requires replacing the resource
    fn replace_on_change(&self) -> &'static [&'static str] {
        &[]
    }

    async fn create(&self, ctx: &Context<'_>, data: &mut ResourceData) -> Result<()>;

    async fn read(&self, ctx: &Context<'_>, data: &mut ResourceData) -> Result<()>;

    async fn update(&self, ctx: &Context<'_>, data: &mut ResourceData) -> Result<()>;

    async fn delete(&self, ctx: &Context<'_>, data: &mut ResourceData) -> Result<()>;

    /// Adopt an existing remote object by identifier
    async fn import(&self, ctx: &Context<'_>, data: &mut ResourceData) -> Result<()> {
        self.read(ctx, data).await?;
        if data.is_absent() {
            return Err(ProviderError::NotFound(
                "cannot import non-existent remote object".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
pub trait DataSource: Send + Sync {
    fn type_name(&self) -> &'static str;

    /// Resolve the lookup in `data.config` and write the result to `data.state`
    async fn read(&self, ctx: &Context<'_>, data: &mut ResourceData) -> Result<()>;
}

/// How a single-object data source finds its target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Id(i64),
    Name(String),
    Selector(String),
}

#[derive(Debug, Default, Deserialize)]
struct QueryAttributes {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    with_selector: Option<String>,
}

impl Query {
    /// Read the lookup from `id`, `name` or `with_selector`, in that order
    pub fn from_data(data: &ResourceData, kind: &str) -> Result<Self> {
        let attrs: QueryAttributes = data.decode_config()?;
        if let Some(id) = attrs.id.filter(|id| *id > 0) {
            return Ok(Query::Id(id));
        }
        if let Some(name) = attrs.name.filter(|n| !n.is_empty()) {
            return Ok(Query::Name(name));
        }
        if let Some(selector) = attrs.with_selector.filter(|s| !s.is_empty()) {
            return Ok(Query::Selector(selector));
        }
        Err(ProviderError::InvalidConfig(format!(
            "please specify an id, a name or a label selector to lookup the {}",
            kind
        )))
    }
}

/// Selector of a plural data source; absent means "everything"
pub(crate) fn list_opts(data: &ResourceData) -> Result<ListOpts> {
    let attrs: QueryAttributes = data.decode_config()?;
    Ok(attrs
        .with_selector
        .filter(|s| !s.is_empty())
        .map(ListOpts::with_selector)
        .unwrap_or_default())
}

pub(crate) fn no_match(kind: &str) -> ProviderError {
    ProviderError::NotFound(format!("no {} found", kind))
}

/// Resolve a lookup result that must name exactly one object
pub(crate) fn exactly_one<T>(kind: &str, found: Vec<T>) -> Result<T> {
    let mut found = found.into_iter();
    match (found.next(), found.next()) {
        (Some(only), None) => Ok(only),
        (None, _) => Err(no_match(kind)),
        (Some(_), Some(_)) => Err(ProviderError::NotFound(format!(
            "more than one {} found for selector",
            kind
        ))),
    }
}

/// Identifier of a plural data source result
pub(crate) fn list_id(ids: impl IntoIterator<Item = i64>) -> String {
    let ids: Vec<String> = ids.into_iter().map(|id| id.to_string()).collect();
    if ids.is_empty() {
        "none".to_string()
    } else {
        ids.join("-")
    }
}

pub(crate) fn check_labels(labels: &HashMap<String, String>) -> Result<()> {
    hcloud_api::validate_labels(labels)?;
    Ok(())
}
