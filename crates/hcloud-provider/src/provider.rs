//! Provider entry point
//!
//! [`Provider`] owns the API client and the action waiter, routes engine
//! requests to the registered resource and data source handlers, and turns
//! every outcome into [`Diagnostics`].

use crate::action::ActionWaiter;
use crate::config::ProviderConfig;
use crate::diag::{Diagnostic, Diagnostics, error_to_diag};
use crate::error::{ProviderError, Result};
use crate::resource::{CloudApi, Context, DataSource, Resource};
use crate::resources::{all_data_sources, all_resources};
use crate::state::{Attributes, ResourceData, StateUpgrader};
use crate::store::StateSnapshot;
use hcloud_api::Client;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

/// Which handler operation a request runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Create,
    Read,
    Update,
    Delete,
    Import,
}

impl Operation {
    fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Import => "import",
        }
    }
}

pub struct Provider<C> {
    client: C,
    config: ProviderConfig,
    waiter: ActionWaiter,
    resources: BTreeMap<&'static str, Box<dyn Resource>>,
    data_sources: BTreeMap<&'static str, Box<dyn DataSource>>,
}

impl Provider<Client> {
    /// Build a provider talking to the real API
    pub fn from_config(config: ProviderConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::new(config.client_config())?;
        Ok(Self::new(client, config))
    }
}

impl<C: CloudApi + 'static> Provider<C> {
    pub fn new(client: C, config: ProviderConfig) -> Self {
        let waiter = ActionWaiter::new(config.poll_config());
        let resources = all_resources()
            .into_iter()
            .map(|r| (r.type_name(), r))
            .collect();
        let data_sources = all_data_sources()
            .into_iter()
            .map(|d| (d.type_name(), d))
            .collect();

        tracing::debug!(?config, "Provider configured");
        Self {
            client,
            config,
            waiter,
            resources,
            data_sources,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn resource_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.resources.keys().copied()
    }

    pub fn data_source_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.data_sources.keys().copied()
    }

    fn resource(&self, type_name: &str) -> Result<&dyn Resource> {
        self.resources
            .get(type_name)
            .map(|r| r.as_ref())
            .ok_or_else(|| ProviderError::UnknownType(type_name.to_string()))
    }

    fn data_source(&self, type_name: &str) -> Result<&dyn DataSource> {
        self.data_sources
            .get(type_name)
            .map(|d| d.as_ref())
            .ok_or_else(|| ProviderError::UnknownType(type_name.to_string()))
    }

    fn context<'a>(&'a self, cancel: &'a CancellationToken) -> Context<'a> {
        Context {
            client: &self.client,
            waiter: &self.waiter,
            cancel,
        }
    }

    pub fn schema_version(&self, type_name: &str) -> Option<u32> {
        self.resources.get(type_name).map(|r| r.schema_version())
    }

    /// Whether a plan may ignore the change of `attribute` from `old` to `new`
    pub fn diff_suppressed(&self, type_name: &str, attribute: &str, old: &str, new: &str) -> bool {
        self.resources
            .get(type_name)
            .is_some_and(|r| r.suppress_diff(attribute, old, new))
    }

    /// Whether changing `attribute` forces a new resource
    pub fn requires_replace(&self, type_name: &str, attribute: &str) -> bool {
        self.resources
            .get(type_name)
            .is_some_and(|r| r.replace_on_change().iter().any(|a| *a == attribute))
    }

    pub async fn create(
        &self,
        type_name: &str,
        data: &mut ResourceData,
        cancel: &CancellationToken,
    ) -> Diagnostics {
        self.run(Operation::Create, type_name, data, cancel).await
    }

    pub async fn read(
        &self,
        type_name: &str,
        data: &mut ResourceData,
        cancel: &CancellationToken,
    ) -> Diagnostics {
        self.run(Operation::Read, type_name, data, cancel).await
    }

    pub async fn update(
        &self,
        type_name: &str,
        data: &mut ResourceData,
        cancel: &CancellationToken,
    ) -> Diagnostics {
        self.run(Operation::Update, type_name, data, cancel).await
    }

    pub async fn delete(
        &self,
        type_name: &str,
        data: &mut ResourceData,
        cancel: &CancellationToken,
    ) -> Diagnostics {
        self.run(Operation::Delete, type_name, data, cancel).await
    }

    /// Adopt the remote object `id` into a fresh [`ResourceData`]
    pub async fn import(
        &self,
        type_name: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> (ResourceData, Diagnostics) {
        let mut data = ResourceData::default().with_id(id);
        let diags = self.run(Operation::Import, type_name, &mut data, cancel).await;
        (data, diags)
    }

    pub async fn read_data_source(
        &self,
        type_name: &str,
        data: &mut ResourceData,
        cancel: &CancellationToken,
    ) -> Diagnostics {
        let result = match self.data_source(type_name) {
            Ok(source) => source.read(&self.context(cancel), data).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                tracing::debug!(type_name, id = %data.id, "Read data source");
                Diagnostics::new()
            }
            Err(e) => {
                tracing::warn!(type_name, error = %e, "Data source read failed");
                error_to_diag(&e)
            }
        }
    }

    async fn run(
        &self,
        op: Operation,
        type_name: &str,
        data: &mut ResourceData,
        cancel: &CancellationToken,
    ) -> Diagnostics {
        let resource = match self.resource(type_name) {
            Ok(resource) => resource,
            Err(e) => return error_to_diag(&e),
        };
        let ctx = self.context(cancel);

        let result = match op {
            Operation::Create => resource.create(&ctx, data).await,
            Operation::Read => resource.read(&ctx, data).await,
            Operation::Update => resource.update(&ctx, data).await,
            Operation::Delete => resource.delete(&ctx, data).await,
            Operation::Import => resource.import(&ctx, data).await,
        };

        match result {
            Ok(()) => {
                if matches!(op, Operation::Create | Operation::Update) && !data.is_absent() {
                    data.fill_from_config();
                }
                tracing::info!(type_name, op = op.as_str(), id = %data.id, "Operation complete");
                Diagnostics::new()
            }
            Err(e) => {
                tracing::warn!(type_name, op = op.as_str(), id = %data.id, error = %e, "Operation failed");
                error_to_diag(&e)
            }
        }
    }

    /// Bring stored attributes written at `version` up to the current schema
    pub fn upgrade_state(&self, type_name: &str, version: u32, raw: &mut Attributes) -> Diagnostics {
        let resource = match self.resource(type_name) {
            Ok(resource) => resource,
            Err(e) => return error_to_diag(&e),
        };
        match StateUpgrader::upgrade(
            resource.state_upgraders(),
            resource.schema_version(),
            version,
            raw.clone(),
        ) {
            Ok(upgraded) => {
                *raw = upgraded;
                Diagnostics::new()
            }
            Err(e) => error_to_diag(&e),
        }
    }

    /// Upgrade every stored resource whose schema version is behind
    ///
    /// Entries that fail to upgrade are left untouched and reported.
    pub fn migrate_snapshot(&self, snapshot: &mut StateSnapshot) -> Diagnostics {
        let mut diags = Diagnostics::new();
        let mut migrated = 0;

        for (key, stored) in snapshot.resources.iter_mut() {
            let Some(current) = self.schema_version(&stored.resource_type) else {
                diags.push(Diagnostic::warning(format!(
                    "skipping {}: unknown resource type {}",
                    key, stored.resource_type
                )));
                continue;
            };
            if stored.schema_version >= current {
                continue;
            }

            let mut attributes = stored.attributes.clone();
            let result = self.upgrade_state(&stored.resource_type, stored.schema_version, &mut attributes);
            if result.has_error() {
                for d in result.iter() {
                    diags.push(Diagnostic::error(format!("{}: {}", key, d.summary)));
                }
                continue;
            }

            tracing::info!(key = %key, from = stored.schema_version, to = current, "Migrated stored state");
            stored.attributes = attributes;
            stored.schema_version = current;
            stored.updated_at = chrono::Utc::now();
            migrated += 1;
        }

        if migrated > 0 {
            snapshot.updated_at = chrono::Utc::now();
        }
        diags
    }
}
