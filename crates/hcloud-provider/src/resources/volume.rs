//! Block storage volumes

use crate::error::{ProviderError, Result};
use crate::reconcile::{reconcile_id, reconcile_lookup, reconcile_mutation};
use crate::resource::{
    Context, DataSource, Query, Resource, check_labels, exactly_one, list_id, list_opts, no_match,
};
use crate::state::ResourceData;
use async_trait::async_trait;
use hcloud_api::{ListOpts, Volume, VolumeCreateOpts, VolumeUpdateOpts};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const KIND: &str = "volume";
const MIN_SIZE: u32 = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct VolumeConfig {
    pub name: String,
    /// Size in GB
    pub size: u32,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub server_id: Option<i64>,
    #[serde(default)]
    pub automount: Option<bool>,
    /// Filesystem to format the volume with (`xfs` or `ext4`)
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub delete_protection: bool,
}

impl VolumeConfig {
    fn validate(&self) -> Result<()> {
        if self.size < MIN_SIZE {
            return Err(ProviderError::InvalidConfig(format!(
                "volume size must be at least {} GB, got {}",
                MIN_SIZE, self.size
            )));
        }
        if self.location.is_none() && self.server_id.is_none() {
            return Err(ProviderError::InvalidConfig(
                "either location or server_id must be set".to_string(),
            ));
        }
        if let Some(format) = self.format.as_deref().filter(|f| !matches!(*f, "xfs" | "ext4")) {
            return Err(ProviderError::InvalidConfig(format!(
                "{} is not a valid volume format",
                format
            )));
        }
        check_labels(&self.labels)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VolumeState {
    pub id: i64,
    pub name: String,
    pub size: u32,
    pub location: String,
    pub server_id: Option<i64>,
    pub linux_device: String,
    pub labels: HashMap<String, String>,
    pub delete_protection: bool,
}

impl From<&Volume> for VolumeState {
    fn from(volume: &Volume) -> Self {
        Self {
            id: volume.id,
            name: volume.name.clone(),
            size: volume.size,
            location: volume.location.name.clone(),
            server_id: volume.server,
            linux_device: volume.linux_device.clone().unwrap_or_default(),
            labels: volume.labels.clone(),
            delete_protection: volume.protection.delete,
        }
    }
}

pub struct VolumeResource;

impl VolumeResource {
    /// Detach from the current server, if any; `false` if the volume vanished
    async fn detach(&self, ctx: &Context<'_>, data: &mut ResourceData, volume: &Volume) -> Result<bool> {
        let Some(server) = volume.server else {
            return Ok(true);
        };
        tracing::info!(id = volume.id, server, "Detaching volume");
        let detached = ctx.client.detach_volume(volume.id).await;
        let Some(action) = reconcile_mutation(data, KIND, detached)? else {
            return Ok(false);
        };
        ctx.wait(Some(&action)).await?;
        Ok(true)
    }
}

#[async_trait]
impl Resource for VolumeResource {
    fn type_name(&self) -> &'static str {
        "hcloud_volume"
    }

    fn replace_on_change(&self) -> &'static [&'static str] {
        &["location", "format"]
    }

    async fn create(&self, ctx: &Context<'_>, data: &mut ResourceData) -> Result<()> {
        let config: VolumeConfig = data.decode_config()?;
        config.validate()?;

        let opts = VolumeCreateOpts {
            name: config.name,
            size: config.size,
            location: config.location,
            server: config.server_id,
            automount: config.server_id.and(config.automount),
            format: config.format,
            labels: (!config.labels.is_empty()).then_some(config.labels),
        };
        let result = ctx.client.create_volume(&opts).await?;
        let id = result.volume.id;
        data.set_id(id);
        tracing::info!(id, name = %opts.name, size = opts.size, "Created volume");

        ctx.wait_all(result.action.as_ref(), &result.next_actions).await?;

        if config.delete_protection {
            let action = ctx.client.change_volume_protection(id, true).await?;
            ctx.wait(Some(&action)).await?;
        }

        self.read(ctx, data).await
    }

    async fn read(&self, ctx: &Context<'_>, data: &mut ResourceData) -> Result<()> {
        let Some(id) = reconcile_id(data, KIND) else {
            return Ok(());
        };
        let found = ctx.client.get_volume(id).await;
        let Some(volume) = reconcile_lookup(data, KIND, found)? else {
            return Ok(());
        };
        data.set_state(&VolumeState::from(&volume))
    }

    async fn update(&self, ctx: &Context<'_>, data: &mut ResourceData) -> Result<()> {
        let config: VolumeConfig = data.decode_config()?;
        config.validate()?;

        let Some(id) = reconcile_id(data, KIND) else {
            return Ok(());
        };
        let found = ctx.client.get_volume(id).await;
        let Some(volume) = reconcile_lookup(data, KIND, found)? else {
            return Ok(());
        };

        if config.size < volume.size {
            return Err(ProviderError::InvalidConfig(format!(
                "volume size cannot be decreased from {} GB to {} GB",
                volume.size, config.size
            )));
        }

        if data.has_change("name") {
            let opts = VolumeUpdateOpts {
                name: Some(config.name.clone()),
                ..Default::default()
            };
            let updated = ctx.client.update_volume(id, &opts).await;
            if reconcile_mutation(data, KIND, updated)?.is_none() {
                return Ok(());
            }
        }

        if data.has_change("labels") {
            let opts = VolumeUpdateOpts {
                labels: Some(config.labels.clone()),
                ..Default::default()
            };
            let updated = ctx.client.update_volume(id, &opts).await;
            if reconcile_mutation(data, KIND, updated)?.is_none() {
                return Ok(());
            }
        }

        if data.has_change("server_id") {
            if !self.detach(ctx, data, &volume).await? {
                return Ok(());
            }
            if let Some(server) = config.server_id {
                tracing::info!(id, server, "Attaching volume");
                let attached = ctx.client.attach_volume(id, server, config.automount).await;
                let Some(action) = reconcile_mutation(data, KIND, attached)? else {
                    return Ok(());
                };
                ctx.wait(Some(&action)).await?;
            }
        }

        if config.size > volume.size {
            tracing::info!(id, from = volume.size, to = config.size, "Resizing volume");
            let resized = ctx.client.resize_volume(id, config.size).await;
            let Some(action) = reconcile_mutation(data, KIND, resized)? else {
                return Ok(());
            };
            ctx.wait(Some(&action)).await?;
        }

        if data.has_change("delete_protection") {
            let changed = ctx
                .client
                .change_volume_protection(id, config.delete_protection)
                .await;
            let Some(action) = reconcile_mutation(data, KIND, changed)? else {
                return Ok(());
            };
            ctx.wait(Some(&action)).await?;
        }

        self.read(ctx, data).await
    }

    async fn delete(&self, ctx: &Context<'_>, data: &mut ResourceData) -> Result<()> {
        let Some(id) = reconcile_id(data, KIND) else {
            return Ok(());
        };
        let found = ctx.client.get_volume(id).await;
        let Some(volume) = reconcile_lookup(data, KIND, found)? else {
            return Ok(());
        };

        if !self.detach(ctx, data, &volume).await? {
            return Ok(());
        }

        let deleted = ctx.client.delete_volume(id).await;
        if reconcile_mutation(data, KIND, deleted)?.is_some() {
            tracing::info!(id, "Deleted volume");
            data.clear();
        }
        Ok(())
    }
}

pub struct VolumeDataSource;

#[async_trait]
impl DataSource for VolumeDataSource {
    fn type_name(&self) -> &'static str {
        "hcloud_volume"
    }

    async fn read(&self, ctx: &Context<'_>, data: &mut ResourceData) -> Result<()> {
        let volume = match Query::from_data(data, KIND)? {
            Query::Id(id) => ctx.client.get_volume(id).await?,
            Query::Name(name) => ctx.client.get_volume_by_name(&name).await?,
            Query::Selector(selector) => {
                let found = ctx.client.list_volumes(&ListOpts::with_selector(selector)).await?;
                Some(exactly_one(KIND, found)?)
            }
        }
        .ok_or_else(|| no_match(KIND))?;

        data.set_id(volume.id);
        data.set_state(&VolumeState::from(&volume))
    }
}

#[derive(Serialize)]
struct VolumeList {
    volumes: Vec<VolumeState>,
}

pub struct VolumeListDataSource;

#[async_trait]
impl DataSource for VolumeListDataSource {
    fn type_name(&self) -> &'static str {
        "hcloud_volumes"
    }

    async fn read(&self, ctx: &Context<'_>, data: &mut ResourceData) -> Result<()> {
        let volumes = ctx.client.list_volumes(&list_opts(data)?).await?;
        data.id = list_id(volumes.iter().map(|v| v.id));
        data.set_state(&VolumeList {
            volumes: volumes.iter().map(VolumeState::from).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeCloud, Harness, attributes};
    use serde_json::json;

    fn volume_config(extra: serde_json::Value) -> ResourceData {
        let mut config = attributes(json!({
            "name": "data",
            "size": 10,
            "location": "nbg1",
        }));
        config.extend(attributes(extra));
        ResourceData::new(config)
    }

    async fn created(h: &Harness, extra: serde_json::Value) -> ResourceData {
        let mut data = volume_config(extra);
        VolumeResource.create(&h.ctx(), &mut data).await.unwrap();
        h.cloud.reset_calls();
        data
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_with_server_waits_for_attach() {
        let h = Harness::new(FakeCloud::new());
        let mut data = volume_config(json!({"server_id": 42, "location": null}));

        VolumeResource.create(&h.ctx(), &mut data).await.unwrap();

        // create_volume action plus the attach follow-up
        assert_eq!(h.cloud.count("get_action"), 2);
        assert_eq!(data.state["server_id"], 42);
        assert_eq!(data.state["location"], "fsn1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_with_protection() {
        let h = Harness::new(FakeCloud::new());
        let data = created(&h, json!({"delete_protection": true})).await;
        assert_eq!(data.state["delete_protection"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_is_validated_before_any_call() {
        let h = Harness::new(FakeCloud::new());
        let mut data = volume_config(json!({"size": 5}));

        let err = VolumeResource.create(&h.ctx(), &mut data).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidConfig(_)));
        assert!(h.cloud.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resize() {
        let h = Harness::new(FakeCloud::new());
        let mut data = created(&h, json!({})).await;

        data.config.insert("size".to_string(), json!(25));
        VolumeResource.update(&h.ctx(), &mut data).await.unwrap();

        assert_eq!(h.cloud.count("resize_volume"), 1);
        assert_eq!(data.state["size"], 25);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shrink_is_rejected() {
        let h = Harness::new(FakeCloud::new());
        let mut data = created(&h, json!({"size": 20})).await;

        data.config.insert("size".to_string(), json!(15));
        let err = VolumeResource.update(&h.ctx(), &mut data).await.unwrap_err();

        assert!(err.to_string().contains("cannot be decreased"));
        assert_eq!(h.cloud.mutations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_between_servers() {
        let h = Harness::new(FakeCloud::new());
        let mut data = created(&h, json!({"server_id": 1})).await;

        data.config.insert("server_id".to_string(), json!(2));
        VolumeResource.update(&h.ctx(), &mut data).await.unwrap();

        let calls = h.cloud.calls();
        let detach = calls.iter().position(|c| c == "detach_volume").unwrap();
        let attach = calls.iter().position(|c| c == "attach_volume").unwrap();
        assert!(detach < attach);
        assert_eq!(data.state["server_id"], 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_detaches_first() {
        let h = Harness::new(FakeCloud::new());
        let mut data = created(&h, json!({"server_id": 7})).await;
        let id: i64 = data.id.parse().unwrap();

        VolumeResource.delete(&h.ctx(), &mut data).await.unwrap();

        assert_eq!(
            h.cloud.calls(),
            vec!["get_volume", "detach_volume", "get_action", "delete_volume"]
        );
        assert!(h.cloud.volume(id).is_none());
        assert!(data.is_absent());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_of_deleted_volume_clears_state() {
        let h = Harness::new(FakeCloud::new());
        let mut data = created(&h, json!({})).await;
        h.cloud.remove_volume(data.id.parse().unwrap());

        data.config.insert("name".to_string(), json!("renamed"));
        VolumeResource.update(&h.ctx(), &mut data).await.unwrap();

        assert!(data.is_absent());
        assert_eq!(h.cloud.count("update_volume"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_selector_matching_several_volumes() {
        let h = Harness::new(FakeCloud::new());
        h.cloud.seed_volume("a", 10, &[("tier", "db")]);
        h.cloud.seed_volume("b", 10, &[("tier", "db")]);

        let mut query = ResourceData::new(attributes(json!({"with_selector": "tier=db"})));
        let err = VolumeDataSource.read(&h.ctx(), &mut query).await.unwrap_err();
        assert_eq!(err.to_string(), "more than one volume found for selector");

        let mut list = ResourceData::new(attributes(json!({"with_selector": "tier=db"})));
        VolumeListDataSource.read(&h.ctx(), &mut list).await.unwrap();
        assert_eq!(list.state["volumes"].as_array().unwrap().len(), 2);
    }
}
