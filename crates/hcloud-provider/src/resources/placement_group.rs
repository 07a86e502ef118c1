//! Placement groups

use crate::error::{ProviderError, Result};
use crate::reconcile::{reconcile_id, reconcile_lookup, reconcile_mutation};
use crate::resource::{
    Context, DataSource, Query, Resource, check_labels, exactly_one, list_id, list_opts, no_match,
};
use crate::state::ResourceData;
use async_trait::async_trait;
use hcloud_api::{
    ListOpts, PlacementGroup, PlacementGroupCreateOpts, PlacementGroupType, PlacementGroupUpdateOpts,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const KIND: &str = "placement group";

#[derive(Debug, Clone, Deserialize)]
pub struct PlacementGroupConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub group_type: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl PlacementGroupConfig {
    fn group_type(&self) -> Result<PlacementGroupType> {
        self.group_type.parse().map_err(ProviderError::InvalidConfig)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlacementGroupState {
    pub id: i64,
    pub name: String,
    pub labels: HashMap<String, String>,
    #[serde(rename = "type")]
    pub group_type: String,
    pub servers: Vec<i64>,
}

impl From<&PlacementGroup> for PlacementGroupState {
    fn from(group: &PlacementGroup) -> Self {
        let mut servers = group.servers.clone();
        servers.sort_unstable();
        Self {
            id: group.id,
            name: group.name.clone(),
            labels: group.labels.clone(),
            group_type: group.group_type.to_string(),
            servers,
        }
    }
}

pub struct PlacementGroupResource;

#[async_trait]
impl Resource for PlacementGroupResource {
    fn type_name(&self) -> &'static str {
        "hcloud_placement_group"
    }

    async fn create(&self, ctx: &Context<'_>, data: &mut ResourceData) -> Result<()> {
        let config: PlacementGroupConfig = data.decode_config()?;
        let group_type = config.group_type()?;
        check_labels(&config.labels)?;

        let opts = PlacementGroupCreateOpts {
            name: config.name,
            group_type,
            labels: (!config.labels.is_empty()).then_some(config.labels),
        };
        let result = ctx.client.create_placement_group(&opts).await?;
        data.set_id(result.placement_group.id);
        tracing::info!(id = result.placement_group.id, name = %opts.name, "Created placement group");

        ctx.wait(result.action.as_ref()).await?;
        self.read(ctx, data).await
    }

    async fn read(&self, ctx: &Context<'_>, data: &mut ResourceData) -> Result<()> {
        let Some(id) = reconcile_id(data, KIND) else {
            return Ok(());
        };
        let found = ctx.client.get_placement_group(id).await;
        let Some(group) = reconcile_lookup(data, KIND, found)? else {
            return Ok(());
        };
        data.set_state(&PlacementGroupState::from(&group))
    }

    async fn update(&self, ctx: &Context<'_>, data: &mut ResourceData) -> Result<()> {
        let config: PlacementGroupConfig = data.decode_config()?;
        check_labels(&config.labels)?;

        let Some(id) = reconcile_id(data, KIND) else {
            return Ok(());
        };
        let found = ctx.client.get_placement_group(id).await;
        if reconcile_lookup(data, KIND, found)?.is_none() {
            return Ok(());
        }

        if data.has_change("name") {
            let opts = PlacementGroupUpdateOpts {
                name: Some(config.name.clone()),
                ..Default::default()
            };
            let updated = ctx.client.update_placement_group(id, &opts).await;
            if reconcile_mutation(data, KIND, updated)?.is_none() {
                return Ok(());
            }
        }

        if data.has_change("labels") {
            let opts = PlacementGroupUpdateOpts {
                labels: Some(config.labels.clone()),
                ..Default::default()
            };
            let updated = ctx.client.update_placement_group(id, &opts).await;
            if reconcile_mutation(data, KIND, updated)?.is_none() {
                return Ok(());
            }
        }

        self.read(ctx, data).await
    }

    async fn delete(&self, ctx: &Context<'_>, data: &mut ResourceData) -> Result<()> {
        let Some(id) = reconcile_id(data, KIND) else {
            return Ok(());
        };
        let deleted = ctx.client.delete_placement_group(id).await;
        if reconcile_mutation(data, KIND, deleted)?.is_some() {
            tracing::info!(id, "Deleted placement group");
            data.clear();
        }
        Ok(())
    }
}

pub struct PlacementGroupDataSource;

#[async_trait]
impl DataSource for PlacementGroupDataSource {
    fn type_name(&self) -> &'static str {
        "hcloud_placement_group"
    }

    async fn read(&self, ctx: &Context<'_>, data: &mut ResourceData) -> Result<()> {
        let group = match Query::from_data(data, KIND)? {
            Query::Id(id) => ctx.client.get_placement_group(id).await?,
            Query::Name(name) => ctx.client.get_placement_group_by_name(&name).await?,
            Query::Selector(selector) => {
                let found = ctx
                    .client
                    .list_placement_groups(&ListOpts::with_selector(selector))
                    .await?;
                Some(exactly_one(KIND, found)?)
            }
        }
        .ok_or_else(|| no_match(KIND))?;

        data.set_id(group.id);
        data.set_state(&PlacementGroupState::from(&group))
    }
}

#[derive(Serialize)]
struct PlacementGroupList {
    placement_groups: Vec<PlacementGroupState>,
}

pub struct PlacementGroupListDataSource;

#[async_trait]
impl DataSource for PlacementGroupListDataSource {
    fn type_name(&self) -> &'static str {
        "hcloud_placement_groups"
    }

    async fn read(&self, ctx: &Context<'_>, data: &mut ResourceData) -> Result<()> {
        let groups = ctx.client.list_placement_groups(&list_opts(data)?).await?;
        data.id = list_id(groups.iter().map(|g| g.id));
        data.set_state(&PlacementGroupList {
            placement_groups: groups.iter().map(PlacementGroupState::from).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeCloud, Harness, attributes};
    use serde_json::json;

    fn config() -> ResourceData {
        ResourceData::new(attributes(json!({
            "name": "my-group",
            "type": "spread",
            "labels": {"env": "test"},
        })))
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_and_read() {
        let h = Harness::new(FakeCloud::new());
        let mut data = config();

        PlacementGroupResource.create(&h.ctx(), &mut data).await.unwrap();

        assert!(!data.is_absent());
        assert_eq!(data.state["name"], "my-group");
        assert_eq!(data.state["type"], "spread");
        assert_eq!(data.state["servers"], json!([]));
        assert_eq!(h.cloud.count("create_placement_group"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_type_is_rejected_locally() {
        let h = Harness::new(FakeCloud::new());
        let mut data = ResourceData::new(attributes(json!({"name": "g", "type": "cluster"})));

        let err = PlacementGroupResource.create(&h.ctx(), &mut data).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid configuration: cluster is not a valid placement group type"
        );
        assert!(h.cloud.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_only_changed_groups() {
        let h = Harness::new(FakeCloud::new());
        let mut data = config();
        PlacementGroupResource.create(&h.ctx(), &mut data).await.unwrap();
        h.cloud.reset_calls();

        data.config = attributes(json!({
            "name": "renamed",
            "type": "spread",
            "labels": {"env": "test"},
        }));
        PlacementGroupResource.update(&h.ctx(), &mut data).await.unwrap();

        assert_eq!(h.cloud.count("update_placement_group"), 1);
        assert_eq!(data.state["name"], "renamed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_gone_group_succeeds() {
        let h = Harness::new(FakeCloud::new());
        let mut data = config();
        PlacementGroupResource.create(&h.ctx(), &mut data).await.unwrap();
        let id: i64 = data.id.parse().unwrap();
        h.cloud.remove_placement_group(id);

        PlacementGroupResource.delete(&h.ctx(), &mut data).await.unwrap();
        assert!(data.is_absent());
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_data_source() {
        let h = Harness::new(FakeCloud::new());
        for name in ["a", "b"] {
            let mut data = ResourceData::new(attributes(json!({
                "name": name,
                "type": "spread",
                "labels": {"team": name},
            })));
            PlacementGroupResource.create(&h.ctx(), &mut data).await.unwrap();
        }

        let mut query = ResourceData::new(attributes(json!({"with_selector": "team=b"})));
        PlacementGroupListDataSource.read(&h.ctx(), &mut query).await.unwrap();
        let groups = query.state["placement_groups"].as_array().unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0]["name"], "b");

        let mut all = ResourceData::default();
        PlacementGroupListDataSource.read(&h.ctx(), &mut all).await.unwrap();
        assert_eq!(all.state["placement_groups"].as_array().unwrap().len(), 2);
    }
}
