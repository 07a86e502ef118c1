//! Floating IPs

use crate::error::{ProviderError, Result};
use crate::reconcile::{reconcile_id, reconcile_lookup, reconcile_mutation};
use crate::resource::{
    Context, DataSource, Query, Resource, check_labels, exactly_one, list_id, list_opts, no_match,
};
use crate::state::ResourceData;
use async_trait::async_trait;
use hcloud_api::{FloatingIp, FloatingIpCreateOpts, FloatingIpType, FloatingIpUpdateOpts, ListOpts};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const KIND: &str = "floating ip";

#[derive(Debug, Clone, Deserialize)]
pub struct FloatingIpConfig {
    #[serde(rename = "type")]
    pub ip_type: String,
    #[serde(default)]
    pub home_location: Option<String>,
    #[serde(default)]
    pub server_id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub delete_protection: bool,
}

impl FloatingIpConfig {
    fn validate(&self) -> Result<FloatingIpType> {
        let ip_type = self.ip_type.parse().map_err(ProviderError::InvalidConfig)?;
        if self.home_location.is_none() && self.server_id.is_none() {
            return Err(ProviderError::InvalidConfig(
                "either home_location or server_id must be set".to_string(),
            ));
        }
        check_labels(&self.labels)?;
        Ok(ip_type)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FloatingIpState {
    pub id: i64,
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub ip_type: String,
    pub home_location: String,
    pub server_id: Option<i64>,
    pub ip_address: String,
    /// Routed /64 network, IPv6 only
    pub ip_network: Option<String>,
    pub labels: HashMap<String, String>,
    pub delete_protection: bool,
}

impl From<&FloatingIp> for FloatingIpState {
    fn from(ip: &FloatingIp) -> Self {
        let (ip_address, ip_network) = match ip.ip.split_once('/') {
            Some((address, _)) => (address.to_string(), Some(ip.ip.clone())),
            None => (ip.ip.clone(), None),
        };
        Self {
            id: ip.id,
            name: ip.name.clone(),
            description: ip.description.clone().unwrap_or_default(),
            ip_type: ip.ip_type.to_string(),
            home_location: ip.home_location.name.clone(),
            server_id: ip.server,
            ip_address,
            ip_network,
            labels: ip.labels.clone(),
            delete_protection: ip.protection.delete,
        }
    }
}

pub struct FloatingIpResource;

#[async_trait]
impl Resource for FloatingIpResource {
    fn type_name(&self) -> &'static str {
        "hcloud_floating_ip"
    }

    fn replace_on_change(&self) -> &'static [&'static str] {
        &["type", "home_location"]
    }

    async fn create(&self, ctx: &Context<'_>, data: &mut ResourceData) -> Result<()> {
        let config: FloatingIpConfig = data.decode_config()?;
        let ip_type = config.validate()?;

        let opts = FloatingIpCreateOpts {
            ip_type,
            home_location: config.home_location,
            server: config.server_id,
            name: config.name,
            description: config.description,
            labels: (!config.labels.is_empty()).then_some(config.labels),
        };
        let result = ctx.client.create_floating_ip(&opts).await?;
        let id = result.floating_ip.id;
        data.set_id(id);
        tracing::info!(id, ip = %result.floating_ip.ip, "Created floating IP");

        ctx.wait(result.action.as_ref()).await?;

        if config.delete_protection {
            let action = ctx.client.change_floating_ip_protection(id, true).await?;
            ctx.wait(Some(&action)).await?;
        }

        self.read(ctx, data).await
    }

    async fn read(&self, ctx: &Context<'_>, data: &mut ResourceData) -> Result<()> {
        let Some(id) = reconcile_id(data, KIND) else {
            return Ok(());
        };
        let found = ctx.client.get_floating_ip(id).await;
        let Some(ip) = reconcile_lookup(data, KIND, found)? else {
            return Ok(());
        };
        data.set_state(&FloatingIpState::from(&ip))
    }

    async fn update(&self, ctx: &Context<'_>, data: &mut ResourceData) -> Result<()> {
        let config: FloatingIpConfig = data.decode_config()?;
        config.validate()?;

        let Some(id) = reconcile_id(data, KIND) else {
            return Ok(());
        };
        let found = ctx.client.get_floating_ip(id).await;
        if reconcile_lookup(data, KIND, found)?.is_none() {
            return Ok(());
        }

        let mut opts = FloatingIpUpdateOpts::default();
        if data.has_change("name") {
            opts.name = config.name.clone();
        }
        if data.has_change("description") {
            opts.description = Some(config.description.clone().unwrap_or_default());
        }
        if data.has_change("labels") {
            opts.labels = Some(config.labels.clone());
        }
        if opts.name.is_some() || opts.description.is_some() || opts.labels.is_some() {
            let updated = ctx.client.update_floating_ip(id, &opts).await;
            if reconcile_mutation(data, KIND, updated)?.is_none() {
                return Ok(());
            }
        }

        if data.has_change("server_id") {
            let changed = match config.server_id {
                Some(server) => {
                    tracing::info!(id, server, "Assigning floating IP");
                    ctx.client.assign_floating_ip(id, server).await
                }
                None => {
                    tracing::info!(id, "Unassigning floating IP");
                    ctx.client.unassign_floating_ip(id).await
                }
            };
            let Some(action) = reconcile_mutation(data, KIND, changed)? else {
                return Ok(());
            };
            ctx.wait(Some(&action)).await?;
        }

        if data.has_change("delete_protection") {
            let changed = ctx
                .client
                .change_floating_ip_protection(id, config.delete_protection)
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
        let deleted = ctx.client.delete_floating_ip(id).await;
        if reconcile_mutation(data, KIND, deleted)?.is_some() {
            tracing::info!(id, "Deleted floating IP");
            data.clear();
        }
        Ok(())
    }
}

pub struct FloatingIpDataSource;

#[async_trait]
impl DataSource for FloatingIpDataSource {
    fn type_name(&self) -> &'static str {
        "hcloud_floating_ip"
    }

    async fn read(&self, ctx: &Context<'_>, data: &mut ResourceData) -> Result<()> {
        let ip = match Query::from_data(data, KIND)? {
            Query::Id(id) => ctx.client.get_floating_ip(id).await?,
            Query::Name(name) => ctx.client.get_floating_ip_by_name(&name).await?,
            Query::Selector(selector) => {
                let found = ctx
                    .client
                    .list_floating_ips(&ListOpts::with_selector(selector))
                    .await?;
                Some(exactly_one(KIND, found)?)
            }
        }
        .ok_or_else(|| no_match(KIND))?;

        data.set_id(ip.id);
        data.set_state(&FloatingIpState::from(&ip))
    }
}

#[derive(Serialize)]
struct FloatingIpList {
    floating_ips: Vec<FloatingIpState>,
}

pub struct FloatingIpListDataSource;

#[async_trait]
impl DataSource for FloatingIpListDataSource {
    fn type_name(&self) -> &'static str {
        "hcloud_floating_ips"
    }

    async fn read(&self, ctx: &Context<'_>, data: &mut ResourceData) -> Result<()> {
        let ips = ctx.client.list_floating_ips(&list_opts(data)?).await?;
        data.id = list_id(ips.iter().map(|ip| ip.id));
        data.set_state(&FloatingIpList {
            floating_ips: ips.iter().map(FloatingIpState::from).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeCloud, Harness, attributes};
    use hcloud_api::{ApiError, ErrorCode, HcloudError};
    use serde_json::json;

    fn ipv4() -> ResourceData {
        ResourceData::new(attributes(json!({
            "type": "ipv4",
            "home_location": "hel1",
            "name": "public",
            "description": "frontend",
        })))
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_ipv6_exposes_network() {
        let h = Harness::new(FakeCloud::new());
        let mut data = ResourceData::new(attributes(json!({
            "type": "ipv6",
            "home_location": "fsn1",
        })));

        FloatingIpResource.create(&h.ctx(), &mut data).await.unwrap();

        let network = data.state["ip_network"].as_str().unwrap();
        assert!(network.ends_with("/64"));
        assert_eq!(
            data.state["ip_address"].as_str().unwrap(),
            network.trim_end_matches("/64")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_type() {
        let h = Harness::new(FakeCloud::new());
        let mut data = ResourceData::new(attributes(json!({"type": "ipv5", "home_location": "fsn1"})));

        let err = FloatingIpResource.create(&h.ctx(), &mut data).await.unwrap_err();
        assert!(err.to_string().contains("ipv5 is not a valid floating IP type"));
        assert!(h.cloud.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_batches_attributes_and_assigns() {
        let h = Harness::new(FakeCloud::new());
        let mut data = ipv4();
        FloatingIpResource.create(&h.ctx(), &mut data).await.unwrap();
        h.cloud.reset_calls();

        data.config = attributes(json!({
            "type": "ipv4",
            "home_location": "hel1",
            "name": "renamed",
            "description": "backend",
            "server_id": 9,
        }));
        FloatingIpResource.update(&h.ctx(), &mut data).await.unwrap();

        assert_eq!(h.cloud.count("update_floating_ip"), 1);
        assert_eq!(h.cloud.count("assign_floating_ip"), 1);
        assert_eq!(data.state["server_id"], 9);
        assert_eq!(data.state["description"], "backend");

        h.cloud.reset_calls();
        data.config.remove("server_id");
        FloatingIpResource.update(&h.ctx(), &mut data).await.unwrap();
        assert_eq!(h.cloud.count("unassign_floating_ip"), 1);
        assert!(data.state["server_id"].is_null());
    }

    #[tokio::test(start_paused = true)]
    async fn test_protected_delete_is_a_hard_error() {
        let h = Harness::new(FakeCloud::new());
        let mut data = ipv4();
        data.config.insert("delete_protection".to_string(), json!(true));
        FloatingIpResource.create(&h.ctx(), &mut data).await.unwrap();

        let err = FloatingIpResource.delete(&h.ctx(), &mut data).await.unwrap_err();
        assert!(matches!(err, ProviderError::Api(ref api) if api.code == ErrorCode::Protected));
        assert!(!data.is_absent());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_on_read_keeps_state() {
        let h = Harness::new(FakeCloud::new());
        let mut data = ipv4();
        FloatingIpResource.create(&h.ctx(), &mut data).await.unwrap();
        let id = data.id.clone();

        h.cloud
            .fail_next("get_floating_ip", HcloudError::transport("connection reset"));
        let err = FloatingIpResource.read(&h.ctx(), &mut data).await.unwrap_err();
        assert!(matches!(err, ProviderError::Transport(_)));
        assert_eq!(data.id, id);

        h.cloud.fail_next(
            "get_floating_ip",
            HcloudError::Api(ApiError::new(ErrorCode::NotFound, "gone")),
        );
        FloatingIpResource.read(&h.ctx(), &mut data).await.unwrap();
        assert!(data.is_absent());
    }

    #[tokio::test(start_paused = true)]
    async fn test_data_source_by_selector() {
        let h = Harness::new(FakeCloud::new());
        let seeded = h.cloud.seed_floating_ip("lb", &[("role", "lb")]);
        h.cloud.seed_floating_ip("other", &[("role", "web")]);

        let mut query = ResourceData::new(attributes(json!({"with_selector": "role=lb"})));
        FloatingIpDataSource.read(&h.ctx(), &mut query).await.unwrap();
        assert_eq!(query.id, seeded.id.to_string());
        assert_eq!(query.state["ip_address"], seeded.ip);

        let mut none = ResourceData::new(attributes(json!({"with_selector": "role=db"})));
        let err = FloatingIpDataSource.read(&h.ctx(), &mut none).await.unwrap_err();
        assert_eq!(err.to_string(), "no floating ip found");
    }
}
