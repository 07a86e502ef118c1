//! Floating IPs

use crate::action::{Action, ActionResponse};
use crate::client::{Client, ListOpts};
use crate::error::Result;
use crate::volume::{Location, Protection};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloatingIp {
    pub id: i64,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Address, or the /64 network for IPv6
    pub ip: String,

    #[serde(rename = "type")]
    pub ip_type: FloatingIpType,

    #[serde(default)]
    pub server: Option<i64>,

    pub home_location: Location,

    #[serde(default)]
    pub blocked: bool,

    #[serde(default)]
    pub protection: Protection,

    #[serde(default)]
    pub labels: HashMap<String, String>,

    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FloatingIpType {
    Ipv4,
    Ipv6,
}

impl std::fmt::Display for FloatingIpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FloatingIpType::Ipv4 => write!(f, "ipv4"),
            FloatingIpType::Ipv6 => write!(f, "ipv6"),
        }
    }
}

impl std::str::FromStr for FloatingIpType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ipv4" => Ok(FloatingIpType::Ipv4),
            "ipv6" => Ok(FloatingIpType::Ipv6),
            other => Err(format!("{} is not a valid floating IP type", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FloatingIpCreateOpts {
    #[serde(rename = "type")]
    pub ip_type: FloatingIpType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub home_location: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FloatingIpUpdateOpts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FloatingIpCreateResult {
    pub floating_ip: FloatingIp,
    #[serde(default)]
    pub action: Option<Action>,
}

#[async_trait]
pub trait FloatingIpApi: Send + Sync {
    async fn get_floating_ip(&self, id: i64) -> Result<Option<FloatingIp>>;

    async fn list_floating_ips(&self, opts: &ListOpts) -> Result<Vec<FloatingIp>>;

    async fn create_floating_ip(&self, opts: &FloatingIpCreateOpts) -> Result<FloatingIpCreateResult>;

    async fn update_floating_ip(&self, id: i64, opts: &FloatingIpUpdateOpts) -> Result<FloatingIp>;

    async fn delete_floating_ip(&self, id: i64) -> Result<()>;

    async fn assign_floating_ip(&self, id: i64, server: i64) -> Result<Action>;

    async fn unassign_floating_ip(&self, id: i64) -> Result<Action>;

    async fn change_floating_ip_protection(&self, id: i64, delete: bool) -> Result<Action>;

    async fn get_floating_ip_by_name(&self, name: &str) -> Result<Option<FloatingIp>> {
        let ips = self.list_floating_ips(&ListOpts::with_name(name)).await?;
        Ok(ips.into_iter().next())
    }
}

#[derive(Debug, Deserialize)]
struct FloatingIpResponse {
    floating_ip: FloatingIp,
}

#[async_trait]
impl FloatingIpApi for Client {
    async fn get_floating_ip(&self, id: i64) -> Result<Option<FloatingIp>> {
        let response: Option<FloatingIpResponse> =
            self.get_optional(&format!("/floating_ips/{}", id)).await?;
        Ok(response.map(|r| r.floating_ip))
    }

    async fn list_floating_ips(&self, opts: &ListOpts) -> Result<Vec<FloatingIp>> {
        self.list_all("/floating_ips", "floating_ips", opts).await
    }

    async fn create_floating_ip(&self, opts: &FloatingIpCreateOpts) -> Result<FloatingIpCreateResult> {
        tracing::info!("Creating {} floating IP", opts.ip_type);
        self.post("/floating_ips", opts).await
    }

    async fn update_floating_ip(&self, id: i64, opts: &FloatingIpUpdateOpts) -> Result<FloatingIp> {
        let response: FloatingIpResponse = self.put(&format!("/floating_ips/{}", id), opts).await?;
        Ok(response.floating_ip)
    }

    async fn delete_floating_ip(&self, id: i64) -> Result<()> {
        tracing::info!("Deleting floating IP {}", id);
        self.delete(&format!("/floating_ips/{}", id)).await
    }

    async fn assign_floating_ip(&self, id: i64, server: i64) -> Result<Action> {
        tracing::info!("Assigning floating IP {} to server {}", id, server);
        let response: ActionResponse = self
            .post(
                &format!("/floating_ips/{}/actions/assign", id),
                &serde_json::json!({ "server": server }),
            )
            .await?;
        Ok(response.action)
    }

    async fn unassign_floating_ip(&self, id: i64) -> Result<Action> {
        tracing::info!("Unassigning floating IP {}", id);
        let response: ActionResponse = self
            .post(&format!("/floating_ips/{}/actions/unassign", id), &serde_json::json!({}))
            .await?;
        Ok(response.action)
    }

    async fn change_floating_ip_protection(&self, id: i64, delete: bool) -> Result<Action> {
        let response: ActionResponse = self
            .post(
                &format!("/floating_ips/{}/actions/change_protection", id),
                &serde_json::json!({ "delete": delete }),
            )
            .await?;
        Ok(response.action)
    }
}
