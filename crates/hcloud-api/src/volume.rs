//! Block storage volumes

use crate::action::{Action, ActionResponse};
use crate::client::{Client, ListOpts};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub id: i64,
    pub name: String,

    /// Size in GB
    pub size: u32,

    /// ID of the server the volume is attached to
    #[serde(default)]
    pub server: Option<i64>,

    pub location: Location,

    #[serde(default)]
    pub linux_device: Option<String>,

    #[serde(default)]
    pub format: Option<String>,

    #[serde(default)]
    pub protection: Protection,

    #[serde(default)]
    pub labels: HashMap<String, String>,

    #[serde(default)]
    pub status: Option<String>,

    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    #[serde(default)]
    pub network_zone: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protection {
    pub delete: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VolumeCreateOpts {
    pub name: String,
    pub size: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub automount: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VolumeUpdateOpts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VolumeCreateResult {
    pub volume: Volume,
    #[serde(default)]
    pub action: Option<Action>,
    #[serde(default)]
    pub next_actions: Vec<Action>,
}

#[async_trait]
pub trait VolumeApi: Send + Sync {
    async fn get_volume(&self, id: i64) -> Result<Option<Volume>>;

    async fn list_volumes(&self, opts: &ListOpts) -> Result<Vec<Volume>>;

    async fn create_volume(&self, opts: &VolumeCreateOpts) -> Result<VolumeCreateResult>;

    async fn update_volume(&self, id: i64, opts: &VolumeUpdateOpts) -> Result<Volume>;

    async fn delete_volume(&self, id: i64) -> Result<()>;

    async fn attach_volume(&self, id: i64, server: i64, automount: Option<bool>) -> Result<Action>;

    async fn detach_volume(&self, id: i64) -> Result<Action>;

    /// Grow a volume to `size` GB
    async fn resize_volume(&self, id: i64, size: u32) -> Result<Action>;

    async fn change_volume_protection(&self, id: i64, delete: bool) -> Result<Action>;

    async fn get_volume_by_name(&self, name: &str) -> Result<Option<Volume>> {
        let volumes = self.list_volumes(&ListOpts::with_name(name)).await?;
        Ok(volumes.into_iter().next())
    }
}

#[derive(Debug, Deserialize)]
struct VolumeResponse {
    volume: Volume,
}

#[derive(Debug, Serialize)]
struct AttachRequest {
    server: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    automount: Option<bool>,
}

#[async_trait]
impl VolumeApi for Client {
    async fn get_volume(&self, id: i64) -> Result<Option<Volume>> {
        let response: Option<VolumeResponse> = self.get_optional(&format!("/volumes/{}", id)).await?;
        Ok(response.map(|r| r.volume))
    }

    async fn list_volumes(&self, opts: &ListOpts) -> Result<Vec<Volume>> {
        self.list_all("/volumes", "volumes", opts).await
    }

    async fn create_volume(&self, opts: &VolumeCreateOpts) -> Result<VolumeCreateResult> {
        tracing::info!("Creating volume {} ({} GB)", opts.name, opts.size);
        self.post("/volumes", opts).await
    }

    async fn update_volume(&self, id: i64, opts: &VolumeUpdateOpts) -> Result<Volume> {
        let response: VolumeResponse = self.put(&format!("/volumes/{}", id), opts).await?;
        Ok(response.volume)
    }

    async fn delete_volume(&self, id: i64) -> Result<()> {
        tracing::info!("Deleting volume {}", id);
        self.delete(&format!("/volumes/{}", id)).await
    }

    async fn attach_volume(&self, id: i64, server: i64, automount: Option<bool>) -> Result<Action> {
        tracing::info!("Attaching volume {} to server {}", id, server);
        let response: ActionResponse = self
            .post(
                &format!("/volumes/{}/actions/attach", id),
                &AttachRequest { server, automount },
            )
            .await?;
        Ok(response.action)
    }

    async fn detach_volume(&self, id: i64) -> Result<Action> {
        tracing::info!("Detaching volume {}", id);
        let response: ActionResponse = self
            .post(&format!("/volumes/{}/actions/detach", id), &serde_json::json!({}))
            .await?;
        Ok(response.action)
    }

    async fn resize_volume(&self, id: i64, size: u32) -> Result<Action> {
        tracing::info!("Resizing volume {} to {} GB", id, size);
        let response: ActionResponse = self
            .post(
                &format!("/volumes/{}/actions/resize", id),
                &serde_json::json!({ "size": size }),
            )
            .await?;
        Ok(response.action)
    }

    async fn change_volume_protection(&self, id: i64, delete: bool) -> Result<Action> {
        let response: ActionResponse = self
            .post(
                &format!("/volumes/{}/actions/change_protection", id),
                &serde_json::json!({ "delete": delete }),
            )
            .await?;
        Ok(response.action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientConfig;
    use mockito::Matcher;

    #[test]
    fn test_decode_detached_volume() {
        let body = r#"{
            "id": 4711,
            "name": "database-storage",
            "size": 42,
            "server": null,
            "location": {"name": "fsn1", "network_zone": "eu-central"},
            "linux_device": "/dev/disk/by-id/scsi-0HC_Volume_4711",
            "protection": {"delete": false},
            "labels": {},
            "status": "available",
            "format": "xfs",
            "created": "2016-01-30T23:50:00+00:00"
        }"#;
        let volume: Volume = serde_json::from_str(body).unwrap();
        assert!(volume.server.is_none());
        assert_eq!(volume.location.name, "fsn1");
        assert!(!volume.protection.delete);
    }

    #[tokio::test]
    async fn test_attach_volume() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/volumes/4711/actions/attach")
            .match_body(Matcher::Json(serde_json::json!({"server": 42, "automount": true})))
            .with_status(201)
            .with_body(r#"{"action":{"id":7,"command":"attach_volume","status":"running","progress":0,"started":"2016-01-30T23:50:00+00:00","finished":null,"resources":[{"id":4711,"type":"volume"}],"error":null}}"#)
            .create_async()
            .await;

        let client = Client::new(ClientConfig::new("token").with_endpoint(server.url())).unwrap();
        let action = client.attach_volume(4711, 42, Some(true)).await.unwrap();
        assert_eq!(action.command, "attach_volume");
        mock.assert_async().await;
    }
}
