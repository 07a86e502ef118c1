//! Actions: asynchronous operations tracked by the API

use crate::client::Client;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An asynchronous operation triggered by a mutating API call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: i64,

    #[serde(default)]
    pub command: String,

    pub status: ActionStatus,

    #[serde(default)]
    pub progress: u8,

    pub started: DateTime<Utc>,

    #[serde(default)]
    pub finished: Option<DateTime<Utc>>,

    #[serde(default)]
    pub resources: Vec<ActionResource>,

    #[serde(default)]
    pub error: Option<ActionError>,
}

impl Action {
    pub fn is_terminal(&self) -> bool {
        self.status != ActionStatus::Running
    }
}

/// Status of an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Running,
    Success,
    Error,
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionStatus::Running => write!(f, "running"),
            ActionStatus::Success => write!(f, "success"),
            ActionStatus::Error => write!(f, "error"),
        }
    }
}

/// Resource an action operates on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResource {
    pub id: i64,
    #[serde(rename = "type")]
    pub resource_type: String,
}

/// Error reported by a failed action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionError {
    pub code: String,
    pub message: String,
}

/// Action lookups
#[async_trait]
pub trait ActionApi: Send + Sync {
    /// Fetch an action by ID, `None` if it does not exist
    async fn get_action(&self, id: i64) -> Result<Option<Action>>;
}

#[derive(Debug, Deserialize)]
pub(crate) struct ActionResponse {
    pub action: Action,
}

#[async_trait]
impl ActionApi for Client {
    async fn get_action(&self, id: i64) -> Result<Option<Action>> {
        let response: Option<ActionResponse> = self.get_optional(&format!("/actions/{}", id)).await?;
        Ok(response.map(|r| r.action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientConfig;

    #[test]
    fn test_decode_action() {
        let body = r#"{
            "id": 13,
            "command": "create_certificate",
            "status": "error",
            "progress": 100,
            "started": "2016-01-30T23:55:00+00:00",
            "finished": "2016-01-30T23:56:00+00:00",
            "resources": [{"id": 42, "type": "certificate"}],
            "error": {"code": "action_failed", "message": "Action failed"}
        }"#;
        let action: Action = serde_json::from_str(body).unwrap();
        assert_eq!(action.status, ActionStatus::Error);
        assert!(action.is_terminal());
        assert_eq!(action.resources[0].resource_type, "certificate");
        assert_eq!(action.error.unwrap().code, "action_failed");
    }

    #[tokio::test]
    async fn test_get_action() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/actions/13")
            .with_body(
                r#"{"action":{"id":13,"command":"attach_volume","status":"running","progress":20,"started":"2016-01-30T23:55:00+00:00","finished":null,"resources":[]}}"#,
            )
            .create_async()
            .await;

        let client = Client::new(ClientConfig::new("token").with_endpoint(server.url())).unwrap();
        let action = client.get_action(13).await.unwrap().unwrap();
        assert_eq!(action.status, ActionStatus::Running);
        assert_eq!(action.progress, 20);
        assert!(action.finished.is_none());
    }
}
