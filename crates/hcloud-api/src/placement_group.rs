//! Placement groups

use crate::action::Action;
use crate::client::{Client, ListOpts};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementGroup {
    pub id: i64,
    pub name: String,

    #[serde(default)]
    pub labels: HashMap<String, String>,

    #[serde(rename = "type")]
    pub group_type: PlacementGroupType,

    /// IDs of the servers in this group
    #[serde(default)]
    pub servers: Vec<i64>,

    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementGroupType {
    Spread,
}

impl std::fmt::Display for PlacementGroupType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlacementGroupType::Spread => write!(f, "spread"),
        }
    }
}

impl std::str::FromStr for PlacementGroupType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "spread" => Ok(PlacementGroupType::Spread),
            other => Err(format!("{} is not a valid placement group type", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlacementGroupCreateOpts {
    pub name: String,

    #[serde(rename = "type")]
    pub group_type: PlacementGroupType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PlacementGroupUpdateOpts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlacementGroupCreateResult {
    pub placement_group: PlacementGroup,
    #[serde(default)]
    pub action: Option<Action>,
}

#[async_trait]
pub trait PlacementGroupApi: Send + Sync {
    async fn get_placement_group(&self, id: i64) -> Result<Option<PlacementGroup>>;

    async fn list_placement_groups(&self, opts: &ListOpts) -> Result<Vec<PlacementGroup>>;

    async fn create_placement_group(
        &self,
        opts: &PlacementGroupCreateOpts,
    ) -> Result<PlacementGroupCreateResult>;

    async fn update_placement_group(
        &self,
        id: i64,
        opts: &PlacementGroupUpdateOpts,
    ) -> Result<PlacementGroup>;

    async fn delete_placement_group(&self, id: i64) -> Result<()>;

    async fn get_placement_group_by_name(&self, name: &str) -> Result<Option<PlacementGroup>> {
        let groups = self.list_placement_groups(&ListOpts::with_name(name)).await?;
        Ok(groups.into_iter().next())
    }
}

#[derive(Debug, Deserialize)]
struct PlacementGroupResponse {
    placement_group: PlacementGroup,
}

#[async_trait]
impl PlacementGroupApi for Client {
    async fn get_placement_group(&self, id: i64) -> Result<Option<PlacementGroup>> {
        let response: Option<PlacementGroupResponse> =
            self.get_optional(&format!("/placement_groups/{}", id)).await?;
        Ok(response.map(|r| r.placement_group))
    }

    async fn list_placement_groups(&self, opts: &ListOpts) -> Result<Vec<PlacementGroup>> {
        self.list_all("/placement_groups", "placement_groups", opts).await
    }

    async fn create_placement_group(
        &self,
        opts: &PlacementGroupCreateOpts,
    ) -> Result<PlacementGroupCreateResult> {
        tracing::info!("Creating placement group {}", opts.name);
        self.post("/placement_groups", opts).await
    }

    async fn update_placement_group(
        &self,
        id: i64,
        opts: &PlacementGroupUpdateOpts,
    ) -> Result<PlacementGroup> {
        let response: PlacementGroupResponse =
            self.put(&format!("/placement_groups/{}", id), opts).await?;
        Ok(response.placement_group)
    }

    async fn delete_placement_group(&self, id: i64) -> Result<()> {
        tracing::info!("Deleting placement group {}", id);
        self.delete(&format!("/placement_groups/{}", id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_type() {
        assert_eq!("spread".parse::<PlacementGroupType>(), Ok(PlacementGroupType::Spread));
        assert_eq!(
            "cluster".parse::<PlacementGroupType>().unwrap_err(),
            "cluster is not a valid placement group type"
        );
    }

    #[test]
    fn test_decode_placement_group() {
        let body = r#"{"id":4862,"name":"my-group","labels":{},"type":"spread","servers":[4711,4712],"created":"2019-01-08T12:10:00+00:00"}"#;
        let group: PlacementGroup = serde_json::from_str(body).unwrap();
        assert_eq!(group.servers, vec![4711, 4712]);
        assert_eq!(group.group_type, PlacementGroupType::Spread);
    }
}
