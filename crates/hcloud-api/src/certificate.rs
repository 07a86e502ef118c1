//! Certificates (uploaded and managed TLS certificates)

use crate::action::Action;
use crate::client::{Client, ListOpts};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    pub id: i64,
    pub name: String,

    #[serde(default)]
    pub labels: HashMap<String, String>,

    #[serde(rename = "type")]
    pub certificate_type: CertificateType,

    /// PEM encoded certificate chain, empty until a managed certificate is issued
    #[serde(default)]
    pub certificate: Option<String>,

    pub created: DateTime<Utc>,

    #[serde(default)]
    pub not_valid_before: Option<DateTime<Utc>>,

    #[serde(default)]
    pub not_valid_after: Option<DateTime<Utc>>,

    #[serde(default)]
    pub domain_names: Vec<String>,

    #[serde(default)]
    pub fingerprint: Option<String>,

    #[serde(default)]
    pub status: Option<CertificateStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateType {
    Uploaded,
    Managed,
}

impl std::fmt::Display for CertificateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CertificateType::Uploaded => write!(f, "uploaded"),
            CertificateType::Managed => write!(f, "managed"),
        }
    }
}

/// Issuance state of a managed certificate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateStatus {
    #[serde(default)]
    pub issuance: Option<String>,
    #[serde(default)]
    pub renewal: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CertificateCreateOpts {
    pub name: String,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub certificate_type: Option<CertificateType>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_names: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CertificateUpdateOpts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

/// Response of a create call; managed certificates come with an issuance action
#[derive(Debug, Clone, Deserialize)]
pub struct CertificateCreateResult {
    pub certificate: Certificate,
    #[serde(default)]
    pub action: Option<Action>,
}

#[async_trait]
pub trait CertificateApi: Send + Sync {
    async fn get_certificate(&self, id: i64) -> Result<Option<Certificate>>;

    async fn list_certificates(&self, opts: &ListOpts) -> Result<Vec<Certificate>>;

    async fn create_certificate(&self, opts: &CertificateCreateOpts) -> Result<CertificateCreateResult>;

    async fn update_certificate(&self, id: i64, opts: &CertificateUpdateOpts) -> Result<Certificate>;

    async fn delete_certificate(&self, id: i64) -> Result<()>;

    async fn get_certificate_by_name(&self, name: &str) -> Result<Option<Certificate>> {
        let certificates = self.list_certificates(&ListOpts::with_name(name)).await?;
        Ok(certificates.into_iter().next())
    }
}

#[derive(Debug, Deserialize)]
struct CertificateResponse {
    certificate: Certificate,
}

#[async_trait]
impl CertificateApi for Client {
    async fn get_certificate(&self, id: i64) -> Result<Option<Certificate>> {
        let response: Option<CertificateResponse> =
            self.get_optional(&format!("/certificates/{}", id)).await?;
        Ok(response.map(|r| r.certificate))
    }

    async fn list_certificates(&self, opts: &ListOpts) -> Result<Vec<Certificate>> {
        self.list_all("/certificates", "certificates", opts).await
    }

    async fn create_certificate(&self, opts: &CertificateCreateOpts) -> Result<CertificateCreateResult> {
        tracing::info!("Creating certificate {}", opts.name);
        self.post("/certificates", opts).await
    }

    async fn update_certificate(&self, id: i64, opts: &CertificateUpdateOpts) -> Result<Certificate> {
        let response: CertificateResponse = self.put(&format!("/certificates/{}", id), opts).await?;
        Ok(response.certificate)
    }

    async fn delete_certificate(&self, id: i64) -> Result<()> {
        tracing::info!("Deleting certificate {}", id);
        self.delete(&format!("/certificates/{}", id)).await
    }
}
