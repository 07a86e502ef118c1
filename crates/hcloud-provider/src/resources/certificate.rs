//! Uploaded and managed TLS certificates
//!
//! Both resource types share read, update and delete. They differ in how
//! the certificate is created: uploaded certificates carry their own PEM
//! and private key, managed ones are issued by the provider for a set of
//! domain names and come with an issuance action.
//!
//! Schema version 1 stores timestamps as RFC 3339; version 0 state is
//! migrated by [`crate::state::upgrade_certificate_v0`].

use crate::error::{ProviderError, Result};
use crate::reconcile::{reconcile_id, reconcile_lookup, reconcile_mutation};
use crate::resource::{
    Context, DataSource, Query, Resource, check_labels, exactly_one, list_id, list_opts, no_match,
};
use crate::state::{CERTIFICATE_UPGRADERS, ResourceData, StateUpgrader};
use crate::timeutil::format_timestamp;
use anyhow::Context as _;
use async_trait::async_trait;
use hcloud_api::{
    Certificate, CertificateCreateOpts, CertificateType, CertificateUpdateOpts, ListOpts,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const KIND: &str = "certificate";

#[derive(Debug, Clone, Deserialize)]
pub struct UploadedCertificateConfig {
    pub name: String,
    pub certificate: String,
    pub private_key: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManagedCertificateConfig {
    pub name: String,
    pub domain_names: Vec<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// Attributes shared by name and labels updates
#[derive(Debug, Clone, Deserialize)]
struct MutableConfig {
    name: String,
    #[serde(default)]
    labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CertificateState {
    pub id: i64,
    pub name: String,
    pub labels: HashMap<String, String>,
    #[serde(rename = "type")]
    pub certificate_type: String,
    pub certificate: String,
    pub domain_names: Vec<String>,
    pub fingerprint: String,
    pub created: String,
    pub not_valid_before: String,
    pub not_valid_after: String,
}

impl From<&Certificate> for CertificateState {
    fn from(cert: &Certificate) -> Self {
        Self {
            id: cert.id,
            name: cert.name.clone(),
            labels: cert.labels.clone(),
            certificate_type: cert.certificate_type.to_string(),
            certificate: cert.certificate.clone().unwrap_or_default(),
            domain_names: cert.domain_names.clone(),
            fingerprint: cert.fingerprint.clone().unwrap_or_default(),
            created: format_timestamp(&cert.created),
            not_valid_before: cert
                .not_valid_before
                .as_ref()
                .map(format_timestamp)
                .unwrap_or_default(),
            not_valid_after: cert
                .not_valid_after
                .as_ref()
                .map(format_timestamp)
                .unwrap_or_default(),
        }
    }
}

/// Whether two PEM documents hold the same DER blocks
///
/// Line wrapping and surrounding whitespace are ignored. Anything that
/// fails to decode compares unequal.
pub fn equal_cert(a: &str, b: &str) -> bool {
    match (pem_blocks(a), pem_blocks(b)) {
        (Ok(a), Ok(b)) => a == b,
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!(error = %format!("{:#}", e), "Failed to compare certificates");
            false
        }
    }
}

fn pem_blocks(raw: &str) -> anyhow::Result<Vec<Vec<u8>>> {
    let blocks = pem::parse_many(raw.as_bytes()).context("parsing PEM document")?;
    anyhow::ensure!(!blocks.is_empty(), "no PEM data found");
    Ok(blocks.iter().map(|block| block.contents().to_vec()).collect())
}

async fn create_certificate(
    ctx: &Context<'_>,
    data: &mut ResourceData,
    opts: CertificateCreateOpts,
) -> Result<()> {
    let result = ctx.client.create_certificate(&opts).await?;
    data.set_id(result.certificate.id);
    tracing::info!(
        id = result.certificate.id,
        name = %opts.name,
        kind = %result.certificate.certificate_type,
        "Created certificate"
    );
    ctx.wait(result.action.as_ref()).await?;
    read_certificate(ctx, data).await
}

async fn read_certificate(ctx: &Context<'_>, data: &mut ResourceData) -> Result<()> {
    let Some(id) = reconcile_id(data, KIND) else {
        return Ok(());
    };
    let found = ctx.client.get_certificate(id).await;
    let Some(cert) = reconcile_lookup(data, KIND, found)? else {
        return Ok(());
    };
    data.set_state(&CertificateState::from(&cert))
}

async fn update_certificate(ctx: &Context<'_>, data: &mut ResourceData) -> Result<()> {
    let config: MutableConfig = data.decode_config()?;
    check_labels(&config.labels)?;

    let Some(id) = reconcile_id(data, KIND) else {
        return Ok(());
    };
    let found = ctx.client.get_certificate(id).await;
    if reconcile_lookup(data, KIND, found)?.is_none() {
        return Ok(());
    }

    if data.has_change("name") {
        let opts = CertificateUpdateOpts {
            name: Some(config.name.clone()),
            ..Default::default()
        };
        let updated = ctx.client.update_certificate(id, &opts).await;
        if reconcile_mutation(data, KIND, updated)?.is_none() {
            return Ok(());
        }
    }

    if data.has_change("labels") {
        let opts = CertificateUpdateOpts {
            labels: Some(config.labels.clone()),
            ..Default::default()
        };
        let updated = ctx.client.update_certificate(id, &opts).await;
        if reconcile_mutation(data, KIND, updated)?.is_none() {
            return Ok(());
        }
    }

    read_certificate(ctx, data).await
}

async fn delete_certificate(ctx: &Context<'_>, data: &mut ResourceData) -> Result<()> {
    let Some(id) = reconcile_id(data, KIND) else {
        return Ok(());
    };
    let deleted = ctx.client.delete_certificate(id).await;
    if reconcile_mutation(data, KIND, deleted)?.is_some() {
        tracing::info!(id, "Deleted certificate");
        data.clear();
    }
    Ok(())
}

/// Certificate uploaded with its private key
///
/// Registered under both `hcloud_uploaded_certificate` and the older
/// `hcloud_certificate` name.
pub struct UploadedCertificateResource {
    type_name: &'static str,
}

impl UploadedCertificateResource {
    pub const TYPE_NAME: &'static str = "hcloud_uploaded_certificate";
    pub const ALIAS: &'static str = "hcloud_certificate";

    pub fn new() -> Self {
        Self {
            type_name: Self::TYPE_NAME,
        }
    }

    pub fn alias() -> Self {
        Self {
            type_name: Self::ALIAS,
        }
    }
}

impl Default for UploadedCertificateResource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Resource for UploadedCertificateResource {
    fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn schema_version(&self) -> u32 {
        1
    }

    fn state_upgraders(&self) -> &'static [StateUpgrader] {
        &CERTIFICATE_UPGRADERS
    }

    fn suppress_diff(&self, attribute: &str, old: &str, new: &str) -> bool {
        attribute == "certificate" && equal_cert(old, new)
    }

    fn replace_on_change(&self) -> &'static [&'static str] {
        &["certificate", "private_key"]
    }

    async fn create(&self, ctx: &Context<'_>, data: &mut ResourceData) -> Result<()> {
        let config: UploadedCertificateConfig = data.decode_config()?;
        check_labels(&config.labels)?;

        let opts = CertificateCreateOpts {
            name: config.name,
            certificate_type: Some(CertificateType::Uploaded),
            certificate: Some(config.certificate),
            private_key: Some(config.private_key),
            labels: (!config.labels.is_empty()).then_some(config.labels),
            ..Default::default()
        };
        create_certificate(ctx, data, opts).await
    }

    async fn read(&self, ctx: &Context<'_>, data: &mut ResourceData) -> Result<()> {
        read_certificate(ctx, data).await
    }

    async fn update(&self, ctx: &Context<'_>, data: &mut ResourceData) -> Result<()> {
        update_certificate(ctx, data).await
    }

    async fn delete(&self, ctx: &Context<'_>, data: &mut ResourceData) -> Result<()> {
        delete_certificate(ctx, data).await
    }
}

/// Certificate issued by the provider for a set of domain names
pub struct ManagedCertificateResource;

#[async_trait]
impl Resource for ManagedCertificateResource {
    fn type_name(&self) -> &'static str {
        "hcloud_managed_certificate"
    }

    fn schema_version(&self) -> u32 {
        1
    }

    fn state_upgraders(&self) -> &'static [StateUpgrader] {
        &CERTIFICATE_UPGRADERS
    }

    fn replace_on_change(&self) -> &'static [&'static str] {
        &["domain_names"]
    }

    async fn create(&self, ctx: &Context<'_>, data: &mut ResourceData) -> Result<()> {
        let config: ManagedCertificateConfig = data.decode_config()?;
        check_labels(&config.labels)?;

        let mut domain_names = config.domain_names;
        domain_names.sort();
        domain_names.dedup();
        if domain_names.is_empty() {
            return Err(ProviderError::InvalidConfig(
                "domain_names must contain at least one domain".to_string(),
            ));
        }

        let opts = CertificateCreateOpts {
            name: config.name,
            certificate_type: Some(CertificateType::Managed),
            domain_names: Some(domain_names),
            labels: (!config.labels.is_empty()).then_some(config.labels),
            ..Default::default()
        };
        create_certificate(ctx, data, opts).await
    }

    async fn read(&self, ctx: &Context<'_>, data: &mut ResourceData) -> Result<()> {
        read_certificate(ctx, data).await
    }

    async fn update(&self, ctx: &Context<'_>, data: &mut ResourceData) -> Result<()> {
        update_certificate(ctx, data).await
    }

    async fn delete(&self, ctx: &Context<'_>, data: &mut ResourceData) -> Result<()> {
        delete_certificate(ctx, data).await
    }
}

pub struct CertificateDataSource;

#[async_trait]
impl DataSource for CertificateDataSource {
    fn type_name(&self) -> &'static str {
        "hcloud_certificate"
    }

    async fn read(&self, ctx: &Context<'_>, data: &mut ResourceData) -> Result<()> {
        let cert = match Query::from_data(data, KIND)? {
            Query::Id(id) => ctx.client.get_certificate(id).await?,
            Query::Name(name) => ctx.client.get_certificate_by_name(&name).await?,
            Query::Selector(selector) => {
                let found = ctx
                    .client
                    .list_certificates(&ListOpts::with_selector(selector))
                    .await?;
                Some(exactly_one(KIND, found)?)
            }
        }
        .ok_or_else(|| no_match(KIND))?;

        data.set_id(cert.id);
        data.set_state(&CertificateState::from(&cert))
    }
}

#[derive(Serialize)]
struct CertificateList {
    certificates: Vec<CertificateState>,
}

pub struct CertificateListDataSource;

#[async_trait]
impl DataSource for CertificateListDataSource {
    fn type_name(&self) -> &'static str {
        "hcloud_certificates"
    }

    async fn read(&self, ctx: &Context<'_>, data: &mut ResourceData) -> Result<()> {
        let certs = ctx.client.list_certificates(&list_opts(data)?).await?;
        data.id = list_id(certs.iter().map(|c| c.id));
        data.set_state(&CertificateList {
            certificates: certs.iter().map(CertificateState::from).collect(),
        })
    }
}
