//! Hetzner Cloud API client
//!
//! Typed models and an async client for the parts of the Hetzner Cloud
//! API used by `hcloud-provider`.
//!
//! Every API service is exposed as its own trait (`ActionApi`,
//! `CertificateApi`, ...) so callers can depend on exactly the calls they
//! make and substitute a fake in tests. [`Client`] implements all of them.
//!
//! # Example
//!
//! ```ignore
//! use hcloud_api::{CertificateApi, Client, ClientConfig};
//!
//! let client = Client::new(ClientConfig::new(token))?;
//! if let Some(cert) = client.get_certificate(897).await? {
//!     println!("{} expires {:?}", cert.name, cert.not_valid_after);
//! }
//! ```

pub mod action;
pub mod certificate;
pub mod client;
pub mod error;
pub mod floating_ip;
pub mod labels;
pub mod placement_group;
pub mod volume;

// Re-exports
pub use action::{Action, ActionApi, ActionError, ActionResource, ActionStatus};
pub use certificate::{
    Certificate, CertificateApi, CertificateCreateOpts, CertificateCreateResult, CertificateStatus,
    CertificateType, CertificateUpdateOpts,
};
pub use client::{Client, ClientConfig, DEFAULT_ENDPOINT, ListOpts};
pub use error::{ApiError, ErrorCode, ErrorDetails, HcloudError, InvalidInputField, Result};
pub use floating_ip::{
    FloatingIp, FloatingIpApi, FloatingIpCreateOpts, FloatingIpCreateResult, FloatingIpType,
    FloatingIpUpdateOpts,
};
pub use labels::{LabelError, validate_labels};
pub use placement_group::{
    PlacementGroup, PlacementGroupApi, PlacementGroupCreateOpts, PlacementGroupCreateResult,
    PlacementGroupType, PlacementGroupUpdateOpts,
};
pub use volume::{
    Location, Protection, Volume, VolumeApi, VolumeCreateOpts, VolumeCreateResult, VolumeUpdateOpts,
};
