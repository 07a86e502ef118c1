//! Resource and data source handlers, one module per API service

pub mod certificate;
pub mod floating_ip;
pub mod placement_group;
pub mod volume;

use crate::resource::{DataSource, Resource};

pub use certificate::{
    CertificateDataSource, CertificateListDataSource, ManagedCertificateResource,
    UploadedCertificateResource, equal_cert,
};
pub use floating_ip::{FloatingIpDataSource, FloatingIpListDataSource, FloatingIpResource};
pub use placement_group::{
    PlacementGroupDataSource, PlacementGroupListDataSource, PlacementGroupResource,
};
pub use volume::{VolumeDataSource, VolumeListDataSource, VolumeResource};

/// Every resource type the provider serves
pub fn all_resources() -> Vec<Box<dyn Resource>> {
    vec![
        Box::new(UploadedCertificateResource::new()),
        Box::new(UploadedCertificateResource::alias()),
        Box::new(ManagedCertificateResource),
        Box::new(PlacementGroupResource),
        Box::new(VolumeResource),
        Box::new(FloatingIpResource),
    ]
}

/// Every data source the provider serves
pub fn all_data_sources() -> Vec<Box<dyn DataSource>> {
    vec![
        Box::new(CertificateDataSource),
        Box::new(CertificateListDataSource),
        Box::new(PlacementGroupDataSource),
        Box::new(PlacementGroupListDataSource),
        Box::new(VolumeDataSource),
        Box::new(VolumeListDataSource),
        Box::new(FloatingIpDataSource),
        Box::new(FloatingIpListDataSource),
    ]
}
