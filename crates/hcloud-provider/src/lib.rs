//! Hetzner Cloud resources for declarative infrastructure engines
//!
//! This crate adapts the Hetzner Cloud API to the create/read/update/delete
//! lifecycle an infrastructure-as-code engine expects.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │              orchestration engine                │
//! └─────────────────┬───────────────────────────────┘
//!                   │ ResourceData / Diagnostics
//! ┌─────────────────▼───────────────────────────────┐
//! │                  Provider                        │
//! │  ┌────────────┐ ┌────────────┐ ┌─────────────┐  │
//! │  │ resources  │ │ reconcile  │ │ state/store │  │
//! │  └─────┬──────┘ └────────────┘ └─────────────┘  │
//! │  ┌─────▼──────────────────────────────────────┐  │
//! │  │        ActionWaiter (action polling)       │  │
//! │  └─────┬──────────────────────────────────────┘  │
//! └────────┼────────────────────────────────────────┘
//!          │
//! ┌────────▼────────┐
//! │    hcloud-api   │
//! └─────────────────┘
//! ```
//!
//! Supported resources: uploaded and managed certificates, placement
//! groups, volumes and floating IPs, each with a singular and a plural
//! data source.

pub mod action;
pub mod config;
pub mod diag;
pub mod error;
pub mod provider;
pub mod reconcile;
pub mod resource;
pub mod resources;
pub mod state;
pub mod store;
pub mod timeutil;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-exports
pub use action::{ActionWaiter, PollConfig, PollFunction, RetryConfig};
pub use config::ProviderConfig;
pub use diag::{Diagnostic, Diagnostics, Severity};
pub use error::{ProviderError, Result};
pub use provider::Provider;
pub use resource::{CloudApi, Context, DataSource, Resource};
pub use state::{Attributes, ResourceData, StateUpgrader};
pub use store::{StateLock, StateManager, StateSnapshot, StoredResource};
