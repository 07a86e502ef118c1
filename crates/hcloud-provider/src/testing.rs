//! In-memory fake of the cloud API
//!
//! [`FakeCloud`] implements every API trait against in-memory tables.
//! Actions follow a configurable status script, every call is recorded by
//! name, and failures can be injected per call.

use chrono::{Duration as ChronoDuration, Utc};
use hcloud_api::{
    Action, ActionApi, ActionError, ActionResource, ActionStatus, ApiError, Certificate,
    CertificateApi, CertificateCreateOpts, CertificateCreateResult, CertificateStatus,
    CertificateType, CertificateUpdateOpts, ErrorCode, FloatingIp, FloatingIpApi,
    FloatingIpCreateOpts, FloatingIpCreateResult, FloatingIpType, FloatingIpUpdateOpts,
    HcloudError, ListOpts, Location, PlacementGroup, PlacementGroupApi, PlacementGroupCreateOpts,
    PlacementGroupCreateResult, PlacementGroupUpdateOpts, Protection, Result, Volume, VolumeApi,
    VolumeCreateOpts, VolumeCreateResult, VolumeUpdateOpts,
};
use crate::action::{ActionWaiter, PollConfig, PollFunction};
use crate::resource::Context;
use crate::state::Attributes;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DEFAULT_LOCATION: &str = "fsn1";

/// PEM returned for issued managed certificates
pub const ISSUED_PEM: &str = "-----BEGIN CERTIFICATE-----\nTUFOQUdFRA==\n-----END CERTIFICATE-----\n";

#[derive(Default)]
struct Tables {
    next_id: i64,
    certificates: BTreeMap<i64, Certificate>,
    placement_groups: BTreeMap<i64, PlacementGroup>,
    volumes: BTreeMap<i64, Volume>,
    floating_ips: BTreeMap<i64, FloatingIp>,
    actions: HashMap<i64, ScriptedAction>,
    action_script: Vec<ActionStatus>,
    action_error: Option<ActionError>,
    calls: Vec<String>,
    failures: HashMap<String, VecDeque<HcloudError>>,
}

struct ScriptedAction {
    action: Action,
    remaining: VecDeque<ActionStatus>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    /// Record a call, failing it if a failure was injected
    fn enter(&mut self, call: &str) -> Result<()> {
        self.calls.push(call.to_string());
        match self.failures.get_mut(call).and_then(|queue| queue.pop_front()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn new_action(&mut self, command: &str, resource_id: i64, resource_type: &str) -> Action {
        let id = self.next_id();
        let remaining: VecDeque<ActionStatus> = self.action_script.iter().copied().collect();
        let status = if remaining.is_empty() {
            ActionStatus::Success
        } else {
            ActionStatus::Running
        };
        let action = Action {
            id,
            command: command.to_string(),
            status,
            progress: if status == ActionStatus::Success { 100 } else { 0 },
            started: Utc::now(),
            finished: None,
            resources: vec![ActionResource {
                id: resource_id,
                resource_type: resource_type.to_string(),
            }],
            error: None,
        };
        self.actions.insert(
            id,
            ScriptedAction {
                action: action.clone(),
                remaining,
            },
        );
        action
    }
}

fn not_found(kind: &str, id: i64) -> HcloudError {
    HcloudError::Api(ApiError::new(
        ErrorCode::NotFound,
        format!("{} with ID '{}' not found", kind, id),
    ))
}

fn protected(kind: &str) -> HcloudError {
    HcloudError::Api(ApiError::new(
        ErrorCode::Protected,
        format!("{} is protected", kind),
    ))
}

/// Evaluate the subset of label selector syntax used in tests: `k`, `k=v`, `k!=v`
fn matches(labels: &HashMap<String, String>, name: &str, opts: &ListOpts) -> bool {
    if opts.name.as_deref().is_some_and(|wanted| wanted != name) {
        return false;
    }
    let Some(selector) = &opts.label_selector else {
        return true;
    };
    selector.split(',').map(str::trim).all(|term| {
        if let Some((key, value)) = term.split_once("!=") {
            labels.get(key).map(String::as_str) != Some(value)
        } else if let Some((key, value)) = term.split_once('=') {
            labels.get(key).map(String::as_str) == Some(value)
        } else {
            labels.contains_key(term)
        }
    })
}

fn location(name: Option<&String>) -> Location {
    Location {
        name: name.cloned().unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
        network_zone: Some("eu-central".to_string()),
    }
}

/// Attribute map from a JSON object literal; anything else yields an empty map
pub fn attributes(value: serde_json::Value) -> Attributes {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Attributes::new(),
    }
}

/// Everything a handler needs, wired to a [`FakeCloud`]
pub struct Harness {
    pub cloud: FakeCloud,
    pub waiter: ActionWaiter,
    pub cancel: CancellationToken,
}

impl Harness {
    pub fn new(cloud: FakeCloud) -> Self {
        let waiter = ActionWaiter::new(PollConfig {
            interval: Duration::from_millis(100),
            function: PollFunction::Constant,
            timeout: Duration::from_secs(60),
            ..PollConfig::default()
        });
        Self {
            cloud,
            waiter,
            cancel: CancellationToken::new(),
        }
    }

    pub fn ctx(&self) -> Context<'_> {
        Context {
            client: &self.cloud,
            waiter: &self.waiter,
            cancel: &self.cancel,
        }
    }
}

/// In-memory cloud for handler tests
pub struct FakeCloud {
    tables: Mutex<Tables>,
}

impl Default for FakeCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCloud {
    /// Actions created by this fake report `success` on their first poll
    pub fn new() -> Self {
        let tables = Tables {
            action_script: vec![ActionStatus::Success],
            ..Tables::default()
        };
        Self {
            tables: Mutex::new(tables),
        }
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Statuses reported by successive polls of every new action
    ///
    /// An empty script creates actions that are already finished. The last
    /// status repeats once the script runs out.
    pub fn with_action_script(self, script: Vec<ActionStatus>) -> Self {
        self.tables().action_script = script;
        self
    }

    /// Error reported by actions that end in `error`
    pub fn with_action_error(self, code: &str, message: &str) -> Self {
        self.tables().action_error = Some(ActionError {
            code: code.to_string(),
            message: message.to_string(),
        });
        self
    }

    /// Fail the next call named `call` with `err`
    pub fn fail_next(&self, call: &str, err: HcloudError) {
        self.tables()
            .failures
            .entry(call.to_string())
            .or_default()
            .push_back(err);
    }

    /// Names of all calls made so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.tables().calls.clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.tables().calls.iter().filter(|c| *c == call).count()
    }

    /// Number of calls other than reads
    pub fn mutations(&self) -> usize {
        self.tables()
            .calls
            .iter()
            .filter(|c| !c.starts_with("get_") && !c.starts_with("list_"))
            .count()
    }

    pub fn reset_calls(&self) {
        self.tables().calls.clear();
    }

    pub fn certificate(&self, id: i64) -> Option<Certificate> {
        self.tables().certificates.get(&id).cloned()
    }

    pub fn placement_group(&self, id: i64) -> Option<PlacementGroup> {
        self.tables().placement_groups.get(&id).cloned()
    }

    pub fn volume(&self, id: i64) -> Option<Volume> {
        self.tables().volumes.get(&id).cloned()
    }

    pub fn floating_ip(&self, id: i64) -> Option<FloatingIp> {
        self.tables().floating_ips.get(&id).cloned()
    }

    /// Remove a resource behind the provider's back
    pub fn remove_volume(&self, id: i64) {
        self.tables().volumes.remove(&id);
    }

    pub fn remove_certificate(&self, id: i64) {
        self.tables().certificates.remove(&id);
    }

    pub fn remove_placement_group(&self, id: i64) {
        self.tables().placement_groups.remove(&id);
    }

    pub fn remove_floating_ip(&self, id: i64) {
        self.tables().floating_ips.remove(&id);
    }

    /// Store a volume directly, without recording a call
    pub fn seed_volume(&self, name: &str, size: u32, labels: &[(&str, &str)]) -> Volume {
        let mut tables = self.tables();
        let id = tables.next_id();
        let volume = Volume {
            id,
            name: name.to_string(),
            size,
            server: None,
            location: location(None),
            linux_device: Some(format!("/dev/disk/by-id/scsi-0HC_Volume_{}", id)),
            format: None,
            protection: Protection::default(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            status: Some("available".to_string()),
            created: Utc::now(),
        };
        tables.volumes.insert(id, volume.clone());
        volume
    }

    pub fn seed_floating_ip(&self, name: &str, labels: &[(&str, &str)]) -> FloatingIp {
        let mut tables = self.tables();
        let id = tables.next_id();
        let ip = FloatingIp {
            id,
            name: name.to_string(),
            description: None,
            ip: format!("203.0.113.{}", id),
            ip_type: FloatingIpType::Ipv4,
            server: None,
            home_location: location(None),
            blocked: false,
            protection: Protection::default(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            created: Utc::now(),
        };
        tables.floating_ips.insert(id, ip.clone());
        ip
    }

    /// Store a certificate directly, without recording a call
    pub fn seed_certificate(&self, certificate: Certificate) {
        let mut tables = self.tables();
        tables.next_id = tables.next_id.max(certificate.id);
        tables.certificates.insert(certificate.id, certificate);
    }
}

#[async_trait]
impl ActionApi for FakeCloud {
    async fn get_action(&self, id: i64) -> Result<Option<Action>> {
        let mut tables = self.tables();
        tables.enter("get_action")?;
        let error = tables.action_error.clone();

        let Some(scripted) = tables.actions.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(status) = scripted.remaining.pop_front() {
            scripted.action.status = status;
            match status {
                ActionStatus::Running => scripted.action.progress = 50,
                ActionStatus::Success => {
                    scripted.action.progress = 100;
                    scripted.action.finished = Some(Utc::now());
                }
                ActionStatus::Error => {
                    scripted.action.finished = Some(Utc::now());
                    scripted.action.error = Some(error.unwrap_or(ActionError {
                        code: "action_failed".to_string(),
                        message: "Action failed".to_string(),
                    }));
                }
            }
        }
        Ok(Some(scripted.action.clone()))
    }
}

#[async_trait]
impl CertificateApi for FakeCloud {
    async fn get_certificate(&self, id: i64) -> Result<Option<Certificate>> {
        let mut tables = self.tables();
        tables.enter("get_certificate")?;
        Ok(tables.certificates.get(&id).cloned())
    }

    async fn list_certificates(&self, opts: &ListOpts) -> Result<Vec<Certificate>> {
        let mut tables = self.tables();
        tables.enter("list_certificates")?;
        Ok(tables
            .certificates
            .values()
            .filter(|c| matches(&c.labels, &c.name, opts))
            .cloned()
            .collect())
    }

    async fn create_certificate(&self, opts: &CertificateCreateOpts) -> Result<CertificateCreateResult> {
        let mut tables = self.tables();
        tables.enter("create_certificate")?;
        let id = tables.next_id();
        let created = Utc::now();
        let managed = opts.certificate_type == Some(CertificateType::Managed);

        let certificate = Certificate {
            id,
            name: opts.name.clone(),
            labels: opts.labels.clone().unwrap_or_default(),
            certificate_type: if managed {
                CertificateType::Managed
            } else {
                CertificateType::Uploaded
            },
            certificate: if managed {
                Some(ISSUED_PEM.to_string())
            } else {
                opts.certificate.clone()
            },
            created,
            not_valid_before: Some(created),
            not_valid_after: Some(created + ChronoDuration::days(90)),
            domain_names: opts.domain_names.clone().unwrap_or_default(),
            fingerprint: Some(format!("00:11:22:{:02x}", id)),
            status: managed.then(|| CertificateStatus {
                issuance: Some("completed".to_string()),
                renewal: Some("unavailable".to_string()),
            }),
        };
        tables.certificates.insert(id, certificate.clone());
        let action = managed.then(|| tables.new_action("create_certificate", id, "certificate"));

        Ok(CertificateCreateResult { certificate, action })
    }

    async fn update_certificate(&self, id: i64, opts: &CertificateUpdateOpts) -> Result<Certificate> {
        let mut tables = self.tables();
        tables.enter("update_certificate")?;
        let certificate = tables
            .certificates
            .get_mut(&id)
            .ok_or_else(|| not_found("certificate", id))?;
        if let Some(name) = &opts.name {
            certificate.name = name.clone();
        }
        if let Some(labels) = &opts.labels {
            certificate.labels = labels.clone();
        }
        Ok(certificate.clone())
    }

    async fn delete_certificate(&self, id: i64) -> Result<()> {
        let mut tables = self.tables();
        tables.enter("delete_certificate")?;
        tables
            .certificates
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| not_found("certificate", id))
    }
}

#[async_trait]
impl PlacementGroupApi for FakeCloud {
    async fn get_placement_group(&self, id: i64) -> Result<Option<PlacementGroup>> {
        let mut tables = self.tables();
        tables.enter("get_placement_group")?;
        Ok(tables.placement_groups.get(&id).cloned())
    }

    async fn list_placement_groups(&self, opts: &ListOpts) -> Result<Vec<PlacementGroup>> {
        let mut tables = self.tables();
        tables.enter("list_placement_groups")?;
        Ok(tables
            .placement_groups
            .values()
            .filter(|g| matches(&g.labels, &g.name, opts))
            .cloned()
            .collect())
    }

    async fn create_placement_group(
        &self,
        opts: &PlacementGroupCreateOpts,
    ) -> Result<PlacementGroupCreateResult> {
        let mut tables = self.tables();
        tables.enter("create_placement_group")?;
        let id = tables.next_id();
        let placement_group = PlacementGroup {
            id,
            name: opts.name.clone(),
            labels: opts.labels.clone().unwrap_or_default(),
            group_type: opts.group_type,
            servers: Vec::new(),
            created: Utc::now(),
        };
        tables.placement_groups.insert(id, placement_group.clone());
        Ok(PlacementGroupCreateResult {
            placement_group,
            action: None,
        })
    }

    async fn update_placement_group(
        &self,
        id: i64,
        opts: &PlacementGroupUpdateOpts,
    ) -> Result<PlacementGroup> {
        let mut tables = self.tables();
        tables.enter("update_placement_group")?;
        let group = tables
            .placement_groups
            .get_mut(&id)
            .ok_or_else(|| not_found("placement group", id))?;
        if let Some(name) = &opts.name {
            group.name = name.clone();
        }
        if let Some(labels) = &opts.labels {
            group.labels = labels.clone();
        }
        Ok(group.clone())
    }

    async fn delete_placement_group(&self, id: i64) -> Result<()> {
        let mut tables = self.tables();
        tables.enter("delete_placement_group")?;
        tables
            .placement_groups
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| not_found("placement group", id))
    }
}

#[async_trait]
impl VolumeApi for FakeCloud {
    async fn get_volume(&self, id: i64) -> Result<Option<Volume>> {
        let mut tables = self.tables();
        tables.enter("get_volume")?;
        Ok(tables.volumes.get(&id).cloned())
    }

    async fn list_volumes(&self, opts: &ListOpts) -> Result<Vec<Volume>> {
        let mut tables = self.tables();
        tables.enter("list_volumes")?;
        Ok(tables
            .volumes
            .values()
            .filter(|v| matches(&v.labels, &v.name, opts))
            .cloned()
            .collect())
    }

    async fn create_volume(&self, opts: &VolumeCreateOpts) -> Result<VolumeCreateResult> {
        let mut tables = self.tables();
        tables.enter("create_volume")?;
        let id = tables.next_id();
        let volume = Volume {
            id,
            name: opts.name.clone(),
            size: opts.size,
            server: opts.server,
            location: location(opts.location.as_ref()),
            linux_device: Some(format!("/dev/disk/by-id/scsi-0HC_Volume_{}", id)),
            format: opts.format.clone(),
            protection: Protection::default(),
            labels: opts.labels.clone().unwrap_or_default(),
            status: Some("creating".to_string()),
            created: Utc::now(),
        };
        tables.volumes.insert(id, volume.clone());

        let action = tables.new_action("create_volume", id, "volume");
        let next_actions = match opts.server {
            Some(_) => vec![tables.new_action("attach_volume", id, "volume")],
            None => Vec::new(),
        };
        Ok(VolumeCreateResult {
            volume,
            action: Some(action),
            next_actions,
        })
    }

    async fn update_volume(&self, id: i64, opts: &VolumeUpdateOpts) -> Result<Volume> {
        let mut tables = self.tables();
        tables.enter("update_volume")?;
        let volume = tables
            .volumes
            .get_mut(&id)
            .ok_or_else(|| not_found("volume", id))?;
        if let Some(name) = &opts.name {
            volume.name = name.clone();
        }
        if let Some(labels) = &opts.labels {
            volume.labels = labels.clone();
        }
        Ok(volume.clone())
    }

    async fn delete_volume(&self, id: i64) -> Result<()> {
        let mut tables = self.tables();
        tables.enter("delete_volume")?;
        let volume = tables.volumes.get(&id).ok_or_else(|| not_found("volume", id))?;
        if volume.protection.delete {
            return Err(protected("volume"));
        }
        if volume.server.is_some() {
            return Err(HcloudError::Api(ApiError::new(
                ErrorCode::Conflict,
                "volume is still attached to a server",
            )));
        }
        tables.volumes.remove(&id);
        Ok(())
    }

    async fn attach_volume(&self, id: i64, server: i64, _automount: Option<bool>) -> Result<Action> {
        let mut tables = self.tables();
        tables.enter("attach_volume")?;
        tables
            .volumes
            .get_mut(&id)
            .ok_or_else(|| not_found("volume", id))?
            .server = Some(server);
        Ok(tables.new_action("attach_volume", id, "volume"))
    }

    async fn detach_volume(&self, id: i64) -> Result<Action> {
        let mut tables = self.tables();
        tables.enter("detach_volume")?;
        tables
            .volumes
            .get_mut(&id)
            .ok_or_else(|| not_found("volume", id))?
            .server = None;
        Ok(tables.new_action("detach_volume", id, "volume"))
    }

    async fn resize_volume(&self, id: i64, size: u32) -> Result<Action> {
        let mut tables = self.tables();
        tables.enter("resize_volume")?;
        tables
            .volumes
            .get_mut(&id)
            .ok_or_else(|| not_found("volume", id))?
            .size = size;
        Ok(tables.new_action("resize_volume", id, "volume"))
    }

    async fn change_volume_protection(&self, id: i64, delete: bool) -> Result<Action> {
        let mut tables = self.tables();
        tables.enter("change_volume_protection")?;
        tables
            .volumes
            .get_mut(&id)
            .ok_or_else(|| not_found("volume", id))?
            .protection = Protection { delete };
        Ok(tables.new_action("change_protection", id, "volume"))
    }
}

#[async_trait]
impl FloatingIpApi for FakeCloud {
    async fn get_floating_ip(&self, id: i64) -> Result<Option<FloatingIp>> {
        let mut tables = self.tables();
        tables.enter("get_floating_ip")?;
        Ok(tables.floating_ips.get(&id).cloned())
    }

    async fn list_floating_ips(&self, opts: &ListOpts) -> Result<Vec<FloatingIp>> {
        let mut tables = self.tables();
        tables.enter("list_floating_ips")?;
        Ok(tables
            .floating_ips
            .values()
            .filter(|ip| matches(&ip.labels, &ip.name, opts))
            .cloned()
            .collect())
    }

    async fn create_floating_ip(&self, opts: &FloatingIpCreateOpts) -> Result<FloatingIpCreateResult> {
        let mut tables = self.tables();
        tables.enter("create_floating_ip")?;
        let id = tables.next_id();
        let floating_ip = FloatingIp {
            id,
            name: opts.name.clone().unwrap_or_else(|| format!("floating-ip-{}", id)),
            description: opts.description.clone(),
            ip: match opts.ip_type {
                FloatingIpType::Ipv4 => format!("203.0.113.{}", id),
                FloatingIpType::Ipv6 => format!("2001:db8:{:x}::/64", id),
            },
            ip_type: opts.ip_type,
            server: opts.server,
            home_location: location(opts.home_location.as_ref()),
            blocked: false,
            protection: Protection::default(),
            labels: opts.labels.clone().unwrap_or_default(),
            created: Utc::now(),
        };
        tables.floating_ips.insert(id, floating_ip.clone());
        let action = opts
            .server
            .map(|_| tables.new_action("assign_floating_ip", id, "floating_ip"));
        Ok(FloatingIpCreateResult {
            floating_ip,
            action,
        })
    }

    async fn update_floating_ip(&self, id: i64, opts: &FloatingIpUpdateOpts) -> Result<FloatingIp> {
        let mut tables = self.tables();
        tables.enter("update_floating_ip")?;
        let ip = tables
            .floating_ips
            .get_mut(&id)
            .ok_or_else(|| not_found("floating IP", id))?;
        if let Some(name) = &opts.name {
            ip.name = name.clone();
        }
        if let Some(description) = &opts.description {
            ip.description = Some(description.clone());
        }
        if let Some(labels) = &opts.labels {
            ip.labels = labels.clone();
        }
        Ok(ip.clone())
    }

    async fn delete_floating_ip(&self, id: i64) -> Result<()> {
        let mut tables = self.tables();
        tables.enter("delete_floating_ip")?;
        let ip = tables
            .floating_ips
            .get(&id)
            .ok_or_else(|| not_found("floating IP", id))?;
        if ip.protection.delete {
            return Err(protected("floating IP"));
        }
        tables.floating_ips.remove(&id);
        Ok(())
    }

    async fn assign_floating_ip(&self, id: i64, server: i64) -> Result<Action> {
        let mut tables = self.tables();
        tables.enter("assign_floating_ip")?;
        tables
            .floating_ips
            .get_mut(&id)
            .ok_or_else(|| not_found("floating IP", id))?
            .server = Some(server);
        Ok(tables.new_action("assign_floating_ip", id, "floating_ip"))
    }

    async fn unassign_floating_ip(&self, id: i64) -> Result<Action> {
        let mut tables = self.tables();
        tables.enter("unassign_floating_ip")?;
        tables
            .floating_ips
            .get_mut(&id)
            .ok_or_else(|| not_found("floating IP", id))?
            .server = None;
        Ok(tables.new_action("unassign_floating_ip", id, "floating_ip"))
    }

    async fn change_floating_ip_protection(&self, id: i64, delete: bool) -> Result<Action> {
        let mut tables = self.tables();
        tables.enter("change_floating_ip_protection")?;
        tables
            .floating_ips
            .get_mut(&id)
            .ok_or_else(|| not_found("floating IP", id))?
            .protection = Protection { delete };
        Ok(tables.new_action("change_protection", id, "floating_ip"))
    }
}
