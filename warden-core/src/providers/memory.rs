// warden-core/src/providers/memory.rs
//! In-memory cloud implementing every collaborator trait.
//!
//! Used by the test suites and by the CLI, which loads a JSON "world"
//! snapshot into it, runs one invocation and writes the world back. Faults
//! can be injected per operation (or per operation and resource) and every
//! call is journalled so tests can assert that a skip touched nothing.
//!
//! License: MIT OR Apache-2.0

use async_trait::async_trait;
use log::debug;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::errors::ProviderError;
use crate::labels::LabelSet;
use crate::providers::{
    BulkStore, CallerIdentity, ComputeApi, IdentitySource, Instance, IpPermission, LabelStore,
    NotificationChannel, ObjectEncryption, ObjectLocator, ProviderResult, SecurityGroup,
    TrailApi, TrailDescriptor, TrailSettings,
};

/// Bucket name reported for objects put into the memory store.
pub const MEMORY_BUCKET: &str = "warden-memory";

/// Operations that change cloud state. Reads, publishes and event dumps are
/// not mutations.
static MUTATING_OPS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "UpdateTrail",
        "CreateTrail",
        "PutEventSelectors",
        "PutInsightSelectors",
        "StartLogging",
        "AddTags",
        "CreateSecurityGroup",
        "RevokeSecurityGroupEgress",
        "RevokeSecurityGroupIngress",
        "ModifyNetworkInterfaceAttribute",
        "CreateSnapshot",
        "DisassociateIamInstanceProfile",
        "StopInstances",
    ]
    .into_iter()
    .collect()
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrailRecord {
    pub arn: String,
    #[serde(default)]
    pub logging: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<TrailSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_selectors: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insight_selectors: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRecord {
    pub volume_id: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedMessage {
    pub message_id: String,
    pub channel: String,
    pub subject: String,
    pub body: String,
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub encryption: ObjectEncryption,
}

/// The whole simulated world. This is also the CLI's world file format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CloudState {
    pub account_id: String,
    pub caller_arn: String,
    pub region: String,
    pub trails: BTreeMap<String, TrailRecord>,
    pub instances: BTreeMap<String, Instance>,
    pub security_groups: BTreeMap<String, SecurityGroup>,
    /// Labels of every resource, keyed by resource id or ARN.
    pub labels: BTreeMap<String, LabelSet>,
    pub snapshots: BTreeMap<String, SnapshotRecord>,
    /// Instance id → instance profile association ids.
    pub profile_associations: BTreeMap<String, Vec<String>>,
    pub outbox: Vec<PublishedMessage>,
    /// Id counter, persisted so ids stay unique across runs.
    pub sequence: u64,
    #[serde(skip)]
    pub objects: BTreeMap<String, StoredObject>,
}

impl CloudState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.sequence += 1;
        format!("{}-{:08x}", prefix, self.sequence)
    }

    fn trail_arn(&self, name: &str) -> String {
        let region = if self.region.is_empty() { "us-east-1" } else { self.region.as_str() };
        format!("arn:aws:cloudtrail:{}:{}:trail/{}", region, self.account_id, name)
    }
}

#[derive(Default)]
struct Inner {
    state: CloudState,
    faults: HashMap<String, String>,
    calls: Vec<String>,
}

impl Inner {
    /// Journals the call and returns the injected fault, if any.
    fn enter(&mut self, op: &str, resource: &str) -> ProviderResult<()> {
        self.calls.push(op.to_string());
        let scoped = format!("{}:{}", op, resource);
        match self.faults.get(&scoped).or_else(|| self.faults.get(op)) {
            Some(code) => {
                debug!("memory cloud: injected {} on {}", code, scoped);
                Err(ProviderError::new(code.clone(), format!("injected fault on {}", op)))
            }
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct MemoryCloud {
    inner: Mutex<Inner>,
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: CloudState) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state,
                ..Default::default()
            }),
        }
    }

    pub async fn snapshot(&self) -> CloudState {
        self.inner.lock().await.state.clone()
    }

    /// Every call of `op` fails with `code` from now on.
    pub async fn fail(&self, op: &str, code: &str) {
        self.inner.lock().await.faults.insert(op.to_string(), code.to_string());
    }

    /// Calls of `op` against `resource` fail with `code`.
    pub async fn fail_on(&self, op: &str, resource: &str, code: &str) {
        self.inner
            .lock()
            .await
            .faults
            .insert(format!("{}:{}", op, resource), code.to_string());
    }

    pub async fn clear_faults(&self) {
        self.inner.lock().await.faults.clear();
    }

    /// Operation names in call order, failed calls included.
    pub async fn calls(&self) -> Vec<String> {
        self.inner.lock().await.calls.clone()
    }

    pub async fn mutations(&self) -> Vec<String> {
        self.calls()
            .await
            .into_iter()
            .filter(|op| MUTATING_OPS.contains(op.as_str()))
            .collect()
    }

    pub async fn reset_journal(&self) {
        self.inner.lock().await.calls.clear();
    }

    pub async fn set_caller(&self, caller: CallerIdentity) {
        let mut inner = self.inner.lock().await;
        inner.state.account_id = caller.account;
        inner.state.caller_arn = caller.arn;
    }

    pub async fn seed_labels(&self, resource: &str, labels: LabelSet) {
        self.inner
            .lock()
            .await
            .state
            .labels
            .entry(resource.to_string())
            .or_default()
            .extend(labels);
    }

    pub async fn labels_of(&self, resource: &str) -> LabelSet {
        self.inner
            .lock()
            .await
            .state
            .labels
            .get(resource)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn insert_trail(&self, name: &str, logging: bool) -> String {
        let mut inner = self.inner.lock().await;
        let arn = inner.state.trail_arn(name);
        inner.state.trails.insert(
            name.to_string(),
            TrailRecord {
                arn: arn.clone(),
                logging,
                settings: None,
                event_selectors: None,
                insight_selectors: None,
            },
        );
        arn
    }

    pub async fn trail(&self, name: &str) -> Option<TrailRecord> {
        self.inner.lock().await.state.trails.get(name).cloned()
    }

    pub async fn insert_instance(&self, instance: Instance) {
        let mut inner = self.inner.lock().await;
        inner.state.instances.insert(instance.instance_id.clone(), instance);
    }

    pub async fn instance(&self, instance_id: &str) -> Option<Instance> {
        self.inner.lock().await.state.instances.get(instance_id).cloned()
    }

    pub async fn insert_security_group(&self, group: SecurityGroup) {
        let mut inner = self.inner.lock().await;
        inner.state.security_groups.insert(group.group_id.clone(), group);
    }

    pub async fn security_group(&self, group_id: &str) -> Option<SecurityGroup> {
        self.inner.lock().await.state.security_groups.get(group_id).cloned()
    }

    pub async fn associate_profile(&self, instance_id: &str, association_id: &str) {
        self.inner
            .lock()
            .await
            .state
            .profile_associations
            .entry(instance_id.to_string())
            .or_default()
            .push(association_id.to_string());
    }

    pub async fn snapshots(&self) -> BTreeMap<String, SnapshotRecord> {
        self.inner.lock().await.state.snapshots.clone()
    }

    pub async fn outbox(&self) -> Vec<PublishedMessage> {
        self.inner.lock().await.state.outbox.clone()
    }

    pub async fn object(&self, key: &str) -> Option<(Vec<u8>, ObjectEncryption)> {
        self.inner
            .lock()
            .await
            .state
            .objects
            .get(key)
            .map(|o| (o.body.clone(), o.encryption.clone()))
    }
}

fn not_found(code: &str, what: &str) -> ProviderError {
    ProviderError::new(code, format!("{} does not exist", what))
}

/// Removes the address ranges of `requested` from `rules`. Fails without
/// touching anything when a requested range is not present.
fn revoke_ranges(rules: &mut Vec<IpPermission>, requested: &[IpPermission]) -> ProviderResult<()> {
    let mut updated = rules.clone();
    for req in requested {
        let rule = updated
            .iter_mut()
            .find(|r| r.same_scope(req))
            .ok_or_else(|| not_found("InvalidPermission.NotFound", "permission"))?;
        let present = req.ipv4_ranges.iter().all(|c| rule.ipv4_ranges.contains(c))
            && req.ipv6_ranges.iter().all(|c| rule.ipv6_ranges.contains(c));
        if !present {
            return Err(not_found("InvalidPermission.NotFound", "permission"));
        }
        rule.ipv4_ranges.retain(|c| !req.ipv4_ranges.contains(c));
        rule.ipv6_ranges.retain(|c| !req.ipv6_ranges.contains(c));
    }
    updated.retain(|r| !(r.ipv4_ranges.is_empty() && r.ipv6_ranges.is_empty()));
    *rules = updated;
    Ok(())
}

#[async_trait]
impl IdentitySource for MemoryCloud {
    async fn caller_identity(&self) -> ProviderResult<CallerIdentity> {
        let mut inner = self.inner.lock().await;
        inner.enter("GetCallerIdentity", "")?;
        Ok(CallerIdentity {
            account: inner.state.account_id.clone(),
            arn: inner.state.caller_arn.clone(),
        })
    }
}

#[async_trait]
impl LabelStore for MemoryCloud {
    async fn current_labels(&self, resource: &str) -> ProviderResult<LabelSet> {
        let mut inner = self.inner.lock().await;
        inner.enter("ListTags", resource)?;
        Ok(inner.state.labels.get(resource).cloned().unwrap_or_default())
    }

    async fn add_labels(&self, resource: &str, labels: &LabelSet) -> ProviderResult<()> {
        let mut inner = self.inner.lock().await;
        inner.enter("AddTags", resource)?;
        inner
            .state
            .labels
            .entry(resource.to_string())
            .or_default()
            .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }
}

#[async_trait]
impl TrailApi for MemoryCloud {
    async fn describe_trail(&self, name: &str) -> ProviderResult<Option<TrailDescriptor>> {
        let mut inner = self.inner.lock().await;
        inner.enter("DescribeTrails", name)?;
        Ok(inner.state.trails.get(name).map(|t| TrailDescriptor {
            name: name.to_string(),
            arn: t.arn.clone(),
        }))
    }

    async fn update_trail(&self, settings: &TrailSettings) -> ProviderResult<()> {
        let mut inner = self.inner.lock().await;
        inner.enter("UpdateTrail", &settings.name)?;
        let trail = inner
            .state
            .trails
            .get_mut(&settings.name)
            .ok_or_else(|| not_found("TrailNotFoundException", "trail"))?;
        trail.settings = Some(settings.clone());
        Ok(())
    }

    async fn create_trail(&self, settings: &TrailSettings) -> ProviderResult<()> {
        let mut inner = self.inner.lock().await;
        inner.enter("CreateTrail", &settings.name)?;
        if inner.state.trails.contains_key(&settings.name) {
            return Err(ProviderError::new("TrailAlreadyExistsException", "trail exists"));
        }
        let arn = inner.state.trail_arn(&settings.name);
        inner.state.trails.insert(
            settings.name.clone(),
            TrailRecord {
                arn,
                logging: false,
                settings: Some(settings.clone()),
                event_selectors: None,
                insight_selectors: None,
            },
        );
        Ok(())
    }

    async fn put_event_selectors(&self, name: &str, selectors: &serde_json::Value) -> ProviderResult<()> {
        let mut inner = self.inner.lock().await;
        inner.enter("PutEventSelectors", name)?;
        let trail = inner
            .state
            .trails
            .get_mut(name)
            .ok_or_else(|| not_found("TrailNotFoundException", "trail"))?;
        trail.event_selectors = Some(selectors.clone());
        Ok(())
    }

    async fn put_insight_selectors(&self, name: &str, selectors: &serde_json::Value) -> ProviderResult<()> {
        let mut inner = self.inner.lock().await;
        inner.enter("PutInsightSelectors", name)?;
        let trail = inner
            .state
            .trails
            .get_mut(name)
            .ok_or_else(|| not_found("TrailNotFoundException", "trail"))?;
        trail.insight_selectors = Some(selectors.clone());
        Ok(())
    }

    async fn is_logging(&self, name: &str) -> ProviderResult<bool> {
        let mut inner = self.inner.lock().await;
        inner.enter("GetTrailStatus", name)?;
        inner
            .state
            .trails
            .get(name)
            .map(|t| t.logging)
            .ok_or_else(|| not_found("TrailNotFoundException", "trail"))
    }

    async fn start_logging(&self, name: &str) -> ProviderResult<()> {
        let mut inner = self.inner.lock().await;
        inner.enter("StartLogging", name)?;
        let trail = inner
            .state
            .trails
            .get_mut(name)
            .ok_or_else(|| not_found("TrailNotFoundException", "trail"))?;
        trail.logging = true;
        Ok(())
    }
}

#[async_trait]
impl ComputeApi for MemoryCloud {
    async fn describe_instance(&self, instance_id: &str) -> ProviderResult<Instance> {
        let mut inner = self.inner.lock().await;
        inner.enter("DescribeInstances", instance_id)?;
        let mut instance = inner
            .state
            .instances
            .get(instance_id)
            .cloned()
            .ok_or_else(|| not_found("InvalidInstanceID.NotFound", "instance"))?;
        if let Some(labels) = inner.state.labels.get(instance_id) {
            instance.labels.extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Ok(instance)
    }

    async fn describe_security_group(&self, group_id: &str) -> ProviderResult<SecurityGroup> {
        let mut inner = self.inner.lock().await;
        inner.enter("DescribeSecurityGroups", group_id)?;
        inner
            .state
            .security_groups
            .get(group_id)
            .cloned()
            .ok_or_else(|| not_found("InvalidGroup.NotFound", "security group"))
    }

    async fn find_security_group(&self, vpc_id: &str, name: &str) -> ProviderResult<Option<String>> {
        let mut inner = self.inner.lock().await;
        inner.enter("DescribeSecurityGroups", name)?;
        Ok(inner
            .state
            .security_groups
            .values()
            .find(|g| g.vpc_id == vpc_id && g.group_name == name)
            .map(|g| g.group_id.clone()))
    }

    async fn create_security_group(
        &self,
        name: &str,
        _description: &str,
        vpc_id: &str,
        labels: &LabelSet,
    ) -> ProviderResult<String> {
        let mut inner = self.inner.lock().await;
        inner.enter("CreateSecurityGroup", name)?;
        let duplicate = inner
            .state
            .security_groups
            .values()
            .any(|g| g.vpc_id == vpc_id && g.group_name == name);
        if duplicate {
            return Err(ProviderError::new("InvalidGroup.Duplicate", "group name in use"));
        }
        let group_id = inner.state.next_id("sg");
        inner.state.security_groups.insert(
            group_id.clone(),
            SecurityGroup {
                group_id: group_id.clone(),
                group_name: name.to_string(),
                vpc_id: vpc_id.to_string(),
                ingress: Vec::new(),
                egress: vec![IpPermission {
                    protocol: "-1".to_string(),
                    from_port: None,
                    to_port: None,
                    ipv4_ranges: vec!["0.0.0.0/0".to_string()],
                    ipv6_ranges: Vec::new(),
                }],
            },
        );
        if !labels.is_empty() {
            inner.state.labels.insert(group_id.clone(), labels.clone());
        }
        Ok(group_id)
    }

    async fn revoke_egress(&self, group_id: &str, permissions: &[IpPermission]) -> ProviderResult<()> {
        let mut inner = self.inner.lock().await;
        inner.enter("RevokeSecurityGroupEgress", group_id)?;
        let group = inner
            .state
            .security_groups
            .get_mut(group_id)
            .ok_or_else(|| not_found("InvalidGroup.NotFound", "security group"))?;
        revoke_ranges(&mut group.egress, permissions)
    }

    async fn revoke_ingress(&self, group_id: &str, permissions: &[IpPermission]) -> ProviderResult<()> {
        let mut inner = self.inner.lock().await;
        inner.enter("RevokeSecurityGroupIngress", group_id)?;
        let group = inner
            .state
            .security_groups
            .get_mut(group_id)
            .ok_or_else(|| not_found("InvalidGroup.NotFound", "security group"))?;
        revoke_ranges(&mut group.ingress, permissions)
    }

    async fn set_interface_groups(&self, interface_id: &str, groups: &[String]) -> ProviderResult<()> {
        let mut inner = self.inner.lock().await;
        inner.enter("ModifyNetworkInterfaceAttribute", interface_id)?;
        if let Some(missing) = groups.iter().find(|g| !inner.state.security_groups.contains_key(*g)) {
            return Err(not_found("InvalidGroup.NotFound", missing));
        }
        let interface = inner
            .state
            .instances
            .values_mut()
            .flat_map(|i| i.network_interfaces.iter_mut())
            .find(|ni| ni.interface_id == interface_id)
            .ok_or_else(|| not_found("InvalidNetworkInterfaceID.NotFound", "network interface"))?;
        interface.groups = groups.to_vec();
        Ok(())
    }

    async fn create_snapshot(&self, volume_id: &str, description: &str, labels: &LabelSet) -> ProviderResult<String> {
        let mut inner = self.inner.lock().await;
        inner.enter("CreateSnapshot", volume_id)?;
        let attached = inner
            .state
            .instances
            .values()
            .flat_map(|i| i.block_devices.iter())
            .any(|b| b.volume_id.as_deref() == Some(volume_id));
        if !attached {
            return Err(not_found("InvalidVolume.NotFound", "volume"));
        }
        let snapshot_id = inner.state.next_id("snap");
        inner.state.snapshots.insert(
            snapshot_id.clone(),
            SnapshotRecord {
                volume_id: volume_id.to_string(),
                description: description.to_string(),
            },
        );
        if !labels.is_empty() {
            inner.state.labels.insert(snapshot_id.clone(), labels.clone());
        }
        Ok(snapshot_id)
    }

    async fn profile_associations(&self, instance_id: &str) -> ProviderResult<Vec<String>> {
        let mut inner = self.inner.lock().await;
        inner.enter("DescribeIamInstanceProfileAssociations", instance_id)?;
        Ok(inner
            .state
            .profile_associations
            .get(instance_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn disassociate_profile(&self, association_id: &str) -> ProviderResult<()> {
        let mut inner = self.inner.lock().await;
        inner.enter("DisassociateIamInstanceProfile", association_id)?;
        for associations in inner.state.profile_associations.values_mut() {
            if let Some(pos) = associations.iter().position(|a| a == association_id) {
                associations.remove(pos);
                return Ok(());
            }
        }
        Err(not_found("InvalidAssociationID.NotFound", "association"))
    }

    async fn stop_instance(&self, instance_id: &str) -> ProviderResult<()> {
        let mut inner = self.inner.lock().await;
        inner.enter("StopInstances", instance_id)?;
        let instance = inner
            .state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| not_found("InvalidInstanceID.NotFound", "instance"))?;
        instance.state = "stopped".to_string();
        Ok(())
    }
}

#[async_trait]
impl BulkStore for MemoryCloud {
    async fn put(&self, key: &str, body: Vec<u8>, encryption: &ObjectEncryption) -> ProviderResult<ObjectLocator> {
        let mut inner = self.inner.lock().await;
        inner.enter("PutObject", key)?;
        inner.state.objects.insert(
            key.to_string(),
            StoredObject {
                body,
                encryption: encryption.clone(),
            },
        );
        Ok(ObjectLocator {
            bucket: MEMORY_BUCKET.to_string(),
            key: key.to_string(),
        })
    }

    async fn presign(&self, locator: &ObjectLocator, ttl: Duration) -> ProviderResult<String> {
        let mut inner = self.inner.lock().await;
        inner.enter("PresignObject", &locator.key)?;
        Ok(format!(
            "memory://{}/{}?expires-in={}",
            locator.bucket,
            locator.key,
            ttl.as_secs()
        ))
    }
}

#[async_trait]
impl NotificationChannel for MemoryCloud {
    async fn publish(
        &self,
        channel: &str,
        subject: &str,
        body: &str,
        attributes: &BTreeMap<String, String>,
    ) -> ProviderResult<String> {
        let mut inner = self.inner.lock().await;
        inner.enter("Publish", channel)?;
        let message_id = inner.state.next_id("msg");
        inner.state.outbox.push(PublishedMessage {
            message_id: message_id.clone(),
            channel: channel.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            attributes: attributes.clone(),
        });
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{BlockDevice, NetworkInterface};

    fn world_rule(protocol: &str, from: Option<u16>, to: Option<u16>) -> IpPermission {
        IpPermission {
            protocol: protocol.into(),
            from_port: from,
            to_port: to,
            ipv4_ranges: vec!["0.0.0.0/0".into(), "10.0.0.0/8".into()],
            ipv6_ranges: vec!["::/0".into()],
        }
    }

    #[tokio::test]
    async fn revoke_removes_only_requested_ranges() {
        let cloud = MemoryCloud::new();
        cloud
            .insert_security_group(SecurityGroup {
                group_id: "sg-1".into(),
                ingress: vec![world_rule("tcp", Some(22), Some(22))],
                ..Default::default()
            })
            .await;
        let mut req = world_rule("tcp", Some(22), Some(22)).with_same_scope();
        req.ipv4_ranges = vec!["0.0.0.0/0".into()];
        cloud.revoke_ingress("sg-1", &[req.clone()]).await.unwrap();

        let group = cloud.security_group("sg-1").await.unwrap();
        assert_eq!(group.ingress[0].ipv4_ranges, vec!["10.0.0.0/8".to_string()]);
        assert_eq!(group.ingress[0].ipv6_ranges, vec!["::/0".to_string()]);

        let again = cloud.revoke_ingress("sg-1", &[req]).await.unwrap_err();
        assert_eq!(again.code, "InvalidPermission.NotFound");
        assert!(again.is_not_found());
    }

    #[tokio::test]
    async fn scoped_fault_hits_one_resource() {
        let cloud = MemoryCloud::new();
        cloud.insert_instance(Instance {
            instance_id: "i-1".into(),
            block_devices: vec![
                BlockDevice { device_name: "/dev/xvda".into(), volume_id: Some("vol-a".into()) },
                BlockDevice { device_name: "/dev/xvdb".into(), volume_id: Some("vol-b".into()) },
            ],
            ..Default::default()
        })
        .await;
        cloud.fail_on("CreateSnapshot", "vol-a", "SnapshotLimitExceeded").await;
        assert_eq!(
            cloud.create_snapshot("vol-a", "d", &LabelSet::new()).await.unwrap_err().code,
            "SnapshotLimitExceeded"
        );
        assert!(cloud.create_snapshot("vol-b", "d", &LabelSet::new()).await.is_ok());
        assert_eq!(cloud.snapshots().await.len(), 1);
    }

    #[tokio::test]
    async fn journal_separates_reads_from_mutations() {
        let cloud = MemoryCloud::new();
        cloud.insert_instance(Instance {
            instance_id: "i-1".into(),
            network_interfaces: vec![NetworkInterface { interface_id: "eni-1".into(), groups: vec![] }],
            ..Default::default()
        })
        .await;
        cloud.describe_instance("i-1").await.unwrap();
        cloud.stop_instance("i-1").await.unwrap();
        cloud.stop_instance("i-1").await.unwrap();
        assert_eq!(cloud.calls().await, vec!["DescribeInstances", "StopInstances", "StopInstances"]);
        assert_eq!(cloud.mutations().await, vec!["StopInstances", "StopInstances"]);
        assert_eq!(cloud.instance("i-1").await.unwrap().state, "stopped");
    }

    #[tokio::test]
    async fn new_security_group_allows_all_egress() {
        let cloud = MemoryCloud::new();
        let id = cloud.create_security_group("iso", "d", "vpc-1", &LabelSet::new()).await.unwrap();
        let group = cloud.security_group(&id).await.unwrap();
        assert_eq!(group.egress.len(), 1);
        assert_eq!(cloud.find_security_group("vpc-1", "iso").await.unwrap(), Some(id));
        let dup = cloud.create_security_group("iso", "d", "vpc-1", &LabelSet::new()).await;
        assert_eq!(dup.unwrap_err().code, "InvalidGroup.Duplicate");
    }

    #[test]
    fn world_file_round_trips_without_objects() {
        let json = r#"{"accountId":"1","trails":{"t":{"arn":"arn:t","logging":true}},
            "instances":{"i-1":{"instanceId":"i-1","availabilityZone":"us-east-1a"}}}"#;
        let state: CloudState = serde_json::from_str(json).unwrap();
        assert_eq!(state.instances["i-1"].state, "running");
        assert!(state.trails["t"].logging);
    }
}
