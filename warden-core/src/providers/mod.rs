// warden-core/src/providers/mod.rs
//! Narrow interfaces to the outside world.
//!
//! Handlers never talk to a cloud SDK directly; they go through the traits in
//! this module. The resource schema is kept to what remediation needs: an
//! identifier, a label set and the handful of fields each handler inspects.
//!
//! License: MIT OR Apache-2.0

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::errors::ProviderError;
use crate::labels::LabelSet;

pub mod local_store;
pub mod memory;
pub mod webhook;

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Who the credentials of this process belong to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub account: String,
    pub arn: String,
}

#[async_trait]
pub trait IdentitySource: Send + Sync {
    async fn caller_identity(&self) -> ProviderResult<CallerIdentity>;
}

/// Durable key/value labels on a resource. There is deliberately no way to
/// remove a label.
#[async_trait]
pub trait LabelStore: Send + Sync {
    async fn current_labels(&self, resource: &str) -> ProviderResult<LabelSet>;

    /// Adds or overwrites the given keys, leaving all other labels untouched.
    async fn add_labels(&self, resource: &str, labels: &LabelSet) -> ProviderResult<()>;
}

/// Desired configuration of the protected audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrailSettings {
    pub name: String,
    pub bucket: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_key_id: Option<String>,
    pub multi_region: bool,
    pub include_global_events: bool,
    pub log_file_validation: bool,
    #[serde(default)]
    pub organization_trail: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrailDescriptor {
    pub name: String,
    pub arn: String,
}

#[async_trait]
pub trait TrailApi: Send + Sync {
    /// `Ok(None)` when no trail with exactly this name exists.
    async fn describe_trail(&self, name: &str) -> ProviderResult<Option<TrailDescriptor>>;
    async fn update_trail(&self, settings: &TrailSettings) -> ProviderResult<()>;
    async fn create_trail(&self, settings: &TrailSettings) -> ProviderResult<()>;
    async fn put_event_selectors(&self, name: &str, selectors: &serde_json::Value) -> ProviderResult<()>;
    async fn put_insight_selectors(&self, name: &str, selectors: &serde_json::Value) -> ProviderResult<()>;
    async fn is_logging(&self, name: &str) -> ProviderResult<bool>;
    async fn start_logging(&self, name: &str) -> ProviderResult<()>;
}

/// One ingress/egress permission of a network isolation group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpPermission {
    /// `tcp`, `udp`, `icmp` or `-1` for all traffic.
    pub protocol: String,
    #[serde(default)]
    pub from_port: Option<u16>,
    #[serde(default)]
    pub to_port: Option<u16>,
    #[serde(default)]
    pub ipv4_ranges: Vec<String>,
    #[serde(default)]
    pub ipv6_ranges: Vec<String>,
}

impl IpPermission {
    /// True when this permission lets traffic reach `port` over TCP.
    pub fn covers_tcp_port(&self, port: u16) -> bool {
        match self.protocol.as_str() {
            "tcp" | "6" => match (self.from_port, self.to_port) {
                (Some(from), Some(to)) => from <= port && port <= to,
                _ => false,
            },
            "-1" => true,
            _ => false,
        }
    }

    /// Same protocol and port range, no address ranges.
    pub fn with_same_scope(&self) -> Self {
        Self {
            protocol: self.protocol.clone(),
            from_port: self.from_port,
            to_port: self.to_port,
            ipv4_ranges: Vec::new(),
            ipv6_ranges: Vec::new(),
        }
    }

    pub fn same_scope(&self, other: &IpPermission) -> bool {
        self.protocol == other.protocol
            && self.from_port == other.from_port
            && self.to_port == other.to_port
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroup {
    pub group_id: String,
    #[serde(default)]
    pub group_name: String,
    #[serde(default)]
    pub vpc_id: String,
    #[serde(default)]
    pub ingress: Vec<IpPermission>,
    #[serde(default)]
    pub egress: Vec<IpPermission>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    pub interface_id: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDevice {
    pub device_name: String,
    /// Absent for instance-store devices.
    #[serde(default)]
    pub volume_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub instance_id: String,
    #[serde(default)]
    pub vpc_id: String,
    #[serde(default)]
    pub availability_zone: String,
    #[serde(default = "default_instance_state")]
    pub state: String,
    #[serde(default)]
    pub root_device_name: Option<String>,
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterface>,
    #[serde(default)]
    pub block_devices: Vec<BlockDevice>,
    /// Filled in by `describe_instance`; fixtures keep labels in the label ledger.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: LabelSet,
}

fn default_instance_state() -> String {
    "running".to_string()
}

impl Instance {
    /// Region derived from the availability zone (`us-east-1a` → `us-east-1`).
    pub fn region(&self) -> Option<String> {
        let az = self.availability_zone.trim();
        if az.len() < 2 {
            return None;
        }
        let mut region = az.to_string();
        region.pop();
        Some(region)
    }
}

#[async_trait]
pub trait ComputeApi: Send + Sync {
    async fn describe_instance(&self, instance_id: &str) -> ProviderResult<Instance>;
    async fn describe_security_group(&self, group_id: &str) -> ProviderResult<SecurityGroup>;
    async fn find_security_group(&self, vpc_id: &str, name: &str) -> ProviderResult<Option<String>>;
    async fn create_security_group(
        &self,
        name: &str,
        description: &str,
        vpc_id: &str,
        labels: &LabelSet,
    ) -> ProviderResult<String>;
    async fn revoke_egress(&self, group_id: &str, permissions: &[IpPermission]) -> ProviderResult<()>;
    async fn revoke_ingress(&self, group_id: &str, permissions: &[IpPermission]) -> ProviderResult<()>;
    async fn set_interface_groups(&self, interface_id: &str, groups: &[String]) -> ProviderResult<()>;
    async fn create_snapshot(
        &self,
        volume_id: &str,
        description: &str,
        labels: &LabelSet,
    ) -> ProviderResult<String>;
    async fn profile_associations(&self, instance_id: &str) -> ProviderResult<Vec<String>>;
    async fn disassociate_profile(&self, association_id: &str) -> ProviderResult<()>;
    /// Stopping an already stopped instance succeeds.
    async fn stop_instance(&self, instance_id: &str) -> ProviderResult<()>;
}

/// Server-side encryption requested for a bulk object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "keyId", rename_all = "kebab-case")]
pub enum ObjectEncryption {
    Aes256,
    Kms(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectLocator {
    pub bucket: String,
    pub key: String,
}

#[async_trait]
pub trait BulkStore: Send + Sync {
    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        encryption: &ObjectEncryption,
    ) -> ProviderResult<ObjectLocator>;

    async fn presign(&self, locator: &ObjectLocator, ttl: Duration) -> ProviderResult<String>;
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Returns the message id assigned by the channel.
    async fn publish(
        &self,
        channel: &str,
        subject: &str,
        body: &str,
        attributes: &BTreeMap<String, String>,
    ) -> ProviderResult<String>;
}
