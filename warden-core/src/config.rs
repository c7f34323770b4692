//! Configuration management for `warden-core`.
//!
//! A single typed [`WardenConfig`] is loaded once at process start: YAML file
//! first (every field has an explicit default), then the closed set of
//! environment keys in [`ENV_KEYS`], then [`WardenConfig::validate`]. Anything
//! wrong at this stage is a setup failure and no event is handled.
//!
//! License: MIT OR Apache-2.0

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::WardenError;
use crate::executor::RetryPolicy;
use crate::identity::IdentityOverrides;
use crate::labels::LabelSet;
use crate::notify::{NotifierSettings, SeverityChannels};
use crate::providers::{ObjectEncryption, TrailSettings};

/// Longest raw-event snippet a report may carry.
pub const MAX_SNIPPET_CHARS: usize = 64 * 1024;

/// Longest lifetime of a presigned dump link (seven days).
pub const MAX_PRESIGN_TTL_SECS: u64 = 7 * 24 * 3600;

/// Every environment key [`WardenConfig::apply_env_overrides`] understands.
pub const ENV_KEYS: &[&str] = &[
    "AWS_REGION",
    "TRAIL_NAME",
    "LOG_BUCKET",
    "LOG_PREFIX",
    "KMS_KEY_ID",
    "MULTI_REGION",
    "INCLUDE_GLOBAL",
    "LOG_VALIDATION",
    "ORG_TRAIL",
    "BASELINE_TAGS_JSON",
    "EVENT_SELECTORS_JSON",
    "INSIGHT_SELECTORS_JSON",
    "ALLOWED_EVENTS",
    "SELF_ROLE_NAME",
    "SELF_ROLE_ARN",
    "SNS_HIGH",
    "SNS_MED",
    "ADMIN_PORTS",
    "STOP_INSTANCE",
    "DETACH_PROFILE",
    "TAKE_SNAPSHOTS",
    "ISOLATION_SG_ID",
    "FINDING_PREFIX",
    "EVENT_DUMP_BUCKET",
    "EVENT_DUMP_PREFIX",
    "EVENT_DUMP_KMS_ARN",
    "PRESIGN_TTL_SECS",
    "TRUNCATE_LEN",
    "INCLUDE_EVENT_SNIPPET",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Required. Channel reference for HIGH severity reports.
    pub high: String,
    /// MEDIUM severity reports; falls back to `high`.
    pub medium: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub include_snippet: bool,
    pub snippet_max_chars: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            include_snippet: true,
            snippet_max_chars: 1200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EventDumpConfig {
    /// Dumping is off unless a bucket is named.
    pub bucket: Option<String>,
    pub prefix: String,
    pub kms_key_arn: Option<String>,
    pub presign_ttl_secs: u64,
}

impl Default for EventDumpConfig {
    fn default() -> Self {
        Self {
            bucket: None,
            prefix: "warden/events".to_string(),
            kms_key_arn: None,
            presign_ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TuningConfig {
    pub create_backoff_ms: Vec<u64>,
    pub poll_attempts: u32,
    pub poll_interval_ms: u64,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            create_backoff_ms: vec![800, 1500, 3000],
            poll_attempts: 4,
            poll_interval_ms: 1000,
        }
    }
}

/// The protected audit trail and how tamper events are recognised.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TrailTamperConfig {
    pub trail_name: String,
    pub log_bucket: String,
    pub log_prefix: Option<String>,
    pub kms_key_id: Option<String>,
    pub multi_region: bool,
    pub include_global_events: bool,
    pub log_file_validation: bool,
    pub organization_trail: bool,
    pub allowed_events: Vec<String>,
    /// Written on the trail only where the key is absent.
    pub baseline_labels: LabelSet,
    pub event_selectors: Option<serde_json::Value>,
    pub insight_selectors: Option<serde_json::Value>,
}

impl Default for TrailTamperConfig {
    fn default() -> Self {
        Self {
            trail_name: String::new(),
            log_bucket: String::new(),
            log_prefix: None,
            kms_key_id: None,
            multi_region: true,
            include_global_events: true,
            log_file_validation: true,
            organization_trail: false,
            allowed_events: ["StopLogging", "DeleteTrail", "UpdateTrail", "PutEventSelectors"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            baseline_labels: LabelSet::new(),
            event_selectors: None,
            insight_selectors: None,
        }
    }
}

impl TrailTamperConfig {
    pub fn trail_settings(&self) -> TrailSettings {
        TrailSettings {
            name: self.trail_name.clone(),
            bucket: self.log_bucket.clone(),
            prefix: self
                .log_prefix
                .as_deref()
                .map(|p| p.trim_matches('/').to_string())
                .filter(|p| !p.is_empty()),
            kms_key_id: self.kms_key_id.clone().filter(|k| !k.is_empty()),
            multi_region: self.multi_region,
            include_global_events: self.include_global_events,
            log_file_validation: self.log_file_validation,
            organization_trail: self.organization_trail,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct HostQuarantineConfig {
    pub finding_prefix: String,
    /// Accept hand-crafted events with no finding type.
    pub allow_untyped: bool,
    pub stop_instance: bool,
    pub detach_profile: bool,
    pub take_snapshots: bool,
    /// Pre-created isolation group; otherwise found or created by name.
    pub isolation_group_id: Option<String>,
    pub isolation_group_name: String,
}

impl Default for HostQuarantineConfig {
    fn default() -> Self {
        Self {
            finding_prefix: "CryptoCurrency:EC2/".to_string(),
            allow_untyped: true,
            stop_instance: true,
            detach_profile: true,
            take_snapshots: true,
            isolation_group_id: None,
            isolation_group_name: "Warden-Isolation-SG".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminPortConfig {
    pub ports: Vec<u16>,
    pub allowed_events: Vec<String>,
    /// When non-empty, only these groups are remediated.
    pub scope_groups: Vec<String>,
}

impl Default for AdminPortConfig {
    fn default() -> Self {
        Self {
            ports: vec![22, 3389],
            allowed_events: vec![
                "AuthorizeSecurityGroupIngress".to_string(),
                "ModifySecurityGroupRules".to_string(),
            ],
            scope_groups: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WardenConfig {
    pub default_region: String,
    pub identity: IdentityOverrides,
    pub channels: ChannelConfig,
    pub notification: NotificationConfig,
    pub event_dump: EventDumpConfig,
    pub tuning: TuningConfig,
    pub trail_tamper: Option<TrailTamperConfig>,
    pub host_quarantine: HostQuarantineConfig,
    pub admin_ports: AdminPortConfig,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            default_region: "us-east-1".to_string(),
            identity: IdentityOverrides::default(),
            channels: ChannelConfig::default(),
            notification: NotificationConfig::default(),
            event_dump: EventDumpConfig::default(),
            tuning: TuningConfig::default(),
            trail_tamper: None,
            host_quarantine: HostQuarantineConfig::default(),
            admin_ports: AdminPortConfig::default(),
        }
    }
}

/// `1`, `true`, `yes`, `on` (any case) are true; everything else is false.
pub fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn comma_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn non_empty(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() {
        None
    } else {
        Some(v.to_string())
    }
}

fn invalid(key: &str, reason: impl ToString) -> WardenError {
    WardenError::InvalidOption {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, WardenError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| invalid(key, e))
}

fn parse_json(key: &str, value: &str) -> Result<Option<serde_json::Value>, WardenError> {
    if value.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(value).map(Some).map_err(|e| invalid(key, e))
}

/// JSON object → labels. Non-string values are stored in their JSON form.
fn parse_label_json(key: &str, value: &str) -> Result<LabelSet, WardenError> {
    match parse_json(key, value)? {
        None => Ok(LabelSet::new()),
        Some(serde_json::Value::Object(map)) => Ok(map
            .into_iter()
            .map(|(k, v)| {
                let v = match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, v)
            })
            .collect()),
        Some(_) => Err(invalid(key, "expected a JSON object")),
    }
}

impl WardenConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, WardenError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yml::from_str(text).map_err(|e| WardenError::Parse(e.to_string()))
    }

    /// Loads a YAML file. Does not validate; call [`WardenConfig::validate`]
    /// once the environment has been applied.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, WardenError> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
            .map_err(|e| WardenError::Parse(format!("{}: {}", path.display(), e)))
    }

    /// Applies the recognised keys of `vars` on top of the loaded file.
    /// Unknown keys are ignored.
    pub fn apply_env_overrides<I, K, V>(&mut self, vars: I) -> Result<(), WardenError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let (key, value) = (key.as_ref(), value.as_ref());
            if !ENV_KEYS.contains(&key) {
                continue;
            }
            debug!("config override from environment: {}", key);
            self.apply_one(key, value)?;
        }
        Ok(())
    }

    fn trail_mut(&mut self) -> &mut TrailTamperConfig {
        self.trail_tamper.get_or_insert_with(TrailTamperConfig::default)
    }

    fn apply_one(&mut self, key: &str, value: &str) -> Result<(), WardenError> {
        match key {
            "AWS_REGION" => {
                if let Some(r) = non_empty(value) {
                    self.default_region = r;
                }
            }
            "TRAIL_NAME" => self.trail_mut().trail_name = value.trim().to_string(),
            "LOG_BUCKET" => self.trail_mut().log_bucket = value.trim().to_string(),
            "LOG_PREFIX" => self.trail_mut().log_prefix = non_empty(value),
            "KMS_KEY_ID" => self.trail_mut().kms_key_id = non_empty(value),
            "MULTI_REGION" => self.trail_mut().multi_region = parse_flag(value),
            "INCLUDE_GLOBAL" => self.trail_mut().include_global_events = parse_flag(value),
            "LOG_VALIDATION" => self.trail_mut().log_file_validation = parse_flag(value),
            "ORG_TRAIL" => self.trail_mut().organization_trail = parse_flag(value),
            "BASELINE_TAGS_JSON" => self.trail_mut().baseline_labels = parse_label_json(key, value)?,
            "EVENT_SELECTORS_JSON" => self.trail_mut().event_selectors = parse_json(key, value)?,
            "INSIGHT_SELECTORS_JSON" => self.trail_mut().insight_selectors = parse_json(key, value)?,
            "ALLOWED_EVENTS" => self.trail_mut().allowed_events = comma_list(value),
            "SELF_ROLE_NAME" => self.identity.role_name = non_empty(value),
            "SELF_ROLE_ARN" => self.identity.role_arn = non_empty(value),
            "SNS_HIGH" => self.channels.high = value.trim().to_string(),
            "SNS_MED" => self.channels.medium = non_empty(value),
            "ADMIN_PORTS" => {
                self.admin_ports.ports = comma_list(value)
                    .iter()
                    .map(|p| parse_number::<u16>(key, p))
                    .collect::<Result<Vec<_>, _>>()?;
            }
            "STOP_INSTANCE" => self.host_quarantine.stop_instance = parse_flag(value),
            "DETACH_PROFILE" => self.host_quarantine.detach_profile = parse_flag(value),
            "TAKE_SNAPSHOTS" => self.host_quarantine.take_snapshots = parse_flag(value),
            "ISOLATION_SG_ID" => self.host_quarantine.isolation_group_id = non_empty(value),
            "FINDING_PREFIX" => self.host_quarantine.finding_prefix = value.to_string(),
            "EVENT_DUMP_BUCKET" => self.event_dump.bucket = non_empty(value),
            "EVENT_DUMP_PREFIX" => self.event_dump.prefix = value.trim().to_string(),
            "EVENT_DUMP_KMS_ARN" => self.event_dump.kms_key_arn = non_empty(value),
            "PRESIGN_TTL_SECS" => self.event_dump.presign_ttl_secs = parse_number(key, value)?,
            "TRUNCATE_LEN" => self.notification.snippet_max_chars = parse_number(key, value)?,
            "INCLUDE_EVENT_SNIPPET" => self.notification.include_snippet = parse_flag(value),
            other => warn!("recognised key {} has no handler", other),
        }
        Ok(())
    }

    /// Checks everything that can be checked before the first event.
    /// All problems are reported together.
    pub fn validate(&self) -> Result<(), WardenError> {
        let mut errors = Vec::new();

        if self.channels.high.trim().is_empty() {
            errors.push("channels.high (SNS_HIGH) is required.".to_string());
        }

        if let Some(trail) = &self.trail_tamper {
            if trail.trail_name.trim().is_empty() {
                errors.push("trail_tamper.trail_name (TRAIL_NAME) is required.".to_string());
            }
            if trail.log_bucket.trim().is_empty() {
                errors.push("trail_tamper.log_bucket (LOG_BUCKET) is required.".to_string());
            }
            if trail.allowed_events.is_empty() {
                errors.push("trail_tamper.allowed_events must name at least one event.".to_string());
            }
        }

        if self.admin_ports.ports.is_empty() {
            errors.push("admin_ports.ports must not be empty.".to_string());
        }
        if self.admin_ports.ports.contains(&0) {
            errors.push("admin_ports.ports must be within 1..=65535.".to_string());
        }

        if self.tuning.create_backoff_ms.is_empty() {
            errors.push("tuning.create_backoff_ms must not be empty.".to_string());
        }
        if self.tuning.poll_attempts == 0 {
            errors.push("tuning.poll_attempts must be at least 1.".to_string());
        }

        if self.notification.snippet_max_chars > MAX_SNIPPET_CHARS {
            errors.push(format!(
                "notification.snippet_max_chars must be at most {}.",
                MAX_SNIPPET_CHARS
            ));
        }

        if self.event_dump.bucket.is_some()
            && (self.event_dump.presign_ttl_secs == 0 || self.event_dump.presign_ttl_secs > MAX_PRESIGN_TTL_SECS)
        {
            errors.push(format!(
                "event_dump.presign_ttl_secs must be within 1..={}.",
                MAX_PRESIGN_TTL_SECS
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(WardenError::InvalidConfig(errors.join("\n")))
        }
    }

    pub fn severity_channels(&self) -> SeverityChannels {
        SeverityChannels {
            high: self.channels.high.clone(),
            medium: self
                .channels
                .medium
                .clone()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| self.channels.high.clone()),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            create_backoff: self
                .tuning
                .create_backoff_ms
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            poll_attempts: self.tuning.poll_attempts,
            poll_interval: Duration::from_millis(self.tuning.poll_interval_ms),
        }
    }

    pub fn notifier_settings(&self) -> NotifierSettings {
        NotifierSettings {
            include_snippet: self.notification.include_snippet,
            snippet_max_chars: self.notification.snippet_max_chars,
        }
    }

    pub fn dump_encryption(&self) -> ObjectEncryption {
        match &self.event_dump.kms_key_arn {
            Some(key) if !key.is_empty() => ObjectEncryption::Kms(key.clone()),
            _ => ObjectEncryption::Aes256,
        }
    }

    pub fn presign_ttl(&self) -> Duration {
        Duration::from_secs(self.event_dump.presign_ttl_secs)
    }
}
