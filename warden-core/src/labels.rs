// warden-core/src/labels.rs
//! Resource labels as the idempotency and audit ledger.
//!
//! Labels are monotonic: remediation only adds keys or overwrites the
//! dynamic ones (status, reason, last fix time, remediator). Baseline labels
//! are written only when the key is absent so operator-set values win.
//! Writing labels is best-effort; a failure is logged and reported as
//! [`LabelWrite::Failed`], never escalated.
//!
//! License: MIT OR Apache-2.0

use log::{debug, warn};
use std::collections::BTreeMap;

use crate::providers::LabelStore;

pub type LabelSet = BTreeMap<String, String>;

pub const STATUS: &str = "Warden:Status";
pub const REASON: &str = "Warden:Reason";
pub const LAST_FIX: &str = "Warden:LastFix";
pub const REMEDIATOR: &str = "Warden:Remediator";
pub const FINDING_TYPE: &str = "Warden:FindingType";
pub const PREVIOUS_GROUPS: &str = "Warden:PrevSGs";
pub const ISOLATION_GROUP: &str = "Warden:IsolationSG";
pub const STOPPED: &str = "Warden:Stopped";
pub const SNAPSHOTS: &str = "Warden:Snapshots";
pub const SNAPSHOT_COUNT: &str = "Warden:SnapshotCount";
pub const INCIDENT_ID: &str = "Warden:IncidentId";
pub const SOURCE_INSTANCE: &str = "Warden:SourceInstance";
pub const SOURCE_VOLUME: &str = "Warden:SourceVolume";
pub const DEVICE_NAME: &str = "Warden:DeviceName";
pub const ROOT_DEVICE: &str = "Warden:RootDevice";
pub const MANAGED: &str = "Warden:Managed";

/// Providers reject longer label values.
pub const MAX_LABEL_VALUE_CHARS: usize = 255;

/// Status values that mean a host has already been contained.
pub const TERMINAL_QUARANTINE_STATUSES: &[&str] = &["quarantined", "isolated"];

/// Result of a best-effort label write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelWrite {
    /// This many keys were added or overwritten.
    Written(usize),
    /// Every requested value was already in place.
    Unchanged,
    /// The resource could not be located, nothing was attempted.
    Skipped,
    Failed(String),
}

impl LabelWrite {
    pub fn is_failure(&self) -> bool {
        matches!(self, LabelWrite::Failed(_))
    }
}

pub fn truncate_value(value: &str) -> String {
    value.chars().take(MAX_LABEL_VALUE_CHARS).collect()
}

/// Computes the keys that have to be written.
///
/// Baseline keys are included only when absent from `existing`; dynamic keys
/// whenever their value differs. Keys not mentioned are left alone, so
/// applying the result can never remove a label.
pub fn plan_label_changes(existing: &LabelSet, baseline: &LabelSet, dynamic: &LabelSet) -> LabelSet {
    let mut desired = LabelSet::new();
    for (key, value) in baseline {
        if !existing.contains_key(key) {
            desired.insert(key.clone(), truncate_value(value));
        }
    }
    for (key, value) in dynamic {
        let value = truncate_value(value);
        if existing.get(key) != Some(&value) {
            desired.insert(key.clone(), value);
        }
    }
    desired
}

/// Fills in missing baseline labels and overwrites dynamic ones on `resource`.
///
/// When the current labels cannot be read, only the dynamic labels are
/// written: without the current set there is no way to tell whether a
/// baseline key is operator-owned.
pub async fn ensure_labels(
    store: &dyn LabelStore,
    resource: &str,
    baseline: &LabelSet,
    dynamic: &LabelSet,
) -> LabelWrite {
    let desired = match store.current_labels(resource).await {
        Ok(existing) => plan_label_changes(&existing, baseline, dynamic),
        Err(e) => {
            warn!("Reading labels of {} failed ({}); writing dynamic labels only.", resource, e.code);
            plan_label_changes(&LabelSet::new(), &LabelSet::new(), dynamic)
        }
    };
    write_labels(store, resource, &desired).await
}

/// Unconditionally writes `labels` (values truncated), logging failures.
pub async fn write_labels(store: &dyn LabelStore, resource: &str, labels: &LabelSet) -> LabelWrite {
    if labels.is_empty() {
        return LabelWrite::Unchanged;
    }
    let bounded: LabelSet = labels
        .iter()
        .map(|(k, v)| (k.clone(), truncate_value(v)))
        .collect();
    match store.add_labels(resource, &bounded).await {
        Ok(()) => {
            debug!("Labelled {} with {:?}", resource, bounded);
            LabelWrite::Written(bounded.len())
        }
        Err(e) => {
            warn!("Labelling {} failed: {}", resource, e.code);
            LabelWrite::Failed(e.code)
        }
    }
}

/// Joins ids with commas, keeping the result within `max_len` characters.
///
/// Ids that do not fit are summarised as a trailing `,+N` (just `+N` when
/// not even the first id fits).
pub fn join_ids_bounded(ids: &[String], max_len: usize) -> String {
    let joined = ids.join(",");
    if joined.chars().count() <= max_len {
        return joined;
    }
    let mut out: Vec<&str> = Vec::new();
    let mut used = 0usize;
    for id in ids {
        let add = if out.is_empty() { 0 } else { 1 } + id.chars().count();
        // room for ",+N"
        if used + add > max_len.saturating_sub(8) {
            let rest = ids.len() - out.len();
            if out.is_empty() {
                return format!("+{}", rest);
            }
            return format!("{},+{}", out.join(","), rest);
        }
        out.push(id);
        used += add;
    }
    out.join(",")
}

/// True when the label set records a finished quarantine.
pub fn is_terminally_quarantined(labels: &LabelSet) -> bool {
    labels
        .get(STATUS)
        .map(|s| {
            let s = s.to_lowercase();
            TERMINAL_QUARANTINE_STATUSES.contains(&s.as_str())
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::memory::MemoryCloud;

    fn set(pairs: &[(&str, &str)]) -> LabelSet {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn baseline_never_clobbers_operator_value() {
        let existing = set(&[("Owner", "secops")]);
        let baseline = set(&[("Owner", "default"), ("CostCenter", "42")]);
        let plan = plan_label_changes(&existing, &baseline, &LabelSet::new());
        assert_eq!(plan, set(&[("CostCenter", "42")]));
    }

    #[test]
    fn dynamic_always_overwrites_and_skips_identical() {
        let existing = set(&[(STATUS, "Error"), (REASON, "Tamper:StopLogging")]);
        let dynamic = set(&[(STATUS, "Remediated"), (REASON, "Tamper:StopLogging")]);
        let plan = plan_label_changes(&existing, &LabelSet::new(), &dynamic);
        assert_eq!(plan, set(&[(STATUS, "Remediated")]));
    }

    #[test]
    fn long_values_are_truncated() {
        let long = "x".repeat(400);
        let plan = plan_label_changes(&LabelSet::new(), &LabelSet::new(), &set(&[(REASON, &long)]));
        assert_eq!(plan[REASON].chars().count(), MAX_LABEL_VALUE_CHARS);
    }

    #[test]
    fn bounded_join_marks_overflow() {
        let ids: Vec<String> = (0..40).map(|i| format!("snap-{:017}", i)).collect();
        let joined = join_ids_bounded(&ids, 255);
        assert!(joined.len() <= 255);
        assert!(joined.contains(",+"));
        let short = vec!["snap-1".to_string(), "snap-2".to_string()];
        assert_eq!(join_ids_bounded(&short, 255), "snap-1,snap-2");
    }

    #[test]
    fn oversized_first_id_leaves_only_the_count() {
        let ids = vec!["s".repeat(300), "snap-2".to_string()];
        assert_eq!(join_ids_bounded(&ids, 255), "+2");
    }

    #[test]
    fn terminal_status_is_case_insensitive() {
        assert!(is_terminally_quarantined(&set(&[(STATUS, "Quarantined")])));
        assert!(is_terminally_quarantined(&set(&[(STATUS, "ISOLATED")])));
        assert!(!is_terminally_quarantined(&set(&[(STATUS, "Remediated")])));
        assert!(!is_terminally_quarantined(&LabelSet::new()));
    }

    #[tokio::test]
    async fn ensure_labels_keeps_every_existing_key() {
        let cloud = MemoryCloud::new();
        cloud
            .seed_labels("i-1", set(&[("Owner", "secops"), ("Team", "infra"), (STATUS, "Error")]))
            .await;

        let outcome = ensure_labels(
            &cloud,
            "i-1",
            &set(&[("Owner", "default"), ("Env", "prod")]),
            &set(&[(STATUS, "Remediated")]),
        )
        .await;
        assert_eq!(outcome, LabelWrite::Written(2));

        let labels = cloud.labels_of("i-1").await;
        assert_eq!(labels["Owner"], "secops");
        assert_eq!(labels["Team"], "infra");
        assert_eq!(labels["Env"], "prod");
        assert_eq!(labels[STATUS], "Remediated");
    }

    #[tokio::test]
    async fn write_failure_is_reported_not_raised() {
        let cloud = MemoryCloud::new();
        cloud.fail("AddTags", "AccessDenied").await;
        let outcome = ensure_labels(&cloud, "i-1", &LabelSet::new(), &set(&[(STATUS, "Remediated")])).await;
        assert_eq!(outcome, LabelWrite::Failed("AccessDenied".into()));
    }

    #[tokio::test]
    async fn unreadable_labels_write_dynamic_only() {
        let cloud = MemoryCloud::new();
        cloud.seed_labels("i-1", set(&[("Owner", "secops")])).await;
        cloud.fail("ListTags", "Throttling").await;
        ensure_labels(
            &cloud,
            "i-1",
            &set(&[("Owner", "default")]),
            &set(&[(STATUS, "Remediated")]),
        )
        .await;
        let labels = cloud.labels_of("i-1").await;
        assert_eq!(labels["Owner"], "secops");
        assert_eq!(labels[STATUS], "Remediated");
    }
}
