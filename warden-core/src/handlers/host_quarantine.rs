// warden-core/src/handlers/host_quarantine.rs
//! Compromised host quarantine.
//!
//! A detector finding names an instance: cut it off the network with an
//! isolation group, snapshot its volumes for forensics, pull its instance
//! profile, stop it, and raise a HIGH report. Each of the four actions is an
//! independent step. A host whose status label already says it was
//! contained is skipped. When the instance cannot be described the report is
//! still sent, as alert-only, and nothing is mutated.
//!
//! License: MIT OR Apache-2.0

use async_trait::async_trait;
use log::{info, warn};
use serde_json::Value;
use std::sync::Arc;

use crate::config::HostQuarantineConfig;
use crate::context::RemediationContext;
use crate::errors::{ProviderError, StepError};
use crate::event::{str_at, utc_now_string, IncidentEvent};
use crate::executor::{ExecutionReport, RemediationStep, StepCompletion, StepResult};
use crate::guards::{check_idempotency, GuardChain, GuardVerdict, KindFilter, NoProbe, SkipReason};
use crate::handlers::{HandlerKind, IncidentHandler};
use crate::labels::{self, is_terminally_quarantined, join_ids_bounded, write_labels, LabelSet, MAX_LABEL_VALUE_CHARS};
use crate::notify::{IncidentReport, ReportSection, Severity};
use crate::outcome::{CompletedOutcome, InvocationOutcome};
use crate::providers::{ComputeApi, Instance, LabelStore};

pub const REMEDIATOR: &str = "Warden-HostQuarantine";

/// Keys hand-crafted test events may use for the instance id.
const MANUAL_ID_KEYS: &[&str] = &["instanceId", "InstanceId", "testInstanceId"];

const NONE_MARK: &str = "-";

/// Instance id of a finding, or of a manual test event.
pub fn extract_instance_id(raw: &Value) -> Option<String> {
    let from_finding = str_at(raw, &["detail", "resource", "instanceDetails", "instanceId"]);
    if !from_finding.is_empty() {
        return Some(from_finding.to_string());
    }
    for key in MANUAL_ID_KEYS {
        for scope in [Some(raw), raw.get("detail")].into_iter().flatten() {
            if let Some(id) = scope.get(*key).and_then(Value::as_str).filter(|s| !s.is_empty()) {
                return Some(id.to_string());
            }
        }
    }
    None
}

fn reason_for(finding_type: &str) -> &'static str {
    if finding_type.is_empty() || finding_type.starts_with("CryptoCurrency") {
        "CryptoMiningSuspected"
    } else {
        "CompromiseSuspected"
    }
}

fn label(pairs: &[(&str, &str)]) -> LabelSet {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

/// What the quarantine steps share and produce.
pub struct QuarantineState {
    pub instance: Instance,
    pub when: String,
    pub incident_id: String,
    /// Finding type, `manual-test` for untyped events.
    pub finding_type: String,
    pub reason: String,
    pub isolation_group: Option<String>,
    pub previous_groups: Vec<String>,
    pub snapshots: Vec<String>,
    pub stopped: bool,
}

struct Isolate {
    compute: Arc<dyn ComputeApi>,
    labels: Arc<dyn LabelStore>,
    configured_group: Option<String>,
    group_name: String,
}

impl Isolate {
    async fn ensure_group(&self, vpc_id: &str) -> Result<String, ProviderError> {
        if let Some(id) = self.configured_group.as_ref().filter(|id| !id.is_empty()) {
            return Ok(id.clone());
        }
        match self.compute.find_security_group(vpc_id, &self.group_name).await {
            Ok(Some(id)) => return Ok(id),
            Ok(None) => {}
            Err(e) => warn!("Looking up isolation group failed ({}); creating one.", e.code),
        }
        let group_labels = label(&[("Name", self.group_name.as_str()), (labels::MANAGED, "true")]);
        let id = self
            .compute
            .create_security_group(
                &self.group_name,
                "Quarantine group: blocks all ingress and egress",
                vpc_id,
                &group_labels,
            )
            .await?;
        match self.compute.describe_security_group(&id).await {
            Ok(group) if !group.egress.is_empty() => {
                if let Err(e) = self.compute.revoke_egress(&id, &group.egress).await {
                    warn!("Revoking default egress of {} failed: {}", id, e.code);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Describing new isolation group {} failed: {}", id, e.code),
        }
        info!("Created isolation group {} in {}", id, vpc_id);
        Ok(id)
    }
}

#[async_trait]
impl RemediationStep<QuarantineState> for Isolate {
    fn name(&self) -> &str {
        "isolation"
    }

    async fn apply(&self, state: &mut QuarantineState) -> StepResult {
        let group = self.ensure_group(&state.instance.vpc_id).await?;
        state.isolation_group = Some(group.clone());

        let mut previous = Vec::new();
        for ni in &state.instance.network_interfaces {
            previous.extend(ni.groups.iter().cloned());
            self.compute
                .set_interface_groups(&ni.interface_id, std::slice::from_ref(&group))
                .await?;
        }
        previous.sort();
        previous.dedup();
        previous.retain(|g| g != &group);
        state.previous_groups = previous;

        let mut written = label(&[(labels::ISOLATION_GROUP, group.as_str())]);
        if !state.previous_groups.is_empty() {
            written.insert(
                labels::PREVIOUS_GROUPS.to_string(),
                join_ids_bounded(&state.previous_groups, MAX_LABEL_VALUE_CHARS),
            );
        }
        write_labels(self.labels.as_ref(), &state.instance.instance_id, &written).await;

        Ok(StepCompletion::applied(format!("IsolationSG:{}", group)))
    }
}

struct Snapshot {
    compute: Arc<dyn ComputeApi>,
    labels: Arc<dyn LabelStore>,
    enabled: bool,
}

impl Snapshot {
    fn forensic_labels(state: &QuarantineState, volume_id: &str, device: &str) -> LabelSet {
        let instance = &state.instance;
        let is_root = !device.is_empty() && instance.root_device_name.as_deref() == Some(device);
        let reason = format!("Forensics:{}", state.reason);
        let mut set = label(&[
            (labels::REASON, reason.as_str()),
            (labels::LAST_FIX, state.when.as_str()),
            (labels::FINDING_TYPE, state.finding_type.as_str()),
            (labels::INCIDENT_ID, state.incident_id.as_str()),
            (labels::SOURCE_INSTANCE, instance.instance_id.as_str()),
            (labels::SOURCE_VOLUME, volume_id),
            (labels::DEVICE_NAME, device),
            (labels::ROOT_DEVICE, if is_root { "true" } else { "false" }),
            (labels::ISOLATION_GROUP, state.isolation_group.as_deref().unwrap_or("")),
            (labels::REMEDIATOR, REMEDIATOR),
        ]);
        let display = if device.is_empty() { volume_id } else { device };
        set.insert(
            "Name".to_string(),
            format!("Warden Forensics {} {} {}", instance.instance_id, display, state.when),
        );
        set.into_iter().map(|(k, v)| (k, labels::truncate_value(&v))).collect()
    }
}

#[async_trait]
impl RemediationStep<QuarantineState> for Snapshot {
    fn name(&self) -> &str {
        "snapshots"
    }

    async fn apply(&self, state: &mut QuarantineState) -> StepResult {
        if !self.enabled {
            return Ok(StepCompletion::Skipped("snapshots disabled".to_string()));
        }
        let volumes: Vec<(String, String)> = state
            .instance
            .block_devices
            .iter()
            .filter_map(|b| b.volume_id.clone().map(|v| (v, b.device_name.clone())))
            .collect();
        if volumes.is_empty() {
            return Ok(StepCompletion::Skipped("no block volumes".to_string()));
        }

        let mut last_error = None;
        for (volume_id, device) in &volumes {
            let description = format!(
                "Warden snapshot - {} - {} ({})",
                state.instance.instance_id,
                volume_id,
                if device.is_empty() { "unknown" } else { device.as_str() }
            );
            let forensic = Self::forensic_labels(state, volume_id, device);
            match self.compute.create_snapshot(volume_id, &description, &forensic).await {
                Ok(id) => state.snapshots.push(id),
                Err(e) => {
                    warn!("Snapshot of {} failed: {}", volume_id, e.code);
                    last_error = Some(e);
                }
            }
        }

        if state.snapshots.is_empty() {
            if let Some(e) = last_error {
                return Err(e.into());
            }
        }
        let ids = join_ids_bounded(&state.snapshots, MAX_LABEL_VALUE_CHARS);
        let count = state.snapshots.len().to_string();
        let written = label(&[(labels::SNAPSHOTS, ids.as_str()), (labels::SNAPSHOT_COUNT, count.as_str())]);
        write_labels(self.labels.as_ref(), &state.instance.instance_id, &written).await;
        Ok(StepCompletion::applied(format!("Snapshots:{}", state.snapshots.len())))
    }
}

struct DetachProfile {
    compute: Arc<dyn ComputeApi>,
    enabled: bool,
}

#[async_trait]
impl RemediationStep<QuarantineState> for DetachProfile {
    fn name(&self) -> &str {
        "detach_profile"
    }

    async fn apply(&self, state: &mut QuarantineState) -> StepResult {
        if !self.enabled {
            return Ok(StepCompletion::Skipped("profile detach disabled".to_string()));
        }
        let associations = self.compute.profile_associations(&state.instance.instance_id).await?;
        if associations.is_empty() {
            return Ok(StepCompletion::Skipped("no instance profile attached".to_string()));
        }
        let mut failure: Option<ProviderError> = None;
        let mut detached = 0usize;
        for association in &associations {
            match self.compute.disassociate_profile(association).await {
                Ok(()) => detached += 1,
                Err(e) if e.is_not_found() => info!("{} already disassociated ({})", association, e.code),
                Err(e) => {
                    warn!("Disassociating {} failed: {}", association, e.code);
                    failure = Some(e);
                }
            }
        }
        match failure {
            Some(e) => Err(e.into()),
            None if detached == 0 => Ok(StepCompletion::Skipped("instance profile already detached".to_string())),
            None => Ok(StepCompletion::applied("DetachInstanceProfile")),
        }
    }
}

struct Stop {
    compute: Arc<dyn ComputeApi>,
    labels: Arc<dyn LabelStore>,
    enabled: bool,
}

#[async_trait]
impl RemediationStep<QuarantineState> for Stop {
    fn name(&self) -> &str {
        "stop"
    }

    async fn apply(&self, state: &mut QuarantineState) -> StepResult {
        if !self.enabled {
            return Ok(StepCompletion::Skipped("stop disabled".to_string()));
        }
        let id = state.instance.instance_id.clone();
        let result = self.compute.stop_instance(&id).await;
        state.stopped = result.is_ok();
        let flag = if state.stopped { "true" } else { "false" };
        write_labels(self.labels.as_ref(), &id, &label(&[(labels::STOPPED, flag)])).await;
        result.map_err(StepError::from)?;
        Ok(StepCompletion::applied("StopInstance"))
    }
}

fn or_none(items: &[String]) -> String {
    if items.is_empty() {
        NONE_MARK.to_string()
    } else {
        items.join(", ")
    }
}

pub struct HostQuarantineHandler {
    cfg: HostQuarantineConfig,
}

impl HostQuarantineHandler {
    pub fn new(cfg: HostQuarantineConfig) -> Self {
        Self { cfg }
    }

    fn steps(&self, ctx: &RemediationContext) -> Vec<Box<dyn RemediationStep<QuarantineState>>> {
        let compute = ctx.cloud.compute.clone();
        let store = ctx.cloud.labels.clone();
        let mut steps: Vec<Box<dyn RemediationStep<QuarantineState>>> = Vec::with_capacity(4);
        steps.push(Box::new(Isolate {
            compute: compute.clone(),
            labels: store.clone(),
            configured_group: self.cfg.isolation_group_id.clone(),
            group_name: self.cfg.isolation_group_name.clone(),
        }));
        steps.push(Box::new(Snapshot {
            compute: compute.clone(),
            labels: store.clone(),
            enabled: self.cfg.take_snapshots,
        }));
        steps.push(Box::new(DetachProfile {
            compute: compute.clone(),
            enabled: self.cfg.detach_profile,
        }));
        steps.push(Box::new(Stop {
            compute,
            labels: store,
            enabled: self.cfg.stop_instance,
        }));
        steps
    }

    async fn alert_only(
        &self,
        ctx: &RemediationContext,
        event: &IncidentEvent,
        instance_id: &str,
        err: ProviderError,
    ) -> InvocationOutcome {
        warn!("DescribeInstances {} failed: {}; sending alert only.", instance_id, err.code);
        let finding = if event.is_untyped() { "unknown" } else { event.kind.as_str() };
        let error = format!("describe-failed:{}", err.code);

        let mut report = IncidentReport::new(
            Severity::High,
            format!(
                "[Warden/HIGH] Compromised host finding (alert-only) → {} ({})",
                instance_id, event.region
            ),
            "[Warden] Compromised host auto-remediation",
        )
        .meta("Time (UTC)", utc_now_string())
        .meta("Region", event.region.clone())
        .meta("Account", ctx.me.account_id.clone())
        .meta("Instance", instance_id)
        .meta("Finding", finding)
        .attribute("service", "compute")
        .attribute("automation", "warden-host-quarantine")
        .attribute("findingType", finding)
        .attribute("alertOnly", true)
        .attribute("sample", event.sample);
        report.sections.push(ReportSection {
            title: "Note".to_string(),
            lines: vec!["Instance could not be described (sample finding, wrong region or already gone).".to_string()],
        });
        report.errors = vec![error.clone()];
        let delivery = ctx.notifier.notify(report, event).await;

        InvocationOutcome::Completed(CompletedOutcome {
            ok: false,
            errors: vec![error],
            error: Some("describe-failed".to_string()),
            alert_only: Some(true),
            sample: Some(event.sample),
            target: Some(instance_id.to_string()),
            notification: Some(delivery),
            ..Default::default()
        })
    }

    fn report(
        &self,
        ctx: &RemediationContext,
        event: &IncidentEvent,
        region: &str,
        state: &QuarantineState,
        exec: &ExecutionReport,
    ) -> IncidentReport {
        let id = &state.instance.instance_id;
        let mut report = IncidentReport::new(
            Severity::High,
            format!("[Warden/HIGH] Compromised host quarantined → {} ({})", id, region),
            "[Warden] Compromised host auto-remediation",
        )
        .meta("Time (UTC)", state.when.clone())
        .meta("Region", region)
        .meta("Account", ctx.me.account_id.clone())
        .meta("Instance", id.clone())
        .meta("Finding", state.finding_type.clone())
        .attribute("service", "compute")
        .attribute("automation", "warden-host-quarantine")
        .attribute("findingType", &state.finding_type)
        .attribute("stopped", state.stopped);
        report.sections.push(ReportSection {
            title: "Containment".to_string(),
            lines: vec![
                format!(
                    "- Network isolated via group: {}",
                    state.isolation_group.as_deref().unwrap_or(NONE_MARK)
                ),
                format!("- Previous groups: {}", or_none(&state.previous_groups[..])),
                format!("- Snapshots: {}", or_none(&state.snapshots[..])),
                format!("- Instance stopped: {}", state.stopped),
            ],
        });
        if !event.actor.is_empty() {
            report.actor = Some(event.actor.clone());
        }
        report.actions = exec.actions.clone();
        report.errors = exec.errors.clone();
        report
    }
}

#[async_trait]
impl IncidentHandler for HostQuarantineHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::HostQuarantine
    }

    /// `Status=Quarantined` is written before the containment steps run, so a
    /// redelivered finding is skipped even when a step of the first run
    /// failed. Those failures are in the first run's report; containment is
    /// not retried automatically.
    async fn handle(&self, ctx: &RemediationContext, event: &IncidentEvent) -> InvocationOutcome {
        let chain = GuardChain {
            kinds: KindFilter::Prefix {
                prefix: self.cfg.finding_prefix.clone(),
                allow_untyped: self.cfg.allow_untyped,
            },
            me: ctx.me.clone(),
            check_actor: false,
            target: None,
        };
        if let GuardVerdict::Skip(reason) = chain.evaluate(event, None, &NoProbe).await {
            return InvocationOutcome::skipped(reason, &event.kind);
        }

        let Some(instance_id) = extract_instance_id(&event.raw) else {
            info!("skip: no instance id in event");
            return InvocationOutcome::skipped(SkipReason::NoTargetId, &event.kind);
        };

        let instance = match ctx.cloud.compute.describe_instance(&instance_id).await {
            Ok(instance) => instance,
            Err(e) => return self.alert_only(ctx, event, &instance_id, e).await,
        };

        if let GuardVerdict::Skip(reason) = check_idempotency(is_terminally_quarantined(&instance.labels)) {
            info!("already quarantined: {}", instance_id);
            return InvocationOutcome::skipped(reason, &event.kind);
        }

        let region = instance.region().unwrap_or_else(|| event.region.clone());
        let when = utc_now_string();
        let finding_type = if event.is_untyped() {
            "manual-test".to_string()
        } else {
            event.kind.clone()
        };
        let reason = reason_for(if event.is_untyped() { "" } else { event.kind.as_str() });
        let incident_id = event
            .finding_id
            .clone()
            .unwrap_or_else(|| format!("manual-{}", when));

        let base = label(&[
            (labels::STATUS, "Quarantined"),
            (labels::REASON, reason),
            (labels::LAST_FIX, when.as_str()),
            (labels::FINDING_TYPE, finding_type.as_str()),
            (labels::REMEDIATOR, REMEDIATOR),
        ]);
        write_labels(ctx.cloud.labels.as_ref(), &instance_id, &base).await;

        let mut state = QuarantineState {
            instance,
            when,
            incident_id,
            finding_type,
            reason: reason.to_string(),
            isolation_group: None,
            previous_groups: Vec::new(),
            snapshots: Vec::new(),
            stopped: false,
        };
        let exec = ctx.executor.run(&mut state, &self.steps(ctx)).await;

        let report = self.report(ctx, event, &region, &state, &exec);
        let delivery = ctx.notifier.notify(report, event).await;

        let mut outcome = CompletedOutcome::from(exec);
        outcome.target = Some(instance_id);
        outcome.sample = Some(event.sample);
        outcome.notification = Some(delivery);
        InvocationOutcome::Completed(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn instance_id_from_finding_then_manual_keys() {
        let finding = json!({"detail": {"resource": {"instanceDetails": {"instanceId": "i-0abc"}}}});
        assert_eq!(extract_instance_id(&finding).as_deref(), Some("i-0abc"));
        assert_eq!(extract_instance_id(&json!({"InstanceId": "i-1"})).as_deref(), Some("i-1"));
        assert_eq!(
            extract_instance_id(&json!({"detail": {"testInstanceId": "i-2"}})).as_deref(),
            Some("i-2")
        );
        assert_eq!(extract_instance_id(&json!({"detail": {"instanceId": ""}})), None);
        assert_eq!(extract_instance_id(&json!("x")), None);
    }

    #[test]
    fn reason_follows_finding_family() {
        assert_eq!(reason_for("CryptoCurrency:EC2/BitcoinTool.B!DNS"), "CryptoMiningSuspected");
        assert_eq!(reason_for(""), "CryptoMiningSuspected");
        assert_eq!(reason_for("Backdoor:EC2/C&CActivity.B"), "CompromiseSuspected");
    }
}
