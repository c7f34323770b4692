// warden-core/src/handlers/admin_port.rs
//! Admin ports opened to the world.
//!
//! An ingress change on a network isolation group left SSH, RDP or another
//! configured admin port reachable from `0.0.0.0/0` or `::/0`. Every world
//! range covering such a port is revoked, other ranges of the same rule are
//! kept. One step per group, so a failure on one group leaves the others
//! remediated. Nothing left to revoke means nothing to report.
//!
//! License: MIT OR Apache-2.0

use async_trait::async_trait;
use log::{info, warn};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::config::AdminPortConfig;
use crate::context::RemediationContext;
use crate::errors::StepError;
use crate::event::{utc_now_string, IncidentEvent};
use crate::executor::{ExecutionReport, RemediationStep, StepCompletion, StepResult};
use crate::guards::{GuardChain, GuardVerdict, KindFilter, NoProbe, SkipReason};
use crate::handlers::{HandlerKind, IncidentHandler};
use crate::labels::{self, write_labels, LabelSet};
use crate::notify::{IncidentReport, ReportSection, Severity};
use crate::outcome::{CompletedOutcome, InvocationOutcome};
use crate::providers::{ComputeApi, IpPermission, LabelStore};

pub const REMEDIATOR: &str = "Warden-AdminPortGuard";

pub const WORLD_V4: &str = "0.0.0.0/0";
pub const WORLD_V6: &str = "::/0";

/// Group ids named by an ingress change, deduplicated, in request order.
pub fn extract_group_ids(params: &Value) -> Vec<String> {
    let mut found: Vec<&str> = Vec::new();
    if let Some(id) = params.get("groupId").and_then(Value::as_str) {
        found.push(id);
    }
    if let Some(items) = params.pointer("/groupIdSet/items").and_then(Value::as_array) {
        found.extend(items.iter().filter_map(|i| i.get("groupId").and_then(Value::as_str)));
    }
    if let Some(id) = params
        .pointer("/ModifySecurityGroupRulesRequest/GroupId")
        .and_then(Value::as_str)
    {
        found.push(id);
    }

    let mut seen = BTreeSet::new();
    found
        .into_iter()
        .filter(|id| !id.is_empty() && seen.insert(*id))
        .map(str::to_string)
        .collect()
}

/// The world-open part of each permission reaching one of `ports`, scoped
/// with the protocol and port range of the rule it came from.
pub fn world_open_permissions(ingress: &[IpPermission], ports: &[u16]) -> Vec<IpPermission> {
    ingress
        .iter()
        .filter(|p| ports.iter().any(|port| p.covers_tcp_port(*port)))
        .filter_map(|p| {
            let mut revoke = p.with_same_scope();
            revoke.ipv4_ranges = p.ipv4_ranges.iter().filter(|r| *r == WORLD_V4).cloned().collect();
            revoke.ipv6_ranges = p.ipv6_ranges.iter().filter(|r| *r == WORLD_V6).cloned().collect();
            if revoke.ipv4_ranges.is_empty() && revoke.ipv6_ranges.is_empty() {
                None
            } else {
                Some(revoke)
            }
        })
        .collect()
}

fn port_scope(p: &IpPermission) -> String {
    if p.protocol == "-1" {
        return "all".to_string();
    }
    match (p.from_port, p.to_port) {
        (Some(from), Some(to)) if from == to => format!("{}/{}", p.protocol, from),
        (Some(from), Some(to)) => format!("{}/{}-{}", p.protocol, from, to),
        _ => p.protocol.clone(),
    }
}

/// `IPv4 0.0.0.0/0 tcp/22`, one line per range.
pub fn describe_rules(perms: &[IpPermission]) -> Vec<String> {
    let mut lines = Vec::new();
    for p in perms {
        let scope = port_scope(p);
        lines.extend(p.ipv4_ranges.iter().map(|r| format!("IPv4 {} {}", r, scope)));
        lines.extend(p.ipv6_ranges.iter().map(|r| format!("IPv6 {} {}", r, scope)));
    }
    lines
}

/// `SSHWorldOpen`, `RDPWorldOpen` or `PortsOpen(22,3389)`.
pub fn reason_token(perms: &[IpPermission], ports: &[u16]) -> String {
    let hit: BTreeSet<u16> = ports
        .iter()
        .copied()
        .filter(|port| perms.iter().any(|p| p.covers_tcp_port(*port)))
        .collect();
    let hit: Vec<u16> = hit.into_iter().collect();
    match hit.as_slice() {
        [22] => "SSHWorldOpen".to_string(),
        [3389] => "RDPWorldOpen".to_string(),
        many => format!(
            "PortsOpen({})",
            many.iter().map(u16::to_string).collect::<Vec<_>>().join(",")
        ),
    }
}

#[derive(Debug, Default)]
pub struct AdminState {
    pub removed: BTreeMap<String, Vec<String>>,
}

struct RevokeWorldOpen {
    compute: Arc<dyn ComputeApi>,
    labels: Arc<dyn LabelStore>,
    group_id: String,
    ports: Vec<u16>,
}

impl RevokeWorldOpen {
    /// Revokes each world range on its own; ranges already gone are skipped.
    /// On a hard error, whatever was revoked so far is still recorded.
    async fn revoke_one_by_one(
        &self,
        offending: &[IpPermission],
        state: &mut AdminState,
    ) -> Result<Vec<IpPermission>, StepError> {
        let mut revoked = Vec::new();
        for single in offending.iter().flat_map(split_ranges) {
            match self.compute.revoke_ingress(&self.group_id, std::slice::from_ref(&single)).await {
                Ok(()) => revoked.push(single),
                Err(e) if e.is_not_found() => {
                    info!("{}: {} already gone", self.group_id, describe_rules(std::slice::from_ref(&single)).join(""));
                }
                Err(e) => {
                    if !revoked.is_empty() {
                        state.removed.insert(self.group_id.clone(), describe_rules(&revoked));
                    }
                    return Err(e.into());
                }
            }
        }
        Ok(revoked)
    }
}

/// One permission per address range, same protocol and ports.
fn split_ranges(perm: &IpPermission) -> Vec<IpPermission> {
    let v4 = perm.ipv4_ranges.iter().map(|cidr| IpPermission {
        ipv4_ranges: vec![cidr.clone()],
        ..perm.with_same_scope()
    });
    let v6 = perm.ipv6_ranges.iter().map(|cidr| IpPermission {
        ipv6_ranges: vec![cidr.clone()],
        ..perm.with_same_scope()
    });
    v4.chain(v6).collect()
}

#[async_trait]
impl RemediationStep<AdminState> for RevokeWorldOpen {
    fn name(&self) -> &str {
        &self.group_id
    }

    async fn apply(&self, state: &mut AdminState) -> StepResult {
        let group = self.compute.describe_security_group(&self.group_id).await?;
        let offending = world_open_permissions(&group.ingress, &self.ports);
        if offending.is_empty() {
            return Ok(StepCompletion::Skipped("no world-open admin ports".to_string()));
        }

        let revoked = match self.compute.revoke_ingress(&self.group_id, &offending).await {
            Ok(()) => offending,
            Err(e) if e.is_not_found() => {
                info!("{}: batch revoke hit {}; revoking rule by rule", self.group_id, e.code);
                self.revoke_one_by_one(&offending, state).await?
            }
            Err(e) => return Err(e.into()),
        };
        if revoked.is_empty() {
            return Ok(StepCompletion::Skipped("already revoked".to_string()));
        }

        let rules = describe_rules(&revoked);
        info!("{}: revoked {}", self.group_id, rules.join("; "));
        state.removed.insert(self.group_id.clone(), rules);

        let mut set = LabelSet::new();
        set.insert(labels::STATUS.to_string(), "Remediated".to_string());
        set.insert(labels::REASON.to_string(), reason_token(&revoked, &self.ports));
        set.insert(labels::LAST_FIX.to_string(), utc_now_string());
        set.insert(labels::REMEDIATOR.to_string(), REMEDIATOR.to_string());
        write_labels(self.labels.as_ref(), &self.group_id, &set).await;

        Ok(StepCompletion::applied(format!("RevokeIngress:{}", self.group_id)))
    }
}

pub struct AdminPortHandler {
    cfg: AdminPortConfig,
}

impl AdminPortHandler {
    pub fn new(cfg: AdminPortConfig) -> Self {
        Self { cfg }
    }

    fn in_scope(&self, groups: Vec<String>) -> Vec<String> {
        if self.cfg.scope_groups.is_empty() {
            return groups;
        }
        groups
            .into_iter()
            .filter(|g| self.cfg.scope_groups.contains(g))
            .collect()
    }

    fn report(
        &self,
        event: &IncidentEvent,
        groups: &[String],
        state: &AdminState,
        exec: &ExecutionReport,
    ) -> IncidentReport {
        let mut report = IncidentReport::new(
            Severity::Medium,
            format!("[Warden/MEDIUM] Admin ports world-open remediated ({})", event.region),
            "[Warden] Admin ports world-open auto-remediation",
        )
        .meta("Event", event.kind.clone())
        .meta("Time (UTC)", event.timestamp_utc())
        .meta("Region", event.region.clone())
        .meta("Source IP", event.source_ip.clone())
        .attribute("service", "network")
        .attribute("automation", "warden-admin-port-guard")
        .attribute("eventName", &event.kind)
        .attribute("removed", true);
        report.sections.push(ReportSection {
            title: "Security groups".to_string(),
            lines: groups.iter().map(|g| format!("- {}", g)).collect(),
        });
        report.sections.push(ReportSection {
            title: "Removed rules (admin ports world-open)".to_string(),
            lines: state
                .removed
                .iter()
                .flat_map(|(g, rules)| rules.iter().map(move |r| format!("- {}: {}", g, r)))
                .collect(),
        });
        report.actor = Some(event.actor.clone());
        report.actions = exec.actions.clone();
        report.errors = exec.errors.clone();
        report
    }
}

#[async_trait]
impl IncidentHandler for AdminPortHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::AdminPorts
    }

    async fn handle(&self, ctx: &RemediationContext, event: &IncidentEvent) -> InvocationOutcome {
        let chain = GuardChain {
            kinds: KindFilter::exact(self.cfg.allowed_events.iter().cloned()),
            me: ctx.me.clone(),
            check_actor: true,
            target: None,
        };
        if let GuardVerdict::Skip(reason) = chain.evaluate(event, None, &NoProbe).await {
            return InvocationOutcome::skipped(reason, &event.kind);
        }

        let named = extract_group_ids(&event.request_parameters);
        if named.is_empty() {
            info!("skip: no group id in {}", event.kind);
            return InvocationOutcome::skipped(SkipReason::NoTargetId, &event.kind);
        }
        let groups = self.in_scope(named);
        if groups.is_empty() {
            info!("skip: groups outside configured scope");
            return InvocationOutcome::skipped(SkipReason::OtherTarget, &event.kind);
        }

        let mut steps: Vec<Box<dyn RemediationStep<AdminState>>> = Vec::with_capacity(groups.len());
        for group_id in &groups {
            steps.push(Box::new(RevokeWorldOpen {
                compute: ctx.cloud.compute.clone(),
                labels: ctx.cloud.labels.clone(),
                group_id: group_id.clone(),
                ports: self.cfg.ports.clone(),
            }));
        }
        let mut state = AdminState::default();
        let exec = ctx.executor.run(&mut state, &steps).await;

        let delivery = if state.removed.is_empty() {
            if !exec.ok() {
                warn!("Admin port remediation failed: {}", exec.errors.join(", "));
            }
            info!("No world-open admin rule removed; notification suppressed.");
            None
        } else {
            let report = self.report(event, &groups, &state, &exec);
            Some(ctx.notifier.notify(report, event).await)
        };

        let mut outcome = CompletedOutcome::from(exec);
        outcome.target = Some(groups.join(","));
        outcome.removed = Some(state.removed);
        outcome.notification = delivery;
        InvocationOutcome::Completed(outcome)
    }
}
