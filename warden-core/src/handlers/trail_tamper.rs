// warden-core/src/handlers/trail_tamper.rs
//! Audit trail tamper guard.
//!
//! Someone stopped, deleted or reconfigured the protected trail: put the
//! desired configuration back, re-apply selectors, make sure it is logging,
//! label the trail and raise a HIGH report. The convergence steps run on
//! every allowed event, whatever the labels say.
//!
//! License: MIT OR Apache-2.0

use async_trait::async_trait;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::config::TrailTamperConfig;
use crate::context::RemediationContext;
use crate::errors::StepError;
use crate::event::{utc_now_string, IncidentEvent};
use crate::executor::{
    create_or_update, poll_until_converged, ExecutionReport, RemediationStep, StepCompletion, StepResult, Upsert,
};
use crate::guards::{GuardChain, GuardVerdict, KindFilter, TargetProbe, TargetScope};
use crate::handlers::{HandlerKind, IncidentHandler};
use crate::labels::{self, ensure_labels, LabelSet, LabelWrite};
use crate::notify::{IncidentReport, Severity};
use crate::outcome::{CompletedOutcome, InvocationOutcome};
use crate::providers::{TrailApi, TrailSettings};

pub const REMEDIATOR: &str = "Warden-TrailTamper";

/// Request parameter names that may carry the trail, in preference order.
const TRAIL_PARAMS: &[&str] = &["name", "trailName", "trailArn", "trailARN"];

pub struct TrailTamperHandler {
    cfg: TrailTamperConfig,
    settings: TrailSettings,
}

struct TrailProbe<'a> {
    api: &'a dyn TrailApi,
    name: &'a str,
}

#[async_trait]
impl<'a> TargetProbe for TrailProbe<'a> {
    async fn target_exists(&self) -> bool {
        matches!(self.api.describe_trail(self.name).await, Ok(Some(_)))
    }
}

struct CreateOrUpdateTrail {
    api: Arc<dyn TrailApi>,
    settings: TrailSettings,
    backoff: Vec<Duration>,
}

#[async_trait]
impl RemediationStep<()> for CreateOrUpdateTrail {
    fn name(&self) -> &str {
        "CreateOrUpdate"
    }

    async fn apply(&self, _: &mut ()) -> StepResult {
        let api = self.api.as_ref();
        let settings = &self.settings;
        let upsert = create_or_update(
            move || api.update_trail(settings),
            move || api.create_trail(settings),
            &self.backoff,
        )
        .await?;
        Ok(StepCompletion::applied(match upsert {
            Upsert::Updated => "UpdateTrail",
            Upsert::Created => "CreateTrail",
        }))
    }
}

struct EnsureSelectors {
    api: Arc<dyn TrailApi>,
    name: String,
    event_selectors: Option<serde_json::Value>,
    insight_selectors: Option<serde_json::Value>,
}

#[async_trait]
impl RemediationStep<()> for EnsureSelectors {
    fn name(&self) -> &str {
        "Selectors"
    }

    async fn apply(&self, _: &mut ()) -> StepResult {
        let mut done = Vec::new();
        if let Some(selectors) = &self.event_selectors {
            self.api.put_event_selectors(&self.name, selectors).await?;
            done.push("PutEventSelectors".to_string());
        }
        if let Some(selectors) = &self.insight_selectors {
            self.api.put_insight_selectors(&self.name, selectors).await?;
            done.push("PutInsightSelectors".to_string());
        }
        if done.is_empty() {
            return Ok(StepCompletion::Skipped("no selectors configured".to_string()));
        }
        Ok(StepCompletion::Applied(done))
    }
}

struct EnsureLogging {
    api: Arc<dyn TrailApi>,
    name: String,
    attempts: u32,
    interval: Duration,
}

#[async_trait]
impl RemediationStep<()> for EnsureLogging {
    fn name(&self) -> &str {
        "StartLogging"
    }

    async fn apply(&self, _: &mut ()) -> StepResult {
        let api = self.api.as_ref();
        let name = self.name.as_str();
        let converged = poll_until_converged(self.attempts, self.interval, move || async move {
            if !api.is_logging(name).await? {
                api.start_logging(name).await?;
            }
            api.is_logging(name).await
        })
        .await;
        if converged {
            Ok(StepCompletion::applied("StartLoggingEnsured"))
        } else {
            Err(StepError::new("NotConverged"))
        }
    }
}

impl TrailTamperHandler {
    pub fn new(cfg: TrailTamperConfig) -> Self {
        let settings = cfg.trail_settings();
        Self { cfg, settings }
    }

    fn steps(&self, ctx: &RemediationContext) -> Vec<Box<dyn RemediationStep<()>>> {
        let policy = ctx.executor.policy();
        let api = ctx.cloud.trails.clone();
        let mut steps: Vec<Box<dyn RemediationStep<()>>> = Vec::with_capacity(3);
        steps.push(Box::new(CreateOrUpdateTrail {
            api: api.clone(),
            settings: self.settings.clone(),
            backoff: policy.create_backoff.clone(),
        }));
        steps.push(Box::new(EnsureSelectors {
            api: api.clone(),
            name: self.settings.name.clone(),
            event_selectors: self.cfg.event_selectors.clone(),
            insight_selectors: self.cfg.insight_selectors.clone(),
        }));
        steps.push(Box::new(EnsureLogging {
            api,
            name: self.settings.name.clone(),
            attempts: policy.poll_attempts,
            interval: policy.poll_interval,
        }));
        steps
    }

    async fn label_trail(&self, ctx: &RemediationContext, event: &IncidentEvent, report: &ExecutionReport) -> LabelWrite {
        let arn = match ctx.cloud.trails.describe_trail(&self.settings.name).await {
            Ok(Some(trail)) => trail.arn,
            Ok(None) => {
                warn!("Trail {} not found after remediation; labels not written.", self.settings.name);
                return LabelWrite::Skipped;
            }
            Err(e) => {
                warn!("Describing trail {} failed ({}); labels not written.", self.settings.name, e.code);
                return LabelWrite::Skipped;
            }
        };
        let mut dynamic = LabelSet::new();
        dynamic.insert(
            labels::STATUS.to_string(),
            if report.ok() { "Remediated" } else { "Error" }.to_string(),
        );
        dynamic.insert(labels::REASON.to_string(), format!("Tamper:{}", event.kind));
        dynamic.insert(labels::LAST_FIX.to_string(), utc_now_string());
        dynamic.insert(labels::REMEDIATOR.to_string(), REMEDIATOR.to_string());
        ensure_labels(ctx.cloud.labels.as_ref(), &arn, &self.cfg.baseline_labels, &dynamic).await
    }

    fn report(&self, event: &IncidentEvent, exec: &ExecutionReport) -> IncidentReport {
        let name = &self.settings.name;
        let mut report = IncidentReport::new(
            Severity::High,
            format!("[Warden/HIGH] {} → auto-remediation ({} | {})", event.kind, name, event.region),
            "[Warden] Audit trail tamper auto-remediation",
        )
        .meta("Event", event.kind.clone())
        .meta("Time (UTC)", event.timestamp_utc())
        .meta("Region", event.region.clone())
        .meta("Trail", name.clone())
        .meta("Source IP", event.source_ip.clone())
        .attribute("service", "audit-trail")
        .attribute("automation", "warden-trail-guard")
        .attribute("eventName", &event.kind)
        .attribute("actor", &event.actor.arn);
        report.actor = Some(event.actor.clone());
        report.actions = exec.actions.clone();
        report.errors = exec.errors.clone();
        report
    }
}

#[async_trait]
impl IncidentHandler for TrailTamperHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::TrailTamper
    }

    async fn handle(&self, ctx: &RemediationContext, event: &IncidentEvent) -> InvocationOutcome {
        let chain = GuardChain {
            kinds: KindFilter::exact(self.cfg.allowed_events.iter().cloned()),
            me: ctx.me.clone(),
            check_actor: true,
            target: Some(TargetScope::for_trail(
                &self.settings.name,
                &event.region,
                &ctx.me.account_id,
                &ctx.me.partition,
            )),
        };
        let probe = TrailProbe {
            api: ctx.cloud.trails.as_ref(),
            name: &self.settings.name,
        };
        if let GuardVerdict::Skip(reason) = chain
            .evaluate(event, event.request_param(TRAIL_PARAMS), &probe)
            .await
        {
            return InvocationOutcome::skipped(reason, &event.kind);
        }

        info!(
            "tamper detected: {} on trail {} ({})",
            event.kind, self.settings.name, event.region
        );

        let exec = ctx.executor.run(&mut (), &self.steps(ctx)).await;
        let labelled = self.label_trail(ctx, event, &exec).await;
        if labelled.is_failure() {
            warn!("Trail labels not updated: {:?}", labelled);
        }
        let delivery = ctx.notifier.notify(self.report(event, &exec), event).await;

        let mut outcome = CompletedOutcome::from(exec);
        outcome.target = Some(self.settings.name.clone());
        outcome.notification = Some(delivery);
        InvocationOutcome::Completed(outcome)
    }
}
