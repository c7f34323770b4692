// warden-core/src/handlers/mod.rs
//! Incident handlers: per-incident wiring of guards, steps and report.
//!
//! Each handler processes exactly one event per call. The shape is always
//! the same: guard chain, executor run, label write, notification. What
//! differs is the allow-set, the target, the steps and the report fields.
//!
//! License: MIT OR Apache-2.0

use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::config::WardenConfig;
use crate::context::RemediationContext;
use crate::errors::WardenError;
use crate::event::{str_at, IncidentEvent};
use crate::outcome::InvocationOutcome;

pub mod admin_port;
pub mod host_quarantine;
pub mod trail_tamper;

pub use admin_port::AdminPortHandler;
pub use host_quarantine::HostQuarantineHandler;
pub use trail_tamper::TrailTamperHandler;

/// Events that add or change inbound network rules.
pub const INGRESS_EVENTS: &[&str] = &["AuthorizeSecurityGroupIngress", "ModifySecurityGroupRules"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HandlerKind {
    TrailTamper,
    HostQuarantine,
    AdminPorts,
}

impl HandlerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerKind::TrailTamper => "trail-tamper",
            HandlerKind::HostQuarantine => "host-quarantine",
            HandlerKind::AdminPorts => "admin-ports",
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HandlerKind {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trail-tamper" => Ok(HandlerKind::TrailTamper),
            "host-quarantine" => Ok(HandlerKind::HostQuarantine),
            "admin-ports" => Ok(HandlerKind::AdminPorts),
            other => Err(WardenError::InvalidOption {
                key: "handler".to_string(),
                reason: format!("unknown handler '{}'", other),
            }),
        }
    }
}

/// Picks the handler for a raw envelope.
///
/// Detector findings go to host quarantine, ingress rule changes to the
/// admin-port guard, everything else to the trail guard (whose allow-set
/// then decides).
pub fn route(raw: &Value) -> HandlerKind {
    let detail_type = str_at(raw, &["detail-type"]);
    let finding_type = str_at(raw, &["detail", "type"]);
    if !finding_type.is_empty() || detail_type.contains("Finding") {
        return HandlerKind::HostQuarantine;
    }
    let event_name = str_at(raw, &["detail", "eventName"]);
    if INGRESS_EVENTS.contains(&event_name) {
        return HandlerKind::AdminPorts;
    }
    HandlerKind::TrailTamper
}

#[async_trait]
pub trait IncidentHandler: Send + Sync {
    fn kind(&self) -> HandlerKind;

    /// Never fails: every runtime problem ends up in the outcome.
    async fn handle(&self, ctx: &RemediationContext, event: &IncidentEvent) -> InvocationOutcome;
}

/// Builds the handler of `kind` from its configuration section.
pub fn handler_for(kind: HandlerKind, config: &WardenConfig) -> Result<Box<dyn IncidentHandler>, WardenError> {
    Ok(match kind {
        HandlerKind::TrailTamper => {
            let cfg = config
                .trail_tamper
                .clone()
                .ok_or(WardenError::MissingOption("trail_tamper"))?;
            Box::new(TrailTamperHandler::new(cfg))
        }
        HandlerKind::HostQuarantine => Box::new(HostQuarantineHandler::new(config.host_quarantine.clone())),
        HandlerKind::AdminPorts => Box::new(AdminPortHandler::new(config.admin_ports.clone())),
    })
}

/// Normalizes `raw`, routes it (unless `kind` is forced) and runs one
/// invocation. Errors only when the chosen handler is not configured.
pub async fn handle_event(
    ctx: &RemediationContext,
    raw: Value,
    kind: Option<HandlerKind>,
) -> Result<InvocationOutcome, WardenError> {
    let kind = kind.unwrap_or_else(|| route(&raw));
    let handler = handler_for(kind, &ctx.config)?;
    let event = IncidentEvent::from_value(raw, &ctx.config.default_region);
    info!("Handling {} with {} handler", event.kind, kind);
    Ok(handler.handle(ctx, &event).await)
}
