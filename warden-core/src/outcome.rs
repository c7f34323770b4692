// warden-core/src/outcome.rs
//! The value one invocation hands back to its host.
//!
//! License: MIT OR Apache-2.0

use serde::Serialize;
use std::collections::BTreeMap;

use crate::executor::{ActionRecord, ExecutionReport};
use crate::guards::SkipReason;
use crate::notify::Delivery;

/// `{ok: true, skipped, eventKind}`. A skip mutated nothing and notified no one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedOutcome {
    pub ok: bool,
    pub skipped: SkipReason,
    pub event_kind: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedOutcome {
    /// True only when `errors` is empty.
    pub ok: bool,
    pub actions: Vec<String>,
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Group id → removed rules, for the admin-port handler.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed: Option<BTreeMap<String, Vec<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<Delivery>,
    pub records: Vec<ActionRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum InvocationOutcome {
    Skipped(SkippedOutcome),
    Completed(CompletedOutcome),
}

impl InvocationOutcome {
    pub fn skipped(reason: SkipReason, event_kind: &str) -> Self {
        InvocationOutcome::Skipped(SkippedOutcome {
            ok: true,
            skipped: reason,
            event_kind: event_kind.to_string(),
        })
    }

    pub fn ok(&self) -> bool {
        match self {
            InvocationOutcome::Skipped(_) => true,
            InvocationOutcome::Completed(c) => c.ok,
        }
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            InvocationOutcome::Skipped(s) => Some(s.skipped),
            InvocationOutcome::Completed(_) => None,
        }
    }

    pub fn completed(&self) -> Option<&CompletedOutcome> {
        match self {
            InvocationOutcome::Completed(c) => Some(c),
            InvocationOutcome::Skipped(_) => None,
        }
    }
}

impl From<ExecutionReport> for CompletedOutcome {
    fn from(report: ExecutionReport) -> Self {
        Self {
            ok: report.ok(),
            actions: report.actions,
            errors: report.errors,
            records: report.records,
            ..Default::default()
        }
    }
}
