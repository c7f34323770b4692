// warden-core/src/notify/mod.rs
//! Incident notification.
//!
//! A handler describes what happened as an [`IncidentReport`]; the
//! [`Notifier`] turns it into a deterministic plain-text message and
//! publishes it once on the channel for its severity. Delivery is
//! best-effort: failures are logged and reported as [`Delivery::Failed`],
//! remediation that already happened stays in effect.
//!
//! License: MIT OR Apache-2.0

use log::{error, info};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::event::{IncidentEvent, SourceIdentity};
use crate::providers::NotificationChannel;

pub mod dump;

pub use dump::{DumpLink, EventDumper};

/// Subject lines longer than this are cut.
pub const SUBJECT_MAX_CHARS: usize = 100;

const MISSING: &str = "-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    High,
    Medium,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
        }
    }
}

/// An extra titled block in the report body (e.g. removed rules).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSection {
    pub title: String,
    pub lines: Vec<String>,
}

/// Everything a handler wants to say about one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncidentReport {
    pub severity: Severity,
    pub subject: String,
    pub header: String,
    /// `Label: value` lines right under the header.
    pub metadata: Vec<(String, String)>,
    pub actor: Option<SourceIdentity>,
    pub sections: Vec<ReportSection>,
    pub actions: Vec<String>,
    pub errors: Vec<String>,
    pub attributes: BTreeMap<String, String>,
}

impl IncidentReport {
    pub fn new(severity: Severity, subject: impl Into<String>, header: impl Into<String>) -> Self {
        Self {
            severity,
            subject: subject.into(),
            header: header.into(),
            metadata: Vec::new(),
            actor: None,
            sections: Vec::new(),
            actions: Vec::new(),
            errors: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn meta(mut self, label: &str, value: impl Into<String>) -> Self {
        self.metadata.push((label.to_string(), value.into()));
        self
    }

    pub fn attribute(mut self, key: &str, value: impl ToString) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }
}

/// The composed message. Built once per invocation, sent at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationReport {
    pub subject: String,
    pub body: String,
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "delivery", content = "detail", rename_all = "lowercase")]
pub enum Delivery {
    Delivered(String),
    Failed(String),
}

/// Channel references per severity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeverityChannels {
    pub high: String,
    pub medium: String,
}

impl SeverityChannels {
    pub fn for_severity(&self, severity: Severity) -> &str {
        match severity {
            Severity::High => &self.high,
            Severity::Medium => &self.medium,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifierSettings {
    pub include_snippet: bool,
    /// Maximum characters of the raw-event snippet; 0 disables it.
    pub snippet_max_chars: usize,
}

impl Default for NotifierSettings {
    fn default() -> Self {
        Self {
            include_snippet: true,
            snippet_max_chars: 1200,
        }
    }
}

pub struct Notifier {
    channel: Arc<dyn NotificationChannel>,
    channels: SeverityChannels,
    dumper: Option<EventDumper>,
    settings: NotifierSettings,
}

impl Notifier {
    pub fn new(
        channel: Arc<dyn NotificationChannel>,
        channels: SeverityChannels,
        dumper: Option<EventDumper>,
        settings: NotifierSettings,
    ) -> Self {
        Self {
            channel,
            channels,
            dumper,
            settings,
        }
    }

    /// Dumps the event (when configured), composes and publishes the report.
    pub async fn notify(&self, report: IncidentReport, event: &IncidentEvent) -> Delivery {
        let link = match &self.dumper {
            Some(d) => d.dump(event).await,
            None => None,
        };
        let message = self.compose(&report, event, link.as_ref());
        let channel = self.channels.for_severity(report.severity);
        match self
            .channel
            .publish(channel, &message.subject, &message.body, &message.attributes)
            .await
        {
            Ok(id) => {
                info!("Notification published. MessageId={}", id);
                Delivery::Delivered(id)
            }
            Err(e) => {
                error!("notification publish failed: {} - {}", e.code, e.message);
                Delivery::Failed(e.code)
            }
        }
    }

    pub fn compose(&self, report: &IncidentReport, event: &IncidentEvent, link: Option<&DumpLink>) -> NotificationReport {
        let mut attributes = report.attributes.clone();
        attributes.insert("severity".to_string(), report.severity.as_str().to_string());

        NotificationReport {
            subject: truncate_chars(&report.subject, SUBJECT_MAX_CHARS),
            body: self.format_body(report, event, link),
            attributes,
        }
    }

    fn format_body(&self, report: &IncidentReport, event: &IncidentEvent, link: Option<&DumpLink>) -> String {
        let mut lines: Vec<String> = vec![report.header.clone(), String::new()];
        for (label, value) in &report.metadata {
            lines.push(format!("{}: {}", label, or_missing(value)));
        }

        if let Some(actor) = &report.actor {
            lines.push(String::new());
            lines.extend(actor_block(actor));
        }

        for section in &report.sections {
            lines.push(String::new());
            lines.push(format!("{}:", section.title));
            if section.lines.is_empty() {
                lines.push("- None".to_string());
            } else {
                lines.extend(section.lines.iter().cloned());
            }
        }

        lines.push(String::new());
        lines.push("Actions:".to_string());
        if report.actions.is_empty() {
            lines.push("- No change required".to_string());
        } else {
            lines.extend(report.actions.iter().map(|a| format!("- {}", a)));
        }

        lines.push(String::new());
        lines.push("Errors:".to_string());
        if report.errors.is_empty() {
            lines.push("- None".to_string());
        } else {
            lines.extend(report.errors.iter().map(|e| format!("- {}", e)));
        }

        if let Some(link) = link {
            lines.push(String::new());
            lines.push(format!(
                "Full event (pre-signed): {} (expires in {}s)",
                link.url, link.ttl_secs
            ));
        }

        if let Some(snippet) = self.snippet(event) {
            lines.push(String::new());
            lines.push("Event (snippet):".to_string());
            lines.push(snippet);
        }

        lines.join("\n")
    }

    fn snippet(&self, event: &IncidentEvent) -> Option<String> {
        if !self.settings.include_snippet || self.settings.snippet_max_chars == 0 {
            return None;
        }
        serde_json::to_string(&event.raw)
            .ok()
            .map(|json| truncate_chars(&json, self.settings.snippet_max_chars))
    }
}

fn actor_block(actor: &SourceIdentity) -> Vec<String> {
    let user = if actor.user_name.is_empty() {
        &actor.principal_id
    } else {
        &actor.user_name
    };
    let mut lines = vec![
        "Actor:".to_string(),
        format!("Type: {}", or_missing(&actor.actor_type)),
        format!("Account: {}", or_missing(&actor.account_id)),
        format!("User/principal: {}", or_missing(user)),
        format!("Arn: {}", or_missing(&actor.arn)),
    ];
    if let Some(issuer) = &actor.issuer {
        lines.push(String::new());
        lines.push("Issuer (role):".to_string());
        lines.push(format!("Name: {}", or_missing(&issuer.name)));
        lines.push(format!("Type: {}", or_missing(&issuer.issuer_type)));
        lines.push(format!("Arn: {}", or_missing(&issuer.arn)));
    }
    lines
}

fn or_missing(value: &str) -> &str {
    if value.is_empty() {
        MISSING
    } else {
        value
    }
}

pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
