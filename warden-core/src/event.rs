// warden-core/src/event.rs
//! Normalized view of an inbound security signal.
//!
//! Events arrive as event-bus envelopes whose `detail` is either an API
//! audit record (configuration-change incidents) or a detector finding
//! (compromise incidents). Anything missing degrades to a default; building
//! an [`IncidentEvent`] never fails, so a malformed event turns into a guard
//! skip instead of a crash.
//!
//! License: MIT OR Apache-2.0

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

pub const UNKNOWN_EVENT: &str = "UnknownEvent";

/// Session issuer of an assumed-role actor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuerIdentity {
    pub arn: String,
    pub name: String,
    pub issuer_type: String,
}

/// The principal that triggered the event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceIdentity {
    pub actor_type: String,
    pub account_id: String,
    pub arn: String,
    pub user_name: String,
    pub principal_id: String,
    pub issuer: Option<IssuerIdentity>,
}

impl SourceIdentity {
    fn from_value(ui: &Value) -> Self {
        let principal_id = str_at(ui, &["principalId"]).to_string();
        let user_name = match str_at(ui, &["userName"]) {
            "" => principal_id.clone(),
            name => name.to_string(),
        };
        let issuer = ui
            .pointer("/sessionContext/sessionIssuer")
            .filter(|v| v.as_object().map(|o| !o.is_empty()).unwrap_or(false))
            .map(|iss| IssuerIdentity {
                arn: str_at(iss, &["arn"]).to_string(),
                name: str_at(iss, &["userName"]).to_string(),
                issuer_type: str_at(iss, &["type"]).to_string(),
            })
            .filter(|iss| !iss.arn.is_empty());
        Self {
            actor_type: match str_at(ui, &["type"]) {
                "" => "unknown".to_string(),
                t => t.to_string(),
            },
            account_id: str_at(ui, &["accountId"]).to_string(),
            arn: str_at(ui, &["arn"]).to_string(),
            user_name,
            principal_id,
            issuer,
        }
    }

    /// True when the event carried no identity block at all.
    pub fn is_empty(&self) -> bool {
        self.arn.is_empty() && self.account_id.is_empty() && self.principal_id.is_empty() && self.issuer.is_none()
    }

    pub fn issuer_arn(&self) -> &str {
        self.issuer.as_ref().map(|i| i.arn.as_str()).unwrap_or("")
    }
}

/// One inbound signal. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentEvent {
    /// API call name for audit records, finding type for detector findings.
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub region: String,
    pub source_ip: String,
    pub actor: SourceIdentity,
    /// `detail.requestParameters`, `Value::Null` when absent.
    pub request_parameters: Value,
    /// `detail.id` of findings.
    pub finding_id: Option<String>,
    /// Detector test findings are flagged as samples.
    pub sample: bool,
    #[serde(skip)]
    pub raw: Value,
}

impl IncidentEvent {
    /// Normalizes an envelope. `default_region` stands in when neither the
    /// record nor the envelope names one.
    pub fn from_value(raw: Value, default_region: &str) -> Self {
        let empty = Value::Null;
        let detail = raw.get("detail").unwrap_or(&empty);

        let kind = [str_at(detail, &["eventName"]), str_at(detail, &["type"])]
            .into_iter()
            .find(|s| !s.is_empty())
            .unwrap_or(UNKNOWN_EVENT)
            .to_string();

        let timestamp = parse_time(str_at(detail, &["eventTime"]))
            .or_else(|| parse_time(str_at(&raw, &["time"])))
            .unwrap_or_else(Utc::now);

        let region = [str_at(detail, &["awsRegion"]), str_at(&raw, &["region"]), default_region]
            .into_iter()
            .find(|s| !s.is_empty())
            .unwrap_or("unknown")
            .to_string();

        let source_ip = match str_at(detail, &["sourceIPAddress"]) {
            "" => "unknown".to_string(),
            ip => ip.to_string(),
        };

        let actor = detail
            .get("userIdentity")
            .map(SourceIdentity::from_value)
            .unwrap_or_default();

        let finding_id = match str_at(detail, &["id"]) {
            "" => None,
            id => Some(id.to_string()),
        };

        let sample = detail
            .pointer("/service/additionalInfo/sample")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Self {
            kind,
            timestamp,
            region,
            source_ip,
            actor,
            request_parameters: detail.get("requestParameters").cloned().unwrap_or(Value::Null),
            finding_id,
            sample,
            raw,
        }
    }

    /// `2024-05-01T12:00:00Z`.
    pub fn timestamp_utc(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    pub fn detail(&self) -> Option<&Value> {
        self.raw.get("detail")
    }

    /// Events without an API name or finding type (hand-crafted test events).
    pub fn is_untyped(&self) -> bool {
        self.kind.is_empty() || self.kind == UNKNOWN_EVENT
    }

    /// First non-empty string among the named request parameters.
    pub fn request_param(&self, names: &[&str]) -> Option<&str> {
        names
            .iter()
            .filter_map(|n| self.request_parameters.get(*n).and_then(Value::as_str))
            .find(|s| !s.is_empty())
    }
}

/// Current time in the label/report format.
pub fn utc_now_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(s).ok().map(|t| t.with_timezone(&Utc))
}

/// String at a nested path, `""` when missing or not a string.
pub(crate) fn str_at<'a>(value: &'a Value, path: &[&str]) -> &'a str {
    let mut cur = value;
    for key in path {
        match cur.get(*key) {
            Some(v) => cur = v,
            None => return "",
        }
    }
    cur.as_str().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_audit_record() {
        let raw = json!({
            "region": "us-east-1",
            "detail": {
                "eventName": "StopLogging",
                "eventTime": "2024-05-01T12:00:00Z",
                "awsRegion": "eu-west-1",
                "sourceIPAddress": "203.0.113.7",
                "userIdentity": {
                    "type": "AssumedRole",
                    "accountId": "111122223333",
                    "arn": "arn:aws:sts::111122223333:assumed-role/Admin/alice",
                    "principalId": "AROA:alice",
                    "sessionContext": {"sessionIssuer": {
                        "arn": "arn:aws:iam::111122223333:role/Admin",
                        "userName": "Admin",
                        "type": "Role"
                    }}
                },
                "requestParameters": {"name": "org-trail"}
            }
        });
        let ev = IncidentEvent::from_value(raw, "us-west-2");
        assert_eq!(ev.kind, "StopLogging");
        assert_eq!(ev.region, "eu-west-1");
        assert_eq!(ev.timestamp_utc(), "2024-05-01T12:00:00Z");
        assert_eq!(ev.source_ip, "203.0.113.7");
        assert_eq!(ev.actor.user_name, "AROA:alice");
        assert_eq!(ev.actor.issuer_arn(), "arn:aws:iam::111122223333:role/Admin");
        assert_eq!(ev.request_param(&["trailName", "name"]), Some("org-trail"));
    }

    #[test]
    fn normalizes_finding() {
        let raw = json!({
            "region": "us-east-2",
            "detail": {
                "id": "f-123",
                "type": "CryptoCurrency:EC2/BitcoinTool.B!DNS",
                "resource": {"instanceDetails": {"instanceId": "i-0abc"}},
                "service": {"additionalInfo": {"sample": true}}
            }
        });
        let ev = IncidentEvent::from_value(raw, "");
        assert_eq!(ev.kind, "CryptoCurrency:EC2/BitcoinTool.B!DNS");
        assert_eq!(ev.region, "us-east-2");
        assert_eq!(ev.finding_id.as_deref(), Some("f-123"));
        assert!(ev.sample);
        assert!(ev.actor.is_empty());
    }

    #[test]
    fn malformed_input_degrades_to_defaults() {
        let ev = IncidentEvent::from_value(json!("not an object"), "us-west-2");
        assert_eq!(ev.kind, UNKNOWN_EVENT);
        assert_eq!(ev.region, "us-west-2");
        assert_eq!(ev.source_ip, "unknown");
        assert!(ev.request_parameters.is_null());

        let ev = IncidentEvent::from_value(json!({"detail": {"eventTime": "yesterday"}}), "");
        assert_eq!(ev.region, "unknown");
    }

    #[test]
    fn issuer_without_arn_is_dropped() {
        let raw = json!({"detail": {"userIdentity": {
            "type": "IAMUser", "userName": "bob",
            "sessionContext": {"sessionIssuer": {}}
        }}});
        let ev = IncidentEvent::from_value(raw, "");
        assert_eq!(ev.actor.user_name, "bob");
        assert!(ev.actor.issuer.is_none());
    }
}
