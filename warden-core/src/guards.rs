// warden-core/src/guards.rs
//! The guard chain: scope checks that decide whether an event is ours to act on.
//!
//! Guards run in a fixed order (event kind, self actor, target scope) and the
//! first skip wins. A skip performs no mutation and sends no notification.
//! The idempotency guard is applied later by the handlers that need it,
//! because it has to read the target's labels first.
//!
//! License: MIT OR Apache-2.0

use async_trait::async_trait;
use log::{debug, info};
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;

use crate::event::IncidentEvent;
use crate::identity::SelfIdentity;

/// Why an event was skipped. Closed set; used for observability only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    NotAllowedEvent,
    SelfActor,
    OtherTarget,
    AlreadyRemediated,
    NoTargetId,
}

impl SkipReason {
    pub fn code(&self) -> &'static str {
        match self {
            SkipReason::NotAllowedEvent => "not-allowed-event",
            SkipReason::SelfActor => "self-actor",
            SkipReason::OtherTarget => "other-target",
            SkipReason::AlreadyRemediated => "already-remediated",
            SkipReason::NoTargetId => "no-target-id",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl Serialize for SkipReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardVerdict {
    Allow,
    Skip(SkipReason),
}

impl GuardVerdict {
    pub fn allow(&self) -> bool {
        matches!(self, GuardVerdict::Allow)
    }

    pub fn reason_code(&self) -> &'static str {
        match self {
            GuardVerdict::Allow => "",
            GuardVerdict::Skip(r) => r.code(),
        }
    }
}

/// Which event kinds a handler reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KindFilter {
    /// Exact API call names.
    Exact(BTreeSet<String>),
    /// Finding types starting with `prefix`. Untyped events (manual tests)
    /// pass when `allow_untyped` is set.
    Prefix { prefix: String, allow_untyped: bool },
}

impl KindFilter {
    pub fn exact<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        KindFilter::Exact(kinds.into_iter().map(Into::into).collect())
    }
}

/// Guard 1: is the event kind in the allow-set?
pub fn check_event_kind(event: &IncidentEvent, filter: &KindFilter) -> GuardVerdict {
    let allowed = match filter {
        KindFilter::Exact(set) => set.contains(&event.kind),
        KindFilter::Prefix { prefix, allow_untyped } => {
            (event.is_untyped() && *allow_untyped) || event.kind.starts_with(prefix.as_str())
        }
    };
    if allowed {
        GuardVerdict::Allow
    } else {
        GuardVerdict::Skip(SkipReason::NotAllowedEvent)
    }
}

/// Guard 2: was the event caused by our own remediation calls?
///
/// Matches the issuing role ARN exactly, or the actor ARN against the
/// assumed-role session prefix of our role. A zero identity allows
/// everything.
pub fn check_self_actor(event: &IncidentEvent, me: &SelfIdentity) -> GuardVerdict {
    let issuer_arn = event.actor.issuer_arn();
    if !me.role_arn.is_empty() && issuer_arn == me.role_arn {
        return GuardVerdict::Skip(SkipReason::SelfActor);
    }
    if let Some(prefix) = me.assumed_role_prefix() {
        if event.actor.arn.starts_with(&prefix) {
            return GuardVerdict::Skip(SkipReason::SelfActor);
        }
    }
    GuardVerdict::Allow
}

/// The one resource a handler protects, by all the names it goes by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetScope {
    /// Bare name and fully qualified forms.
    pub accepted: BTreeSet<String>,
    /// Any identifier ending in this suffix also matches.
    pub suffix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetMatch {
    InScope,
    OutOfScope,
    /// The event names no target at all.
    Unspecified,
}

impl TargetScope {
    /// Scope of an audit trail: its name, its ARN and `:trail/<name>`.
    pub fn for_trail(name: &str, region: &str, account: &str, partition: &str) -> Self {
        let partition = if partition.is_empty() { "aws" } else { partition };
        let mut accepted = BTreeSet::new();
        accepted.insert(name.to_string());
        accepted.insert(format!("arn:{}:cloudtrail:{}:{}:trail/{}", partition, region, account, name));
        Self {
            accepted,
            suffix: Some(format!(":trail/{}", name)),
        }
    }

    pub fn classify(&self, target: Option<&str>) -> TargetMatch {
        match target {
            None | Some("") => TargetMatch::Unspecified,
            Some(t) if self.accepted.contains(t) => TargetMatch::InScope,
            Some(t) if self.suffix.as_deref().map(|s| t.ends_with(s)).unwrap_or(false) => TargetMatch::InScope,
            Some(_) => TargetMatch::OutOfScope,
        }
    }
}

/// Existence probe for events that do not name their target.
#[async_trait]
pub trait TargetProbe: Send + Sync {
    async fn target_exists(&self) -> bool;
}

/// Probe for chains without a target scope; never consulted.
pub struct NoProbe;

#[async_trait]
impl TargetProbe for NoProbe {
    async fn target_exists(&self) -> bool {
        false
    }
}

/// Guard 3 given the probe result (pure).
pub fn check_target_scope(classified: TargetMatch, exists_when_unspecified: impl FnOnce() -> bool) -> GuardVerdict {
    match classified {
        TargetMatch::InScope => GuardVerdict::Allow,
        TargetMatch::OutOfScope => GuardVerdict::Skip(SkipReason::OtherTarget),
        TargetMatch::Unspecified => {
            if exists_when_unspecified() {
                GuardVerdict::Allow
            } else {
                GuardVerdict::Skip(SkipReason::OtherTarget)
            }
        }
    }
}

/// Guard 4: has a previous run already contained the target?
pub fn check_idempotency(already_done: bool) -> GuardVerdict {
    if already_done {
        GuardVerdict::Skip(SkipReason::AlreadyRemediated)
    } else {
        GuardVerdict::Allow
    }
}

/// Guards 1-3 in their fixed order.
pub struct GuardChain {
    pub kinds: KindFilter,
    pub me: SelfIdentity,
    /// Skip the self-actor check (detector findings carry no actor).
    pub check_actor: bool,
    pub target: Option<TargetScope>,
}

impl GuardChain {
    /// Runs the chain; `target` is what the event names, if anything.
    pub async fn evaluate(
        &self,
        event: &IncidentEvent,
        target: Option<&str>,
        probe: &dyn TargetProbe,
    ) -> GuardVerdict {
        let verdict = check_event_kind(event, &self.kinds);
        if !verdict.allow() {
            info!("skip: event {} not in allow-set", event.kind);
            return verdict;
        }

        if self.check_actor {
            let verdict = check_self_actor(event, &self.me);
            if !verdict.allow() {
                info!("skip: self-actor for {}", event.kind);
                return verdict;
            }
        }

        if let Some(scope) = &self.target {
            let classified = scope.classify(target);
            let exists = match classified {
                TargetMatch::Unspecified => {
                    debug!("{} names no target; probing configured target", event.kind);
                    probe.target_exists().await
                }
                _ => false,
            };
            let verdict = check_target_scope(classified, || exists);
            if !verdict.allow() {
                info!("skip: other-target ({})", target.unwrap_or(""));
                return verdict;
            }
        }

        GuardVerdict::Allow
    }
}
