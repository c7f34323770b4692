// warden-core/src/executor.rs
//! The remediation step executor.
//!
//! Runs an ordered list of independently failable steps against one target.
//! A failed step is recorded as `<name>:<code>` and the executor moves on:
//! a failed snapshot must not keep the host on the network, and a failed
//! isolation must not keep it running.
//!
//! Also home of the two retry shapes the steps share: create-or-update with
//! a fixed backoff schedule, and poll-until-converged.
//!
//! License: MIT OR Apache-2.0

use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;

use crate::errors::{ProviderError, StepError};

/// What a successful step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepCompletion {
    /// Descriptive tokens appended to the action list, in order.
    Applied(Vec<String>),
    /// Nothing to do (feature off, nothing found). Carries a note for the log.
    Skipped(String),
}

impl StepCompletion {
    pub fn applied(token: impl Into<String>) -> Self {
        StepCompletion::Applied(vec![token.into()])
    }
}

pub type StepResult = Result<StepCompletion, StepError>;

/// One remediation action. `S` is the per-invocation state the steps of a
/// handler share (target description, ids produced by earlier steps).
#[async_trait]
pub trait RemediationStep<S: Send>: Send + Sync {
    fn name(&self) -> &str;

    async fn apply(&self, state: &mut S) -> StepResult;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "code", rename_all = "lowercase")]
pub enum StepOutcome {
    Succeeded,
    Failed(String),
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionRecord {
    pub name: String,
    pub outcome: StepOutcome,
}

/// Everything an executor run produced, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    pub records: Vec<ActionRecord>,
    pub actions: Vec<String>,
    pub errors: Vec<String>,
}

impl ExecutionReport {
    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Record a failure that happened outside a step.
    pub fn push_error(&mut self, name: &str, code: &str) {
        self.errors.push(format!("{}:{}", name, code));
    }
}

/// Retry tuning shared by all steps.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before each create attempt after an update found nothing.
    pub create_backoff: Vec<Duration>,
    pub poll_attempts: u32,
    pub poll_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            create_backoff: vec![
                Duration::from_millis(800),
                Duration::from_millis(1500),
                Duration::from_millis(3000),
            ],
            poll_attempts: 4,
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// No waiting at all; for tests and rehearsals.
    pub fn immediate() -> Self {
        Self {
            create_backoff: vec![Duration::ZERO; 3],
            poll_attempts: 4,
            poll_interval: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StepExecutor {
    policy: RetryPolicy,
}

impl StepExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs every step in order, whatever happens to the ones before it.
    pub async fn run<S: Send>(&self, state: &mut S, steps: &[Box<dyn RemediationStep<S>>]) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        for step in steps {
            let name = step.name().to_string();
            debug!("step {}: start", name);
            let outcome = match step.apply(state).await {
                Ok(StepCompletion::Applied(tokens)) => {
                    info!("step {}: applied {:?}", name, tokens);
                    report.actions.extend(tokens);
                    StepOutcome::Succeeded
                }
                Ok(StepCompletion::Skipped(note)) => {
                    debug!("step {}: skipped ({})", name, note);
                    StepOutcome::Skipped
                }
                Err(e) => {
                    error!("step {} failed: {}", name, e.code);
                    report.push_error(&name, &e.code);
                    StepOutcome::Failed(e.code)
                }
            };
            report.records.push(ActionRecord { name, outcome });
        }
        report
    }
}

/// Which call of [`create_or_update`] took effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Updated,
    Created,
}

/// Update first; on a not-found class error, create across the backoff
/// schedule until one attempt succeeds.
///
/// Any other update error is returned as is. When every create attempt
/// fails the last create error is returned.
pub async fn create_or_update<U, UF, C, CF>(
    mut update: U,
    mut create: C,
    backoff: &[Duration],
) -> Result<Upsert, ProviderError>
where
    U: FnMut() -> UF,
    UF: Future<Output = Result<(), ProviderError>>,
    C: FnMut() -> CF,
    CF: Future<Output = Result<(), ProviderError>>,
{
    let update_err = match update().await {
        Ok(()) => return Ok(Upsert::Updated),
        Err(e) if e.is_not_found() => e,
        Err(e) => return Err(e),
    };
    debug!("update found nothing ({}); creating", update_err.code);

    let mut last_err = update_err;
    for (attempt, delay) in backoff.iter().enumerate() {
        tokio::time::sleep(*delay).await;
        match create().await {
            Ok(()) => return Ok(Upsert::Created),
            Err(e) => {
                warn!("create attempt {} failed: {}", attempt + 1, e.code);
                last_err = e;
            }
        }
    }
    Err(last_err)
}

/// Calls `attempt` up to `attempts` times, `interval` apart, until it reports
/// convergence. Errors count as "not yet".
pub async fn poll_until_converged<F, Fut>(attempts: u32, interval: Duration, mut attempt: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, ProviderError>>,
{
    for n in 1..=attempts {
        match attempt().await {
            Ok(true) => return true,
            Ok(false) => debug!("poll {}/{}: not converged", n, attempts),
            Err(e) => debug!("poll {}/{}: {}", n, attempts, e.code),
        }
        if n < attempts {
            tokio::time::sleep(interval).await;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct Scripted {
        name: &'static str,
        result: Result<Vec<&'static str>, &'static str>,
    }

    #[async_trait]
    impl RemediationStep<Vec<String>> for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn apply(&self, ran: &mut Vec<String>) -> StepResult {
            ran.push(self.name.to_string());
            match &self.result {
                Ok(tokens) if tokens.is_empty() => Ok(StepCompletion::Skipped("nothing".into())),
                Ok(tokens) => Ok(StepCompletion::Applied(tokens.iter().map(|t| t.to_string()).collect())),
                Err(code) => Err(StepError::new(*code)),
            }
        }
    }

    fn step(name: &'static str, result: Result<Vec<&'static str>, &'static str>) -> Box<dyn RemediationStep<Vec<String>>> {
        Box::new(Scripted { name, result })
    }

    #[tokio::test]
    async fn failure_does_not_abort_later_steps() {
        let steps = vec![
            step("snapshot", Err("SnapshotLimitExceeded")),
            step("isolate", Ok(vec!["IsolationSG:sg-1"])),
            step("stop", Ok(vec!["StopInstance"])),
        ];
        let mut ran = Vec::new();
        let report = StepExecutor::default().run(&mut ran, &steps).await;

        assert_eq!(ran, vec!["snapshot", "isolate", "stop"]);
        assert_eq!(report.errors, vec!["snapshot:SnapshotLimitExceeded"]);
        assert_eq!(report.actions, vec!["IsolationSG:sg-1", "StopInstance"]);
        assert!(!report.ok());
        assert_eq!(report.records[0].outcome, StepOutcome::Failed("SnapshotLimitExceeded".into()));
    }

    #[tokio::test]
    async fn skipped_steps_are_recorded_without_actions() {
        let steps = vec![step("selectors", Ok(vec![])), step("logging", Ok(vec!["StartLoggingEnsured"]))];
        let report = StepExecutor::default().run(&mut Vec::new(), &steps).await;
        assert_eq!(report.records[0].outcome, StepOutcome::Skipped);
        assert_eq!(report.actions, vec!["StartLoggingEnsured"]);
        assert!(report.ok());
    }

    #[tokio::test]
    async fn update_success_never_creates() {
        let creates = AtomicU32::new(0);
        let counter = &creates;
        let result = create_or_update(
            || async { Ok(()) },
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            &RetryPolicy::immediate().create_backoff,
        )
        .await;
        assert_eq!(result, Ok(Upsert::Updated));
        assert_eq!(creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn exhausted_backoff_surfaces_last_create_error() {
        let attempts = Mutex::new(0u32);
        let result = create_or_update(
            || async { Err(ProviderError::code("TrailNotFoundException")) },
            || {
                let n = {
                    let mut a = attempts.lock().unwrap();
                    *a += 1;
                    *a
                };
                async move { Err(ProviderError::code(format!("InsufficientS3BucketPolicy{}", n))) }
            },
            &[Duration::ZERO, Duration::ZERO, Duration::ZERO],
        )
        .await;
        assert_eq!(*attempts.lock().unwrap(), 3);
        assert_eq!(result.unwrap_err().code, "InsufficientS3BucketPolicy3");
    }

    #[tokio::test]
    async fn other_update_errors_are_not_retried() {
        let creates = AtomicU32::new(0);
        let counter = &creates;
        let result = create_or_update(
            || async { Err(ProviderError::code("AccessDenied")) },
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            &[Duration::ZERO],
        )
        .await;
        assert_eq!(result.unwrap_err().code, "AccessDenied");
        assert_eq!(creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn create_succeeds_on_second_attempt() {
        let attempts = AtomicU32::new(0);
        let result = create_or_update(
            || async { Err(ProviderError::code("TrailNotFoundException")) },
            || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(ProviderError::code("OperationNotPermitted"))
                    } else {
                        Ok(())
                    }
                }
            },
            &[Duration::ZERO; 3],
        )
        .await;
        assert_eq!(result, Ok(Upsert::Created));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn poll_stops_at_first_convergence() {
        let calls = AtomicU32::new(0);
        let converged = poll_until_converged(4, Duration::ZERO, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(ProviderError::code("Throttling"))
                } else {
                    Ok(n >= 1)
                }
            }
        })
        .await;
        assert!(converged);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn poll_gives_up_after_fixed_attempts() {
        let calls = AtomicU32::new(0);
        let converged = poll_until_converged(4, Duration::ZERO, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(false) }
        })
        .await;
        assert!(!converged);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
