// warden-core/src/lib.rs
//! # Warden Core Library
//!
//! `warden-core` holds the remediation orchestration shared by every Warden
//! handler: deciding whether an inbound security event is ours to act on,
//! applying an ordered list of independent remediation steps against cloud
//! state, recording progress as labels on the affected resource, and telling
//! operators what happened.
//!
//! Cloud access goes through the narrow traits in [`providers`]. The crate
//! ships an in-memory cloud ([`MemoryCloud`]) used by the CLI and the tests, a
//! filesystem object store for event dumps and a webhook notification channel.
//!
//! ## Modules
//!
//! * `event`: Normalization of raw event envelopes into [`IncidentEvent`].
//! * `identity`: Resolves the identity this process acts as, once.
//! * `guards`: The guard chain (event kind, self actor, target scope, idempotency).
//! * `executor`: Partial-failure tolerant step execution, create-or-update and polling.
//! * `labels`: The label ledger: baseline fill-in, dynamic overwrite, value bounds.
//! * `notify`: Report composition, optional event dump and delivery.
//! * `handlers`: Trail tamper, host quarantine and admin-port handlers.
//! * `config`: YAML configuration with environment overrides and validation.
//! * `context`: Process bootstrap into an immutable [`RemediationContext`].
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use warden_core::{bootstrap, handle_event, Collaborators, MemoryCloud, WardenConfig};
//!
//! # async fn run() -> Result<(), warden_core::WardenError> {
//! let mut config = WardenConfig::default();
//! config.channels.high = "ops-high".to_string();
//! let cloud = Arc::new(MemoryCloud::new());
//! let ctx = bootstrap(config, Collaborators::from_memory(cloud)).await?;
//! let raw = serde_json::json!({"detail": {"eventName": "AuthorizeSecurityGroupIngress"}});
//! let outcome = handle_event(&ctx, raw, None).await?;
//! println!("{}", serde_json::to_string(&outcome).unwrap_or_default());
//! # Ok(())
//! # }
//! ```
//!
//! ---
//! License: MIT OR Apache-2.0

pub mod config;
pub mod context;
pub mod errors;
pub mod event;
pub mod executor;
pub mod guards;
pub mod handlers;
pub mod identity;
pub mod labels;
pub mod notify;
pub mod outcome;
pub mod providers;

/// Configuration and its validation.
pub use config::{WardenConfig, ENV_KEYS};

pub use context::{bootstrap, Collaborators, RemediationContext};

pub use errors::{ProviderError, StepError, WardenError};

pub use event::{IncidentEvent, SourceIdentity};

pub use executor::{ExecutionReport, RemediationStep, RetryPolicy, StepCompletion, StepExecutor};

pub use guards::{GuardChain, GuardVerdict, SkipReason};

/// Handler selection and the single-invocation entry point.
pub use handlers::{handle_event, handler_for, route, HandlerKind, IncidentHandler};

pub use identity::SelfIdentity;

pub use labels::LabelSet;

pub use notify::{Delivery, IncidentReport, Notifier, Severity};

pub use outcome::InvocationOutcome;

/// The bundled collaborator implementations.
pub use providers::local_store::LocalObjectStore;
pub use providers::memory::{CloudState, MemoryCloud};
pub use providers::webhook::WebhookChannel;
