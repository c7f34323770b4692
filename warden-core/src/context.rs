// warden-core/src/context.rs
//! The immutable per-process context every handler runs against.
//!
//! Built once by [`bootstrap`]: the configuration is validated, our own
//! identity is resolved, and the notifier and executor are assembled. After
//! that nothing in it changes; handlers only borrow it.
//!
//! License: MIT OR Apache-2.0

use log::info;
use std::sync::Arc;

use crate::config::WardenConfig;
use crate::errors::WardenError;
use crate::executor::StepExecutor;
use crate::identity::{IdentityResolver, SelfIdentity};
use crate::notify::{EventDumper, Notifier};
use crate::providers::memory::MemoryCloud;
use crate::providers::{BulkStore, ComputeApi, IdentitySource, LabelStore, NotificationChannel, TrailApi};

/// The external collaborators, one per concern.
#[derive(Clone)]
pub struct Collaborators {
    pub identity: Arc<dyn IdentitySource>,
    pub labels: Arc<dyn LabelStore>,
    pub trails: Arc<dyn TrailApi>,
    pub compute: Arc<dyn ComputeApi>,
    pub channel: Arc<dyn NotificationChannel>,
    /// Only needed when event dumps are configured.
    pub bulk: Option<Arc<dyn BulkStore>>,
}

impl Collaborators {
    /// Every concern served by one in-memory cloud.
    pub fn from_memory(cloud: Arc<MemoryCloud>) -> Self {
        Self {
            identity: cloud.clone(),
            labels: cloud.clone(),
            trails: cloud.clone(),
            compute: cloud.clone(),
            channel: cloud.clone(),
            bulk: Some(cloud),
        }
    }

    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_bulk_store(mut self, bulk: Arc<dyn BulkStore>) -> Self {
        self.bulk = Some(bulk);
        self
    }
}

pub struct RemediationContext {
    pub config: WardenConfig,
    pub me: SelfIdentity,
    pub cloud: Collaborators,
    pub notifier: Notifier,
    pub executor: StepExecutor,
}

/// Validates `config` and assembles the context. The only fallible step of
/// a process's life before events are handled.
pub async fn bootstrap(config: WardenConfig, cloud: Collaborators) -> Result<RemediationContext, WardenError> {
    config.validate()?;

    let resolver = IdentityResolver::new(cloud.identity.clone(), config.identity.clone());
    let me = resolver.resolve().await;

    let dumper = match (&config.event_dump.bucket, &cloud.bulk) {
        (Some(_), Some(store)) => Some(EventDumper::new(
            store.clone(),
            &config.event_dump.prefix,
            config.dump_encryption(),
            config.presign_ttl(),
        )),
        (Some(_), None) => return Err(WardenError::MissingOption("event dump store")),
        (None, _) => None,
    };

    let notifier = Notifier::new(
        cloud.channel.clone(),
        config.severity_channels(),
        dumper,
        config.notifier_settings(),
    );
    let executor = StepExecutor::new(config.retry_policy());

    info!(
        "Context ready: account={} role={} dumps={}",
        if me.account_id.is_empty() { "-" } else { me.account_id.as_str() },
        if me.role_name.is_empty() { "-" } else { me.role_name.as_str() },
        config.event_dump.bucket.is_some()
    );

    Ok(RemediationContext {
        config,
        me,
        cloud,
        notifier,
        executor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::CallerIdentity;

    #[tokio::test]
    async fn bootstrap_refuses_invalid_config() {
        let cloud = Arc::new(MemoryCloud::new());
        let result = bootstrap(WardenConfig::default(), Collaborators::from_memory(cloud.clone())).await;
        assert!(matches!(result, Err(WardenError::InvalidConfig(_))));
        assert!(cloud.calls().await.is_empty());
    }

    #[tokio::test]
    async fn bootstrap_resolves_identity_once() {
        let cloud = Arc::new(MemoryCloud::new());
        cloud
            .set_caller(CallerIdentity {
                account: "111122223333".into(),
                arn: "arn:aws:sts::111122223333:assumed-role/Warden/s".into(),
            })
            .await;
        let mut config = WardenConfig::default();
        config.channels.high = "high".into();
        let ctx = bootstrap(config, Collaborators::from_memory(cloud.clone())).await.unwrap();
        assert_eq!(ctx.me.role_name, "Warden");
        assert_eq!(cloud.calls().await, vec!["GetCallerIdentity"]);
    }
}
