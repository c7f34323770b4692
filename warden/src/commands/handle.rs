// warden/src/commands/handle.rs
//! `warden handle`: one invocation against a world snapshot.
//!
//! The world is loaded into a [`MemoryCloud`], the context is bootstrapped
//! (identity resolved once), the event runs through one handler and the
//! mutated world is written back, so labels written by this run are what
//! the next run's idempotency guard sees.

use anyhow::{Context, Result};
use log::{debug, info};
use serde_json::Value;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;

use warden_core::{
    bootstrap, handle_event, Collaborators, InvocationOutcome, LocalObjectStore, MemoryCloud,
    WebhookChannel,
};

use crate::cli::HandleCommand;
use crate::commands::load_config;
use crate::ui;
use crate::world::{load_world, save_world};

/// Bucket name reported for `--dump-dir` objects when none is configured.
pub const LOCAL_DUMP_BUCKET: &str = "warden-local";

pub fn read_event(path: &Path) -> Result<Value> {
    let text = if path.as_os_str() == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read event from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read event file: {}", path.display()))?
    };
    serde_json::from_str(&text).context("Event is not valid JSON")
}

/// Prints the outcome JSON on stdout; with `quiet`, nothing on stderr
/// unless the run fails.
pub async fn run_handle(cmd: &HandleCommand, quiet: bool) -> Result<InvocationOutcome> {
    let mut config = load_config(cmd.config.as_deref())?;
    let raw = read_event(&cmd.event)?;
    let world = load_world(&cmd.world)?;

    let cloud = Arc::new(MemoryCloud::from_state(world));
    let mut collaborators = Collaborators::from_memory(cloud.clone());

    if let Some(dir) = &cmd.dump_dir {
        let bucket = config
            .event_dump
            .bucket
            .get_or_insert_with(|| LOCAL_DUMP_BUCKET.to_string())
            .clone();
        debug!("Event dumps go to {} (bucket {})", dir.display(), bucket);
        let store = LocalObjectStore::new(dir.clone(), &bucket, cmd.presign_secret.as_bytes());
        collaborators = collaborators.with_bulk_store(Arc::new(store));
    }

    if let Some(url) = &cmd.webhook {
        let channel = WebhookChannel::new(url).context("Failed to set up webhook channel")?;
        collaborators = collaborators.with_channel(Arc::new(channel));
    }

    let ctx = bootstrap(config, collaborators)
        .await
        .context("Failed to bootstrap remediation context")?;
    let outcome = handle_event(&ctx, raw, cmd.handler.kind()).await?;

    save_world(&cmd.world, &cloud.snapshot().await)?;

    let json = if cmd.pretty {
        serde_json::to_string_pretty(&outcome)
    } else {
        serde_json::to_string(&outcome)
    }
    .context("Failed to serialize invocation result")?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "{}", json)?;

    match &outcome {
        InvocationOutcome::Skipped(s) => info!("Skipped: {}", s.skipped),
        InvocationOutcome::Completed(c) if c.ok => info!("Completed: {} action(s)", c.actions.len()),
        InvocationOutcome::Completed(c) if !quiet => {
            ui::warn_msg(format!("completed with errors: {}", c.errors.join(", ")))
        }
        InvocationOutcome::Completed(_) => {}
    }
    Ok(outcome)
}
