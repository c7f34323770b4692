// warden/src/commands/mod.rs
//! Subcommand runners.

pub mod check_config;
pub mod handle;

use anyhow::{Context, Result};
use std::path::Path;

use warden_core::WardenConfig;

/// File (when given) plus process environment. Not validated yet.
pub fn load_config(path: Option<&Path>) -> Result<WardenConfig> {
    let mut config = match path {
        Some(p) => WardenConfig::load_from_file(p)
            .with_context(|| format!("Failed to load configuration: {}", p.display()))?,
        None => WardenConfig::default(),
    };
    config
        .apply_env_overrides(std::env::vars())
        .context("Invalid configuration override in environment")?;
    Ok(config)
}
