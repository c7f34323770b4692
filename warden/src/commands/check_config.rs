// warden/src/commands/check_config.rs
//! `warden check-config`.

use anyhow::Result;
use log::info;

use crate::cli::CheckConfigCommand;
use crate::commands::load_config;
use crate::ui;

/// With `quiet`, success is signalled by the exit code alone.
pub fn run_check_config(cmd: &CheckConfigCommand, quiet: bool) -> Result<()> {
    let config = load_config(cmd.config.as_deref())?;
    config.validate()?;

    info!(
        "trail handler: {}, admin ports: {:?}, event dumps: {}",
        config
            .trail_tamper
            .as_ref()
            .map(|t| t.trail_name.as_str())
            .unwrap_or("not configured"),
        config.admin_ports.ports,
        config.event_dump.bucket.as_deref().unwrap_or("off")
    );
    if !quiet {
        ui::success_msg("Configuration OK");
    }
    Ok(())
}
