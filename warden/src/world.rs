// warden/src/world.rs
//! The JSON world snapshot the CLI runs against.
//!
//! A missing file is an empty world. Writes go to a sibling temp file first
//! and are renamed into place.

use anyhow::{Context, Result};
use log::debug;
use std::fs;
use std::path::Path;

use warden_core::CloudState;

pub fn load_world(path: &Path) -> Result<CloudState> {
    if !path.exists() {
        debug!("World file {} does not exist; starting empty.", path.display());
        return Ok(CloudState::default());
    }
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read world file: {}", path.display()))?;
    if text.trim().is_empty() {
        return Ok(CloudState::default());
    }
    serde_json::from_str(&text).with_context(|| format!("Invalid world file: {}", path.display()))
}

pub fn save_world(path: &Path, state: &CloudState) -> Result<()> {
    let json = serde_json::to_string_pretty(state).context("Failed to serialize world")?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    fs::write(&tmp, json.as_bytes())
        .with_context(|| format!("Failed to write world file: {}", path.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to replace world file: {}", path.display()))?;
    debug!("World written to {}", path.display());
    Ok(())
}
