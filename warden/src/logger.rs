// warden/src/logger.rs
//! Logger setup. Logs always go to stderr; stdout is reserved for results.

use env_logger::{Builder, Env, Target};
use log::LevelFilter;

/// Installs `env_logger`. `level` overrides `RUST_LOG` (default `info`).
/// Calling it twice is harmless.
pub fn init_logger(level: Option<LevelFilter>) {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    if let Some(level) = level {
        builder.filter_level(level);
    }
    builder.target(Target::Stderr).format_timestamp_millis();
    let _ = builder.try_init();
}
