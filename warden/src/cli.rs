// warden/src/cli.rs
//! Command-line interface of the `warden` binary.
//! License: MIT OR Apache-2.0

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use warden_core::HandlerKind;

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(
    name = "warden",
    author = "Obscura Team (Relay)",
    version = env!("CARGO_PKG_VERSION"),
    about = "Replay cloud security events through Warden's remediation handlers",
    long_about = "Warden reacts to cloud security signals (audit trail tampering, compromised hosts, admin ports opened to the world), restores a safe state and notifies operators. The CLI runs one event against a JSON world snapshot, so every remediation can be rehearsed and inspected offline.",
    arg_required_else_help = true
)]
pub struct Cli {
    /// Disable logging and status lines; errors are still printed
    #[arg(long, short = 'q', global = true, help = "Suppress log output and status messages.")]
    pub quiet: bool,

    /// Force debug logging regardless of RUST_LOG
    #[arg(long, short = 'd', global = true, conflicts_with = "quiet", help = "Enable debug logging.")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Runs one event through a handler against a world snapshot.
    #[command(about = "Handle one event against a world snapshot and print the invocation result as JSON.")]
    Handle(HandleCommand),

    /// Loads and validates the configuration.
    #[command(name = "check-config", about = "Load the configuration (file, .env, environment) and validate it.")]
    CheckConfig(CheckConfigCommand),
}

#[derive(Parser, Debug)]
pub struct HandleCommand {
    /// Event envelope, `-` for stdin.
    #[arg(long, short = 'e', value_name = "FILE", help = "Event JSON file, or '-' to read it from stdin.")]
    pub event: PathBuf,

    /// World snapshot, rewritten after the invocation.
    #[arg(long, short = 'w', value_name = "FILE", help = "World snapshot JSON; updated in place after the run.")]
    pub world: PathBuf,

    #[arg(long, value_enum, default_value = "auto", help = "Handler to run; 'auto' routes by event shape.")]
    pub handler: HandlerChoice,

    #[arg(long, value_name = "FILE", env = "WARDEN_CONFIG", help = "Path to the YAML configuration file.")]
    pub config: Option<PathBuf>,

    /// Directory used as the event dump bucket.
    #[arg(long = "dump-dir", value_name = "DIR", help = "Store full events in this directory and link them from reports.")]
    pub dump_dir: Option<PathBuf>,

    #[arg(
        long = "presign-secret",
        value_name = "SECRET",
        env = "WARDEN_PRESIGN_SECRET",
        hide_env_values = true,
        default_value = "warden-local",
        help = "Signing secret for links into --dump-dir."
    )]
    pub presign_secret: String,

    /// Deliver reports to a webhook instead of the world outbox.
    #[arg(long, value_name = "URL", env = "WARDEN_WEBHOOK_URL", help = "POST reports to this webhook instead of the world outbox.")]
    pub webhook: Option<String>,

    #[arg(long, help = "Pretty-print the result JSON.")]
    pub pretty: bool,
}

#[derive(Parser, Debug)]
pub struct CheckConfigCommand {
    #[arg(long, value_name = "FILE", env = "WARDEN_CONFIG", help = "Path to the YAML configuration file.")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum HandlerChoice {
    Auto,
    TrailTamper,
    HostQuarantine,
    AdminPorts,
}

impl HandlerChoice {
    /// `None` lets the router decide.
    pub fn kind(self) -> Option<HandlerKind> {
        match self {
            HandlerChoice::Auto => None,
            HandlerChoice::TrailTamper => Some(HandlerKind::TrailTamper),
            HandlerChoice::HostQuarantine => Some(HandlerKind::HostQuarantine),
            HandlerChoice::AdminPorts => Some(HandlerKind::AdminPorts),
        }
    }
}
