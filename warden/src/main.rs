// warden/src/main.rs
//! Warden entry point.
//!
//! Exit code 0 whenever an invocation ran, whatever its `ok` field says;
//! 1 for setup failures (configuration, input files, bootstrap).

use clap::Parser;
use log::LevelFilter;
use std::process::ExitCode;

use warden::cli::{Cli, Commands};
use warden::{logger, run_check_config, run_handle, ui};

#[tokio::main]
async fn main() -> ExitCode {
    // Before parsing, so `env` fallbacks of flags see .env values too.
    let dotenv = dotenvy::dotenv();
    let args = Cli::parse();

    let level = if args.quiet {
        Some(LevelFilter::Off)
    } else if args.debug {
        Some(LevelFilter::Debug)
    } else {
        None
    };
    logger::init_logger(level);

    // A missing .env is the normal case.
    if let Ok(path) = dotenv {
        log::debug!("Loaded environment from {}", path.display());
    }

    let result = match &args.command {
        Commands::Handle(cmd) => run_handle(cmd, args.quiet).await.map(|_| ()),
        Commands::CheckConfig(cmd) => run_check_config(cmd, args.quiet),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            ui::error_msg(format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}
