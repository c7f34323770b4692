// warden/src/lib.rs
//! # Warden CLI
//!
//! Runs cloud security events through the `warden-core` handlers against a
//! JSON world snapshot, and validates configuration.

pub mod cli;
pub mod commands;
pub mod logger;
pub mod ui;
pub mod world;

pub use commands::check_config::run_check_config;
pub use commands::handle::run_handle;
