//! CLI module for the broker negotiator

pub mod app;
pub mod commands;

pub use app::{load_settings, replay, run_live};
pub use commands::{Cli, Commands};
