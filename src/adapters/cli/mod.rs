//! CLI Adapter
//!
//! Command-line interface for the competition agent.
//! Uses clap derive macros for argument parsing.

mod commands;

pub use commands::{BalancesCmd, CheckConfigCmd, CliApp, Command, RunCmd};
