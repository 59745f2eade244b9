//! CLI Commands
//!
//! Argument definitions for the agent binary. Command handlers live in
//! `main.rs`; this module only parses and resolves the log filter.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

const DEFAULT_CONFIG: &str = "config/recall.toml";

/// Recall Agent - multi-chain momentum/volatility trading agent
#[derive(Parser, Debug)]
#[command(
    name = "recall-agent",
    version = env!("CARGO_PKG_VERSION"),
    about = "Long-only multi-chain trading agent for the Recall competition",
    long_about = "Runs one momentum/volatility trading loop per configured chain against the \
                  Recall competition API, sizing with inverse-volatility weights under shared \
                  portfolio risk limits."
)]
pub struct CliApp {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start one trading loop per configured chain
    Run(RunCmd),

    /// Load and validate a configuration file
    CheckConfig(CheckConfigCmd),

    /// Check API health and print per-chain balances
    Balances(BalancesCmd),
}

impl Command {
    pub fn config_path(&self) -> &PathBuf {
        match self {
            Command::Run(cmd) => &cmd.config,
            Command::CheckConfig(cmd) => &cmd.config,
            Command::Balances(cmd) => &cmd.config,
        }
    }
}

/// Start trading
#[derive(Parser, Debug)]
pub struct RunCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,

    /// Stop after this many aggregated bars
    #[arg(long, value_name = "BARS")]
    pub max_cycles: Option<u64>,
}

/// Validate configuration
#[derive(Parser, Debug)]
pub struct CheckConfigCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,
}

/// Balance snapshot
#[derive(Parser, Debug)]
pub struct BalancesCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,
}

impl CliApp {
    /// Filter directive: flags first, then RUST_LOG, then the configured level
    pub fn log_directive(&self, rust_log: Option<&str>, configured: Option<&str>) -> String {
        if self.debug {
            return "debug".to_string();
        }
        if self.verbose {
            return "info".to_string();
        }
        rust_log
            .filter(|s| !s.trim().is_empty())
            .or(configured)
            .unwrap_or("info")
            .to_string()
    }

    /// Initialize logging system
    pub fn init_logging(&self, configured: Option<&str>) -> anyhow::Result<()> {
        use tracing_subscriber::{fmt, EnvFilter};

        let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
        let filter = EnvFilter::try_new(self.log_directive(rust_log.as_deref(), configured))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialise logging: {}", e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_app_parse_run() {
        let args = vec!["recall-agent", "run", "--config", "test.toml"];
        let app = CliApp::try_parse_from(args).unwrap();

        match app.command {
            Command::Run(cmd) => {
                assert_eq!(cmd.config, PathBuf::from("test.toml"));
                assert_eq!(cmd.max_cycles, None);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_app_parse_run_with_max_cycles() {
        let args = vec!["recall-agent", "run", "--max-cycles", "10"];
        let app = CliApp::try_parse_from(args).unwrap();

        match app.command {
            Command::Run(cmd) => assert_eq!(cmd.max_cycles, Some(10)),
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_app_parse_check_config() {
        let args = vec!["recall-agent", "check-config", "-c", "other.toml"];
        let app = CliApp::try_parse_from(args).unwrap();

        match app.command {
            Command::CheckConfig(cmd) => assert_eq!(cmd.config, PathBuf::from("other.toml")),
            _ => panic!("Expected CheckConfig command"),
        }
    }

    #[test]
    fn test_cli_app_parse_balances() {
        let args = vec!["recall-agent", "balances"];
        let app = CliApp::try_parse_from(args).unwrap();
        assert!(matches!(app.command, Command::Balances(_)));
    }

    #[test]
    fn test_default_config_path() {
        for sub in ["run", "check-config", "balances"] {
            let app = CliApp::try_parse_from(vec!["recall-agent", sub]).unwrap();
            assert_eq!(app.command.config_path(), &PathBuf::from(DEFAULT_CONFIG));
        }
    }

    #[test]
    fn test_global_flags() {
        let args = vec!["recall-agent", "run", "--verbose", "--debug"];
        let app = CliApp::try_parse_from(args).unwrap();
        assert!(app.verbose);
        assert!(app.debug);
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(CliApp::try_parse_from(vec!["recall-agent", "swap"]).is_err());
    }

    #[test]
    fn test_log_directive_precedence() {
        let quiet = CliApp::try_parse_from(vec!["recall-agent", "run"]).unwrap();
        assert_eq!(quiet.log_directive(None, None), "info");
        assert_eq!(quiet.log_directive(None, Some("warn")), "warn");
        assert_eq!(quiet.log_directive(Some("recall_agent=trace"), Some("warn")), "recall_agent=trace");

        let debug = CliApp::try_parse_from(vec!["recall-agent", "run", "--debug"]).unwrap();
        assert_eq!(debug.log_directive(Some("error"), Some("warn")), "debug");

        let verbose = CliApp::try_parse_from(vec!["recall-agent", "run", "-v"]).unwrap();
        assert_eq!(verbose.log_directive(None, Some("error")), "info");
    }
}
