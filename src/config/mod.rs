//! Configuration Module
//!
//! Loads and validates configuration from TOML files.

pub mod loader;

pub use loader::{load_config, ChainSection, Config, ConfigError, API_KEY_ENV, ENVIRONMENT_ENV};
