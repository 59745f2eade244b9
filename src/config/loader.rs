//! Configuration Loader
//!
//! Loads and validates the agent's TOML configuration. Every section has
//! defaults, so a file only needs its `[[chains]]` entries; everything is
//! range-checked before the first network call.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::adapters::rate_limiter::RateBudget;
use crate::adapters::recall::RecallConfig;
use crate::adapters::retry::RetryPolicy;
use crate::application::{ExecutorConfig, LoopSettings};
use crate::domain::{Chain, RiskLimits};
use crate::strategy::{FilterThresholds, SignalParams};

pub const API_KEY_ENV: &str = "RECALL_API_KEY";
pub const ENVIRONMENT_ENV: &str = "RECALL_ENV";

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default)]
    pub strategy: StrategySection,
    #[serde(default)]
    pub risk: RiskSection,
    #[serde(default)]
    pub portfolio: PortfolioSection,
    #[serde(default)]
    pub filter: FilterSection,
    #[serde(default)]
    pub rate_limits: RateLimitSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub telemetry: TelemetrySection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub chains: Vec<ChainSection>,
}

/// Recall API endpoints and credentials
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub production_url: String,
    pub sandbox_url: String,
    /// Used only when RECALL_API_KEY is unset
    pub api_key: Option<String>,
    /// "production" or "sandbox"; RECALL_ENV overrides
    pub environment: String,
    pub discovery_path: String,
    pub request_timeout_secs: u64,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            production_url: "https://api.competitions.recall.network".to_string(),
            sandbox_url: "https://api.sandbox.competitions.recall.network".to_string(),
            api_key: None,
            environment: "production".to_string(),
            discovery_path: "/api/tokens/eligible".to_string(),
            request_timeout_secs: 15,
        }
    }
}

/// Signal and bar timing
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StrategySection {
    /// Seconds per bar
    pub bar_seconds: u64,
    pub lookback_short: usize,
    pub lookback_long: usize,
    pub z_entry: f64,
    pub z_exit: f64,
    pub min_momentum: f64,
}

impl Default for StrategySection {
    fn default() -> Self {
        let signal = SignalParams::default();
        Self {
            bar_seconds: 30,
            lookback_short: signal.lookback_short,
            lookback_long: signal.lookback_long,
            z_entry: signal.z_entry,
            z_exit: signal.z_exit,
            min_momentum: signal.min_momentum,
        }
    }
}

/// Risk limits
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskSection {
    pub min_daily_trades: u32,
    pub max_daily_trades: u32,
    /// Percent of total equity
    pub max_single_trade_pct: f64,
    /// Percent of total equity
    pub max_exposure_per_asset_pct: f64,
    /// Fraction, 0.18 = 18%
    pub max_drawdown_stop: f64,
    pub cooldown_seconds: u64,
    /// Percent
    pub slippage_tolerance_pct: f64,
    pub forced_trade_margin_minutes: u64,
    /// Defaults to `portfolio.per_trade_base_usd`
    pub forced_trade_usd: Option<f64>,
}

impl Default for RiskSection {
    fn default() -> Self {
        let limits = RiskLimits::default();
        Self {
            min_daily_trades: limits.min_daily_trades,
            max_daily_trades: limits.max_daily_trades,
            max_single_trade_pct: limits.max_single_trade_pct,
            max_exposure_per_asset_pct: limits.max_exposure_per_asset_pct,
            max_drawdown_stop: limits.max_drawdown_stop,
            cooldown_seconds: limits.cooldown_seconds,
            slippage_tolerance_pct: 0.5,
            forced_trade_margin_minutes: limits.forced_trade_margin_minutes,
            forced_trade_usd: None,
        }
    }
}

/// Order sizing and the slower intervals
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PortfolioSection {
    pub per_trade_base_usd: f64,
    pub min_order_usd: f64,
    /// Fraction of chain equity the allocator may deploy
    pub max_aggregate_exposure: f64,
    pub rebalance_seconds: u64,
    pub discovery_seconds: u64,
}

impl Default for PortfolioSection {
    fn default() -> Self {
        Self {
            per_trade_base_usd: 25.0,
            min_order_usd: 1.0,
            max_aggregate_exposure: 0.8,
            rebalance_seconds: 120,
            discovery_seconds: 900,
        }
    }
}

/// Token eligibility thresholds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilterSection {
    pub min_age_hours: f64,
    pub min_volume_24h: f64,
    pub min_liquidity: f64,
    pub min_fdv: f64,
}

impl Default for FilterSection {
    fn default() -> Self {
        let thresholds = FilterThresholds::default();
        Self {
            min_age_hours: thresholds.min_age_hours,
            min_volume_24h: thresholds.min_volume_24h,
            min_liquidity: thresholds.min_liquidity,
            min_fdv: thresholds.min_fdv,
        }
    }
}

/// Request budgets shared by every chain
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    pub trade_per_min: u32,
    pub price_per_min: u32,
    pub balance_per_min: u32,
    pub global_per_min: u32,
    pub agent_per_hour: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        let budget = RateBudget::default();
        Self {
            trade_per_min: budget.trade_per_min,
            price_per_min: budget.price_per_min,
            balance_per_min: budget.balance_per_min,
            global_per_min: budget.global_per_min,
            agent_per_hour: budget.agent_per_hour,
            acquire_timeout_secs: budget.acquire_timeout.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 250,
            max_delay_ms: 8_000,
            jitter: 0.1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetrySection {
    /// `~` and `$VARS` are expanded
    pub csv_path: Option<String>,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            csv_path: Some("telemetry_equity.csv".to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// One chain account
#[derive(Debug, Clone, Deserialize)]
pub struct ChainSection {
    /// `specificChain` name, e.g. "eth", "base", "svm"
    pub name: String,
    /// Address of the chain's cash stable
    pub cash_token: String,
    #[serde(default = "default_cash_symbol")]
    pub cash_symbol: String,
}

fn default_cash_symbol() -> String {
    "USDC".to_string()
}

impl ChainSection {
    pub fn chain(&self) -> Result<Chain, ConfigError> {
        self.name
            .parse()
            .map_err(|e| ConfigError::ValidationError(format!("{}", e)))
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("Missing API key: set {0} or [api].api_key")]
    MissingApiKey(&'static str),
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

fn invalid(message: String) -> ConfigError {
    ConfigError::ValidationError(message)
}

fn check_pct(name: &str, value: f64) -> Result<(), ConfigError> {
    if !(value > 0.0 && value <= 100.0) {
        return Err(invalid(format!("{} must be in (0, 100], got {}", name, value)));
    }
    Ok(())
}

fn check_fraction(name: &str, value: f64) -> Result<(), ConfigError> {
    if !(value > 0.0 && value <= 1.0) {
        return Err(invalid(format!("{} must be in (0, 1], got {}", name, value)));
    }
    Ok(())
}

fn check_positive(name: &str, value: f64) -> Result<(), ConfigError> {
    if !(value > 0.0) || !value.is_finite() {
        return Err(invalid(format!("{} must be > 0, got {}", name, value)));
    }
    Ok(())
}

impl Config {
    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        // api
        for (name, url) in [
            ("production_url", &self.api.production_url),
            ("sandbox_url", &self.api.sandbox_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(invalid(format!("{} must be an http(s) URL, got '{}'", name, url)));
            }
        }
        self.base_url_for(Some(self.api.environment.as_str()))?;
        if self.api.discovery_path.trim().is_empty() {
            return Err(invalid("discovery_path cannot be empty".to_string()));
        }
        if self.api.request_timeout_secs == 0 {
            return Err(invalid("request_timeout_secs must be > 0".to_string()));
        }

        // strategy
        if self.strategy.bar_seconds == 0 {
            return Err(invalid("bar_seconds must be > 0".to_string()));
        }
        SignalParams::from(self)
            .validate()
            .map_err(|e| invalid(e.to_string()))?;

        // risk
        check_pct("max_single_trade_pct", self.risk.max_single_trade_pct)?;
        check_pct("max_exposure_per_asset_pct", self.risk.max_exposure_per_asset_pct)?;
        check_pct("slippage_tolerance_pct", self.risk.slippage_tolerance_pct)?;
        check_fraction("max_drawdown_stop", self.risk.max_drawdown_stop)?;
        if self.risk.forced_trade_margin_minutes == 0 || self.risk.forced_trade_margin_minutes > 24 * 60 {
            return Err(invalid(format!(
                "forced_trade_margin_minutes must be in (0, 1440], got {}",
                self.risk.forced_trade_margin_minutes
            )));
        }
        if self.risk.max_daily_trades == 0 || self.risk.max_daily_trades < self.risk.min_daily_trades {
            return Err(invalid(format!(
                "max_daily_trades ({}) must be > 0 and >= min_daily_trades ({})",
                self.risk.max_daily_trades, self.risk.min_daily_trades
            )));
        }
        if let Some(usd) = self.risk.forced_trade_usd {
            check_positive("forced_trade_usd", usd)?;
        }

        // portfolio
        check_positive("per_trade_base_usd", self.portfolio.per_trade_base_usd)?;
        if !(self.portfolio.min_order_usd >= 0.0 && self.portfolio.min_order_usd < self.portfolio.per_trade_base_usd) {
            return Err(invalid(format!(
                "min_order_usd must be in [0, per_trade_base_usd), got {}",
                self.portfolio.min_order_usd
            )));
        }
        check_fraction("max_aggregate_exposure", self.portfolio.max_aggregate_exposure)?;
        if self.portfolio.rebalance_seconds < self.strategy.bar_seconds {
            return Err(invalid(format!(
                "rebalance_seconds ({}) must be >= bar_seconds ({})",
                self.portfolio.rebalance_seconds, self.strategy.bar_seconds
            )));
        }
        if self.portfolio.discovery_seconds < self.strategy.bar_seconds {
            return Err(invalid(format!(
                "discovery_seconds ({}) must be >= bar_seconds ({})",
                self.portfolio.discovery_seconds, self.strategy.bar_seconds
            )));
        }

        // filter
        FilterThresholds::from(self)
            .validate()
            .map_err(|e| invalid(e.to_string()))?;

        // rate limits
        let rl = &self.rate_limits;
        for (name, value) in [
            ("trade_per_min", rl.trade_per_min),
            ("price_per_min", rl.price_per_min),
            ("balance_per_min", rl.balance_per_min),
            ("global_per_min", rl.global_per_min),
            ("agent_per_hour", rl.agent_per_hour),
        ] {
            if value == 0 {
                return Err(invalid(format!("{} must be > 0", name)));
            }
        }
        if rl.acquire_timeout_secs == 0 {
            return Err(invalid("acquire_timeout_secs must be > 0".to_string()));
        }

        // retry
        if self.retry.base_delay_ms == 0 || self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(invalid(format!(
                "retry delays must satisfy 0 < base_delay_ms ({}) <= max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(invalid(format!("jitter must be in [0, 1], got {}", self.retry.jitter)));
        }

        // telemetry
        if let Some(path) = &self.telemetry.csv_path {
            if path.trim().is_empty() {
                return Err(invalid("csv_path cannot be empty".to_string()));
            }
        }

        // logging
        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(invalid(format!("unknown log level '{}'", self.logging.level)));
        }

        // chains
        if self.chains.is_empty() {
            return Err(invalid("at least one [[chains]] entry is required".to_string()));
        }
        if self.chains.len() > Chain::ALL.len() {
            return Err(invalid(format!(
                "at most {} chains are supported, got {}",
                Chain::ALL.len(),
                self.chains.len()
            )));
        }
        let mut seen = HashSet::new();
        for section in &self.chains {
            let chain = section.chain()?;
            if !seen.insert(chain) {
                return Err(invalid(format!("chain '{}' configured twice", chain)));
            }
            if section.cash_token.trim().is_empty() {
                return Err(invalid(format!("cash_token for '{}' cannot be empty", chain)));
            }
        }

        Ok(())
    }

    /// Parsed chain list in file order
    pub fn chain_list(&self) -> Result<Vec<Chain>, ConfigError> {
        self.chains.iter().map(ChainSection::chain).collect()
    }

    /// Base URL for `environment`, falling back to `[api].environment`
    pub fn base_url_for(&self, environment: Option<&str>) -> Result<String, ConfigError> {
        let env = environment.unwrap_or(&self.api.environment);
        match env.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(self.api.production_url.clone()),
            "sandbox" => Ok(self.api.sandbox_url.clone()),
            other => Err(invalid(format!(
                "environment must be 'production' or 'sandbox', got '{}'",
                other
            ))),
        }
    }

    /// Base URL chosen by RECALL_ENV, else the file's environment
    pub fn base_url(&self) -> Result<String, ConfigError> {
        let env = std::env::var(ENVIRONMENT_ENV).ok();
        self.base_url_for(env.as_deref())
    }

    /// `from_env` wins over the file value
    pub fn api_key_from(&self, from_env: Option<String>) -> Result<String, ConfigError> {
        from_env
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.api.api_key.clone().filter(|k| !k.trim().is_empty()))
            .ok_or(ConfigError::MissingApiKey(API_KEY_ENV))
    }

    /// API key from RECALL_API_KEY, else `[api].api_key`
    pub fn api_key(&self) -> Result<String, ConfigError> {
        self.api_key_from(std::env::var(API_KEY_ENV).ok())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs)
    }

    /// Transport settings with the key and URL resolved from the environment
    pub fn recall_config(&self) -> Result<RecallConfig, ConfigError> {
        Ok(RecallConfig {
            base_url: self.base_url()?,
            api_key: self.api_key()?,
            discovery_path: self.api.discovery_path.clone(),
            timeout: self.request_timeout(),
        })
    }
}

impl From<&Config> for SignalParams {
    fn from(config: &Config) -> Self {
        SignalParams {
            lookback_short: config.strategy.lookback_short,
            lookback_long: config.strategy.lookback_long,
            z_entry: config.strategy.z_entry,
            z_exit: config.strategy.z_exit,
            min_momentum: config.strategy.min_momentum,
        }
    }
}

impl From<&Config> for RiskLimits {
    fn from(config: &Config) -> Self {
        RiskLimits {
            max_single_trade_pct: config.risk.max_single_trade_pct,
            max_exposure_per_asset_pct: config.risk.max_exposure_per_asset_pct,
            max_drawdown_stop: config.risk.max_drawdown_stop,
            min_daily_trades: config.risk.min_daily_trades,
            max_daily_trades: config.risk.max_daily_trades,
            cooldown_seconds: config.risk.cooldown_seconds,
            forced_trade_margin_minutes: config.risk.forced_trade_margin_minutes,
        }
    }
}

impl From<&Config> for FilterThresholds {
    fn from(config: &Config) -> Self {
        FilterThresholds {
            min_age_hours: config.filter.min_age_hours,
            min_volume_24h: config.filter.min_volume_24h,
            min_liquidity: config.filter.min_liquidity,
            min_fdv: config.filter.min_fdv,
        }
    }
}

impl From<&Config> for RateBudget {
    fn from(config: &Config) -> Self {
        let rl = &config.rate_limits;
        RateBudget {
            trade_per_min: rl.trade_per_min,
            price_per_min: rl.price_per_min,
            balance_per_min: rl.balance_per_min,
            global_per_min: rl.global_per_min,
            agent_per_hour: rl.agent_per_hour,
            acquire_timeout: Duration::from_secs(rl.acquire_timeout_secs),
        }
    }
}

impl From<&Config> for RetryPolicy {
    fn from(config: &Config) -> Self {
        RetryPolicy {
            max_retries: config.retry.max_retries,
            base_delay: Duration::from_millis(config.retry.base_delay_ms),
            max_delay: Duration::from_millis(config.retry.max_delay_ms),
            jitter: config.retry.jitter,
        }
    }
}

impl From<&Config> for ExecutorConfig {
    fn from(config: &Config) -> Self {
        ExecutorConfig {
            per_trade_base_usd: config.portfolio.per_trade_base_usd,
            min_order_usd: config.portfolio.min_order_usd,
            slippage_tolerance_pct: config.risk.slippage_tolerance_pct,
            forced_trade_usd: config
                .risk
                .forced_trade_usd
                .unwrap_or(config.portfolio.per_trade_base_usd),
        }
    }
}

impl From<&Config> for LoopSettings {
    fn from(config: &Config) -> Self {
        LoopSettings {
            bar: Duration::from_secs(config.strategy.bar_seconds),
            rebalance_every: Duration::from_secs(config.portfolio.rebalance_seconds),
            discovery_every: Duration::from_secs(config.portfolio.discovery_seconds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"
[[chains]]
name = "base"
cash_token = "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913"

[[chains]]
name = "svm"
cash_token = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"
"#;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn with_override(section: &str) -> String {
        format!("{}\n{}", section, MINIMAL)
    }

    fn assert_invalid(content: &str) {
        let file = write_config(content);
        let result = load_config(file.path());
        assert!(
            matches!(result, Err(ConfigError::ValidationError(_))),
            "expected validation error, got {:?}",
            result.map(|_| ())
        );
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let file = write_config(MINIMAL);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.chain_list().unwrap(), vec![Chain::Base, Chain::Svm]);
        assert_eq!(config.chains[0].cash_symbol, "USDC");
        assert_eq!(config.strategy.bar_seconds, 30);
        assert_eq!(RiskLimits::from(&config), RiskLimits::default());
        assert_eq!(SignalParams::from(&config), SignalParams::default());
        assert_eq!(RateBudget::from(&config), RateBudget::default());
        assert_eq!(RetryPolicy::from(&config), RetryPolicy::default());
    }

    #[test]
    fn test_sample_config_is_valid() {
        let sample = include_str!("../../config/recall.toml");
        let config: Config = toml::from_str(sample).unwrap();
        config.validate().unwrap();
        assert_eq!(config.chains.len(), 8);
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_config("/nonexistent/path/config.toml");
        assert!(matches!(result.unwrap_err(), ConfigError::IoError(_)));
    }

    #[test]
    fn test_bad_toml() {
        let file = write_config("[[chains]\nname = ");
        assert!(matches!(load_config(file.path()).unwrap_err(), ConfigError::ParseError(_)));
    }

    #[test]
    fn test_invalid_lookbacks() {
        assert_invalid(&with_override("[strategy]\nlookback_short = 120\nlookback_long = 120"));
    }

    #[test]
    fn test_invalid_z_band() {
        assert_invalid(&with_override("[strategy]\nz_entry = 0.5\nz_exit = 0.5"));
    }

    #[test]
    fn test_invalid_risk_percentages() {
        assert_invalid(&with_override("[risk]\nmax_single_trade_pct = 150.0"));
        assert_invalid(&with_override("[risk]\nmax_exposure_per_asset_pct = 0.0"));
        assert_invalid(&with_override("[risk]\nmax_drawdown_stop = 18.0"));
        assert_invalid(&with_override("[risk]\nforced_trade_margin_minutes = 0"));
    }

    #[test]
    fn test_daily_trade_bounds() {
        assert_invalid(&with_override("[risk]\nmax_daily_trades = 0"));
        assert_invalid(&with_override("[risk]\nmin_daily_trades = 5\nmax_daily_trades = 4"));

        let file = write_config(&with_override("[risk]\nmin_daily_trades = 5\nmax_daily_trades = 5"));
        let config = load_config(file.path()).unwrap();
        let limits = RiskLimits::from(&config);
        assert_eq!((limits.min_daily_trades, limits.max_daily_trades), (5, 5));
    }

    #[test]
    fn test_invalid_portfolio() {
        assert_invalid(&with_override("[portfolio]\nper_trade_base_usd = 0.0"));
        assert_invalid(&with_override("[portfolio]\nmax_aggregate_exposure = 1.5"));
        assert_invalid(&with_override("[portfolio]\nrebalance_seconds = 10"));
    }

    #[test]
    fn test_chain_list_checks() {
        assert_invalid("");
        assert_invalid(
            r#"
[[chains]]
name = "base"
cash_token = "0xa"
[[chains]]
name = "BASE"
cash_token = "0xb"
"#,
        );
        assert_invalid(
            r#"
[[chains]]
name = "fantom"
cash_token = "0xa"
"#,
        );
    }

    #[test]
    fn test_environment_selects_url() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        assert_eq!(
            config.base_url_for(None).unwrap(),
            "https://api.competitions.recall.network"
        );
        assert_eq!(
            config.base_url_for(Some(" Sandbox ")).unwrap(),
            "https://api.sandbox.competitions.recall.network"
        );
        assert!(config.base_url_for(Some("staging")).is_err());
    }

    #[test]
    fn test_env_api_key_wins() {
        let config: Config = toml::from_str(&with_override("[api]\napi_key = \"from-file\"")).unwrap();
        assert_eq!(config.api_key_from(Some("from-env".into())).unwrap(), "from-env");
        assert_eq!(config.api_key_from(None).unwrap(), "from-file");
        assert_eq!(config.api_key_from(Some("  ".into())).unwrap(), "from-file");

        let keyless: Config = toml::from_str(MINIMAL).unwrap();
        assert!(matches!(keyless.api_key_from(None), Err(ConfigError::MissingApiKey(_))));
    }

    #[test]
    fn test_executor_config_forced_size_defaults_to_base() {
        let config: Config = toml::from_str(&with_override("[portfolio]\nper_trade_base_usd = 40.0")).unwrap();
        assert_eq!(ExecutorConfig::from(&config).forced_trade_usd, 40.0);

        let config: Config = toml::from_str(&with_override("[risk]\nforced_trade_usd = 12.5")).unwrap();
        assert_eq!(ExecutorConfig::from(&config).forced_trade_usd, 12.5);
    }
}
