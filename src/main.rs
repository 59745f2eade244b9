//! Recall Agent - multi-chain competition trading agent
//!
//! Wires the config, the Recall transport and one trading loop per chain
//! under a single coordinator.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;

use recall_agent::adapters::cli::{BalancesCmd, CheckConfigCmd, CliApp, Command, RunCmd};
use recall_agent::adapters::{
    ApiClient, CsvTelemetry, FanoutTelemetry, LogTelemetry, RateBudget, RateLimiter,
    RecallTransport, RetryPolicy,
};
use recall_agent::application::{
    Coordinator, Executor, ExecutorConfig, LoopSettings, RiskDesk, RunSummary, TradingLoop,
};
use recall_agent::config::{load_config, Config, API_KEY_ENV};
use recall_agent::domain::{ChainAccount, RiskLimits};
use recall_agent::ports::TelemetrySink;
use recall_agent::strategy::{Allocator, FilterThresholds, SignalGenerator, SignalParams, TokenFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (RECALL_API_KEY goes here, not in the TOML)
    dotenvy::dotenv().ok();

    let app = CliApp::parse();

    // Read the file first so [logging].level can seed the filter
    let config_path: PathBuf = app.command.config_path().clone();
    let loaded = load_config(&config_path);
    let configured_level = loaded.as_ref().ok().map(|c| c.logging.level.clone());
    app.init_logging(configured_level.as_deref())?;

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Configuration rejected: {}", e);
            return Err(e).with_context(|| format!("Failed to load {}", config_path.display()));
        }
    };

    match app.command {
        Command::Run(cmd) => run_command(cmd, config).await,
        Command::CheckConfig(cmd) => check_config_command(cmd, config),
        Command::Balances(cmd) => balances_command(cmd, config).await,
    }
}

/// Transport + limiter + client, then a health check.
/// Authentication failures are fatal; anything else only warns.
async fn connect(config: &Config) -> Result<ApiClient> {
    let recall = config.recall_config().context("Failed to resolve API settings")?;
    tracing::info!("Recall API: {}", recall.base_url);

    let transport = RecallTransport::new(recall).context("Failed to create Recall transport")?;
    let limiter = Arc::new(RateLimiter::new(&RateBudget::from(config)));
    let client = ApiClient::new(Arc::new(transport), limiter, RetryPolicy::from(config));

    match client.health().await {
        Ok(()) => tracing::info!("Health check passed"),
        Err(e) if e.is_fatal() => {
            tracing::error!("Health check failed: {}", e);
            return Err(e).context("Recall API rejected the credentials");
        }
        Err(e) => tracing::warn!("Health check failed, continuing: {}", e),
    }
    Ok(client)
}

fn build_telemetry(config: &Config) -> Arc<dyn TelemetrySink> {
    let mut sinks: Vec<Box<dyn TelemetrySink>> = vec![Box::new(LogTelemetry)];
    if let Some(path) = &config.telemetry.csv_path {
        let csv = CsvTelemetry::new(path);
        tracing::info!("Equity telemetry: {}", csv.path().display());
        sinks.push(Box::new(csv));
    }
    Arc::new(FanoutTelemetry::new(sinks))
}

fn build_loops(config: &Config, client: &ApiClient, desk: &RiskDesk) -> Result<Vec<TradingLoop>> {
    let params = SignalParams::from(config);
    let thresholds = FilterThresholds::from(config);
    let executor_config = ExecutorConfig::from(config);
    let settings = LoopSettings::from(config);

    let mut loops = Vec::with_capacity(config.chains.len());
    for section in &config.chains {
        let chain = section.chain()?;
        let account = ChainAccount::new(chain, &section.cash_symbol, &section.cash_token);
        let executor = Executor::new(client.clone(), desk.clone(), executor_config.clone());
        loops.push(TradingLoop::new(
            account,
            client.clone(),
            TokenFilter::new(thresholds.clone()),
            SignalGenerator::new(params.clone()),
            Allocator::new(&params, config.portfolio.max_aggregate_exposure),
            executor,
            desk.clone(),
            settings.clone(),
        ));
    }
    Ok(loops)
}

/// Handle run command
async fn run_command(cmd: RunCmd, config: Config) -> Result<()> {
    tracing::info!("Starting recall-agent on {} chains", config.chains.len());

    let client = connect(&config).await?;
    let desk = RiskDesk::new(RiskLimits::from(&config), Utc::now());
    let loops = build_loops(&config, &client, &desk)?;

    let mut coordinator = Coordinator::new(loops, desk, build_telemetry(&config), config.strategy.bar_seconds);
    if let Some(cycles) = cmd.max_cycles {
        coordinator = coordinator.with_max_cycles(cycles);
    }

    // Setup Ctrl+C handler
    let stop = coordinator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            stop.stop();
        }
    });

    let summary = coordinator.run().await.context("Coordinator failed")?;
    print_summary(&summary);
    tracing::info!("recall-agent stopped");
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("Run summary");
    match summary.snapshots.last() {
        Some(last) => {
            println!("  Bars:          {}", summary.snapshots.len());
            println!("  Equity:        ${:.2}", last.total_equity);
            println!("  Sharpe:        {:.4}", last.sharpe);
            println!("  Max drawdown:  {:.2}%", last.max_drawdown * 100.0);
        }
        None => println!("  No completed bars"),
    }
    println!("  Trades:        {}", summary.total_trades);
    println!("  Risk state:    {:?}", summary.final_state);
    for account in &summary.accounts {
        println!(
            "  {:<10} equity ${:>12.2} | cash ${:>12.2} | {} positions",
            account.chain.as_str(),
            account.equity(),
            account.cash(),
            account.positions().count()
        );
    }
}

/// Handle check-config command
fn check_config_command(cmd: CheckConfigCmd, config: Config) -> Result<()> {
    let limits = RiskLimits::from(&config);
    let chains = config.chain_list()?;

    println!("Config OK: {}", cmd.config.display());
    println!("  API:        {}", config.base_url()?);
    println!(
        "  API key:    {}",
        if config.api_key().is_ok() { "present" } else { "missing" }
    );
    println!(
        "  Chains:     {}",
        chains.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(", ")
    );
    println!(
        "  Bars:       {}s (rebalance {}s, discovery {}s)",
        config.strategy.bar_seconds, config.portfolio.rebalance_seconds, config.portfolio.discovery_seconds
    );
    println!(
        "  Signal:     short {} / long {} | z entry {} exit {}",
        config.strategy.lookback_short, config.strategy.lookback_long, config.strategy.z_entry, config.strategy.z_exit
    );
    println!(
        "  Risk:       trade {}% | asset {}% | halt at {:.0}% drawdown | {}-{} trades/day",
        limits.max_single_trade_pct,
        limits.max_exposure_per_asset_pct,
        limits.max_drawdown_stop * 100.0,
        limits.min_daily_trades,
        limits.max_daily_trades
    );
    if config.api_key().is_err() {
        tracing::warn!("No API key: set {} before `run`", API_KEY_ENV);
    }
    Ok(())
}

/// Handle balances command
async fn balances_command(_cmd: BalancesCmd, config: Config) -> Result<()> {
    let client = connect(&config).await?;

    for chain in config.chain_list()? {
        match client.get_balances(chain).await {
            Ok(balances) => {
                println!("{}", chain.as_str());
                if balances.is_empty() {
                    println!("  (no balances)");
                }
                for line in balances {
                    match line.price {
                        Some(price) => println!(
                            "  {:<10} {:>18.6} @ ${:<12.4} = ${:.2}",
                            line.symbol,
                            line.amount,
                            price,
                            line.amount * price
                        ),
                        None => println!("  {:<10} {:>18.6} (unpriced)", line.symbol, line.amount),
                    }
                }
            }
            Err(e) => tracing::warn!("{}: balance fetch failed: {}", chain, e),
        }
    }
    Ok(())
}
