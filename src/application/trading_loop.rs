//! Per-chain trading loop
//!
//! One instance per chain, each in its own task. A bar runs:
//! refresh balances → discover/filter (on its own interval) → prices and
//! signals → allocate → review and execute → forced trade if due → report.
//!
//! The loop owns its `ChainAccount`; nothing else writes to it.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use super::executor::{ExecutionError, Executor, PlannedOrder};
use super::risk_desk::RiskDesk;
use crate::adapters::api_client::ApiClient;
use crate::domain::{asset_key, Chain, ChainAccount, Signal, SignalReading, Token};
use crate::strategy::{Allocator, SignalGenerator, TokenFilter};

#[derive(Debug, Clone, PartialEq)]
pub struct LoopSettings {
    pub bar: Duration,
    pub rebalance_every: Duration,
    pub discovery_every: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            bar: Duration::from_secs(30),
            rebalance_every: Duration::from_secs(120),
            discovery_every: Duration::from_secs(900),
        }
    }
}

/// One chain's contribution to a cycle
#[derive(Debug, Clone, PartialEq)]
pub struct ChainReport {
    pub chain: Chain,
    /// Zero-based bar index on this chain
    pub cycle: u64,
    pub equity: f64,
    pub fills: u32,
    pub at: DateTime<Utc>,
}

pub struct TradingLoop {
    account: ChainAccount,
    client: ApiClient,
    filter: TokenFilter,
    signals: SignalGenerator,
    allocator: Allocator,
    executor: Executor,
    desk: RiskDesk,
    settings: LoopSettings,
    /// Eligible tokens from the last successful discovery
    universe: Vec<Token>,
    last_discovery: Option<Instant>,
    last_rebalance: Option<Instant>,
    cycle: u64,
}

impl TradingLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        account: ChainAccount,
        client: ApiClient,
        filter: TokenFilter,
        signals: SignalGenerator,
        allocator: Allocator,
        executor: Executor,
        desk: RiskDesk,
        settings: LoopSettings,
    ) -> Self {
        Self {
            account,
            client,
            filter,
            signals,
            allocator,
            executor,
            desk,
            settings,
            universe: Vec::new(),
            last_discovery: None,
            last_rebalance: None,
            cycle: 0,
        }
    }

    pub fn chain(&self) -> Chain {
        self.account.chain
    }

    pub fn account(&self) -> &ChainAccount {
        &self.account
    }

    pub fn universe(&self) -> &[Token] {
        &self.universe
    }

    /// Run bars until `stop` flips or the coordinator goes away.
    /// Returns the final account state.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>, reports: mpsc::Sender<ChainReport>) -> ChainAccount {
        tracing::info!(
            "Starting {} loop - bar {:?}, rebalance every {:?}",
            self.chain(),
            self.settings.bar,
            self.settings.rebalance_every
        );

        loop {
            let stopped = *stop.borrow();
            if stopped {
                break;
            }
            let report = self.run_cycle(&stop).await;
            if reports.send(report).await.is_err() {
                tracing::warn!("Coordinator gone, stopping {} loop", self.chain());
                break;
            }

            tokio::select! {
                biased;
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.settings.bar) => {}
            }
        }

        tracing::info!(
            "{} loop stopped after {} bars, equity ${:.2}",
            self.chain(),
            self.cycle,
            self.account.equity()
        );
        self.account
    }

    /// One bar. Individual failures are logged and skipped; a bar always
    /// produces a report.
    pub async fn run_cycle(&mut self, stop: &watch::Receiver<bool>) -> ChainReport {
        let chain = self.chain();
        let mut fills = 0;

        self.refresh_balances().await;
        if self.discovery_due() {
            self.discover().await;
        }
        self.refresh_prices().await;
        self.desk.publish(chain, self.account.exposure_view());

        let now = Utc::now();
        let ready = self.ready_signals(now);
        let held: HashSet<String> = self.account.positions().map(|p| asset_key(&p.symbol)).collect();
        let targets = self.allocator.allocate(&ready, &held);

        let rebalance = self.rebalance_due();
        if rebalance {
            self.last_rebalance = Some(Instant::now());
        }
        let planned = self.executor.plan(&targets, &self.account, rebalance);
        tracing::debug!(
            "{}: {} signals, {} targets, {} orders{}",
            chain,
            ready.len(),
            targets.len(),
            planned.len(),
            if rebalance { " (rebalance)" } else { "" }
        );

        for order in &planned {
            let stopped = *stop.borrow();
            if stopped {
                break;
            }
            if self.submit(order).await {
                fills += 1;
            }
        }

        let stopped = *stop.borrow();
        if !stopped && self.try_forced_trade(&ready).await {
            fills += 1;
        }

        self.desk.publish(chain, self.account.exposure_view());
        let report = ChainReport {
            chain,
            cycle: self.cycle,
            equity: self.account.equity(),
            fills,
            at: Utc::now(),
        };
        self.cycle += 1;
        report
    }

    async fn refresh_balances(&mut self) {
        match self.client.get_balances(self.chain()).await {
            Ok(balances) => self.account.apply_balances(&balances, Utc::now()),
            Err(e) => tracing::warn!("{}: balance refresh skipped: {}", self.chain(), e),
        }
    }

    fn discovery_due(&self) -> bool {
        self.last_discovery
            .map_or(true, |at| at.elapsed() >= self.settings.discovery_every)
    }

    fn rebalance_due(&self) -> bool {
        self.last_rebalance
            .map_or(true, |at| at.elapsed() >= self.settings.rebalance_every)
    }

    async fn discover(&mut self) {
        match self.client.discover_tokens(self.chain()).await {
            Ok(tokens) => {
                let discovered = tokens.len();
                self.universe = self.filter.filter(tokens);
                self.signals.retain_tokens(self.universe.iter());
                self.last_discovery = Some(Instant::now());
                tracing::info!(
                    "{}: {} of {} discovered tokens eligible",
                    self.chain(),
                    self.universe.len(),
                    discovered
                );
            }
            Err(e) => tracing::warn!(
                "{}: discovery failed, keeping {} eligible tokens: {}",
                self.chain(),
                self.universe.len(),
                e
            ),
        }
    }

    async fn refresh_prices(&mut self) {
        for token in &self.universe {
            match self.client.get_price(token).await {
                Ok(quote) => {
                    self.signals.record(token, quote.timestamp, quote.price);
                    self.account.mark(&token.symbol, quote.price);
                }
                Err(e) => tracing::warn!("{}: no price for {}: {}", token.chain, token.symbol, e),
            }
        }
    }

    fn ready_signals(&self, now: DateTime<Utc>) -> Vec<Signal> {
        self.universe
            .iter()
            .filter_map(|token| match self.signals.reading(token, now) {
                SignalReading::Ready(signal) => {
                    tracing::debug!(
                        "{} {}: mom {:.5} vol {:.6} z {:.3}",
                        token.chain,
                        token.symbol,
                        signal.momentum,
                        signal.volatility,
                        signal.z_score
                    );
                    Some(signal)
                }
                SignalReading::InsufficientData { required, available } => {
                    tracing::debug!(
                        "{} {}: warming up {}/{}",
                        token.chain,
                        token.symbol,
                        available,
                        required
                    );
                    None
                }
            })
            .collect()
    }

    /// Returns whether the order filled
    async fn submit(&mut self, planned: &PlannedOrder) -> bool {
        match self.executor.execute(planned, &mut self.account).await {
            Ok(_) => true,
            Err(e) => {
                log_execution_error(self.account.chain, planned, &e);
                false
            }
        }
    }

    /// Claim and place one forced trade if the daily minimum is at risk
    async fn try_forced_trade(&mut self, ready: &[Signal]) -> bool {
        if !self.desk.claim_forced_trade(Utc::now()) {
            return false;
        }
        let planned = match self.forced_candidate(ready) {
            Some((token, price)) => self.executor.plan_forced(token, price),
            None => {
                tracing::debug!("{}: no forced-trade candidate", self.chain());
                self.desk.release_forced_trade();
                return false;
            }
        };

        tracing::info!(
            "{}: forcing {} to meet the daily trade minimum",
            self.chain(),
            planned.token.symbol
        );
        match self.executor.execute(&planned, &mut self.account).await {
            Ok(_) => true,
            Err(e) => {
                self.desk.release_forced_trade();
                log_execution_error(self.account.chain, &planned, &e);
                false
            }
        }
    }

    /// Lowest-volatility ready signal, else the first priced eligible token
    fn forced_candidate(&self, ready: &[Signal]) -> Option<(Token, f64)> {
        let best = ready.iter().min_by(|a, b| {
            a.volatility
                .partial_cmp(&b.volatility)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.token.symbol.cmp(&b.token.symbol))
        });
        if let Some(signal) = best {
            return Some((signal.token.clone(), signal.price));
        }

        let mut priced: Vec<(&Token, f64)> = self
            .universe
            .iter()
            .filter_map(|t| self.signals.last_price(t).map(|p| (t, p)))
            .collect();
        priced.sort_by(|a, b| a.0.symbol.cmp(&b.0.symbol));
        priced.first().map(|(t, p)| ((*t).clone(), *p))
    }
}

fn log_execution_error(chain: Chain, planned: &PlannedOrder, error: &ExecutionError) {
    if error.is_routine() {
        tracing::debug!("{} {} skipped: {}", chain, planned.token.symbol, error);
    } else {
        tracing::warn!(
            "{} {:?} {} ${:.2} not executed: {}",
            chain,
            planned.side,
            planned.token.symbol,
            planned.notional,
            error
        );
    }
}
