//! Coordinator
//!
//! Spawns one trading loop per chain and owns the stop signal. Chain reports
//! are collected per bar index; once every live chain has reported a bar,
//! the aggregate equity is fed to the risk desk (drawdown halt), appended to
//! the equity history, and written to telemetry.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::Instrument;

use super::risk_desk::RiskDesk;
use super::trading_loop::{ChainReport, TradingLoop};
use crate::domain::{Chain, ChainAccount, EquityHistory, EquitySnapshot, RiskState};
use crate::ports::TelemetrySink;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("No chains configured")]
    NoChains,
    #[error("{0} chain task(s) panicked")]
    TaskPanicked(usize),
}

/// Cloneable handle that asks every loop to stop
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        if !*self.tx.borrow() {
            tracing::info!("Stop requested");
        }
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

#[derive(Debug)]
pub struct RunSummary {
    pub snapshots: Vec<EquitySnapshot>,
    pub final_state: RiskState,
    pub total_trades: u64,
    pub accounts: Vec<ChainAccount>,
}

pub struct Coordinator {
    loops: Vec<TradingLoop>,
    desk: RiskDesk,
    telemetry: Arc<dyn TelemetrySink>,
    history: EquityHistory,
    stop_tx: Arc<watch::Sender<bool>>,
    max_cycles: Option<u64>,
}

impl Coordinator {
    pub fn new(loops: Vec<TradingLoop>, desk: RiskDesk, telemetry: Arc<dyn TelemetrySink>, bar_seconds: u64) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            loops,
            desk,
            telemetry,
            history: EquityHistory::new(bar_seconds),
            stop_tx: Arc::new(stop_tx),
            max_cycles: None,
        }
    }

    /// Stop on its own after `cycles` aggregated bars
    pub fn with_max_cycles(mut self, cycles: u64) -> Self {
        self.max_cycles = Some(cycles);
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: Arc::clone(&self.stop_tx),
        }
    }

    pub async fn run(mut self) -> Result<RunSummary, CoordinatorError> {
        if self.loops.is_empty() {
            return Err(CoordinatorError::NoChains);
        }
        let stop = self.stop_handle();
        let (report_tx, mut report_rx) = mpsc::channel::<ChainReport>(self.loops.len() * 2);
        let mut tasks = JoinSet::new();

        for lp in self.loops.drain(..) {
            let span = tracing::info_span!("chain", chain = %lp.chain());
            tasks.spawn(lp.run(self.stop_tx.subscribe(), report_tx.clone()).instrument(span));
        }
        drop(report_tx);

        let mut live = tasks.len();
        let mut pending: BTreeMap<u64, HashMap<Chain, ChainReport>> = BTreeMap::new();
        let mut aggregated = 0u64;
        let mut accounts = Vec::new();
        let mut panicked = 0usize;

        tracing::info!("Coordinator running {} chain loops", live);

        loop {
            tokio::select! {
                report = report_rx.recv() => match report {
                    Some(report) => {
                        pending.entry(report.cycle).or_default().insert(report.chain, report);
                    }
                    None => break,
                },
                joined = tasks.join_next(), if !tasks.is_empty() => match joined {
                    Some(Ok(account)) => {
                        live = live.saturating_sub(1);
                        accounts.push(account);
                    }
                    Some(Err(e)) => {
                        live = live.saturating_sub(1);
                        panicked += 1;
                        tracing::error!("Chain task failed: {}", e);
                    }
                    None => {}
                },
            }

            if stop.is_stopped() {
                continue;
            }
            while let Some(reports) = take_complete(&mut pending, live) {
                self.aggregate(&reports);
                aggregated += 1;
                if self.max_cycles.is_some_and(|max| aggregated >= max) {
                    stop.stop();
                    break;
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(account) => accounts.push(account),
                Err(e) => {
                    panicked += 1;
                    tracing::error!("Chain task failed: {}", e);
                }
            }
        }
        accounts.sort_by_key(|a| a.chain);

        if panicked > 0 {
            return Err(CoordinatorError::TaskPanicked(panicked));
        }
        Ok(RunSummary {
            snapshots: self.history.snapshots().to_vec(),
            final_state: self.desk.state(),
            total_trades: self.desk.total_trades(),
            accounts,
        })
    }

    /// One aggregated bar: halt check, history, telemetry
    fn aggregate(&mut self, reports: &HashMap<Chain, ChainReport>) -> EquitySnapshot {
        let total: f64 = reports.values().map(|r| r.equity).sum();
        let fills: u32 = reports.values().map(|r| r.fills).sum();
        let at = reports
            .values()
            .map(|r| r.at)
            .max()
            .unwrap_or_else(chrono::Utc::now);

        let before = self.desk.state();
        let after = self.desk.observe_equity(total, at);
        if !before.is_halted() && after.is_halted() {
            tracing::error!("Trading halted on drawdown; sells continue, buys blocked until restart");
        }

        let snapshot = self.history.record(at, total, self.desk.total_trades());
        tracing::info!(
            "CYCLE {} chains | equity ${:.2} | fills {} | sharpe {:.3} | max dd {:.2}% | trades {}{}",
            reports.len(),
            snapshot.total_equity,
            fills,
            snapshot.sharpe,
            snapshot.max_drawdown * 100.0,
            snapshot.trade_count,
            if after.is_halted() { " | HALTED" } else { "" }
        );
        if let Err(e) = self.telemetry.record(&snapshot) {
            tracing::warn!("Telemetry write failed: {}", e);
        }
        snapshot
    }
}

/// Pop the oldest bar once `live` chains have reported it
fn take_complete(pending: &mut BTreeMap<u64, HashMap<Chain, ChainReport>>, live: usize) -> Option<HashMap<Chain, ChainReport>> {
    let (&cycle, reports) = pending.iter().next()?;
    if live == 0 || reports.len() < live {
        return None;
    }
    pending.remove(&cycle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn report(chain: Chain, cycle: u64, equity: f64) -> ChainReport {
        ChainReport {
            chain,
            cycle,
            equity,
            fills: 0,
            at: Utc::now(),
        }
    }

    #[test]
    fn test_bar_completes_only_when_all_chains_reported() {
        let mut pending: BTreeMap<u64, HashMap<Chain, ChainReport>> = BTreeMap::new();
        pending.entry(0).or_default().insert(Chain::Eth, report(Chain::Eth, 0, 1.0));
        pending.entry(1).or_default().insert(Chain::Eth, report(Chain::Eth, 1, 1.0));
        assert!(take_complete(&mut pending, 2).is_none());

        pending.entry(0).or_default().insert(Chain::Svm, report(Chain::Svm, 0, 2.0));
        let bar = take_complete(&mut pending, 2).unwrap();
        assert_eq!(bar.len(), 2);
        assert!(take_complete(&mut pending, 2).is_none());

        // a chain dropping out lowers the bar for the rest
        assert_eq!(take_complete(&mut pending, 1).unwrap().len(), 1);
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_no_chains_is_an_error() {
        let desk = RiskDesk::new(Default::default(), Utc::now());
        let telemetry = Arc::new(crate::ports::mocks::MemoryTelemetry::new());
        let result = Coordinator::new(Vec::new(), desk, telemetry, 30).run().await;
        assert!(matches!(result, Err(CoordinatorError::NoChains)));
    }

    #[test]
    fn test_stop_handle_is_shared() {
        let desk = RiskDesk::new(Default::default(), Utc::now());
        let telemetry = Arc::new(crate::ports::mocks::MemoryTelemetry::new());
        let coordinator = Coordinator::new(Vec::new(), desk, telemetry, 30);
        let a = coordinator.stop_handle();
        let b = a.clone();
        assert!(!b.is_stopped());
        a.stop();
        assert!(b.is_stopped());
    }
}
