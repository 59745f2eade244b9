//! Equity history and performance statistics
//!
//! Sharpe uses log returns of the aggregate equity series annualised by the
//! number of bars in a year; max drawdown is the largest peak-to-trough
//! decline seen so far.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

const SECONDS_PER_YEAR: f64 = 365.0 * 24.0 * 3600.0;

/// One row of aggregate telemetry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquitySnapshot {
    pub timestamp: DateTime<Utc>,
    pub total_equity: f64,
    /// Annualised
    pub sharpe: f64,
    /// Fraction, 0..1
    pub max_drawdown: f64,
    pub trade_count: u64,
}

/// Annualised Sharpe ratio of an equity curve sampled every `bar_seconds`
pub fn sharpe_ratio(equity: &[f64], bar_seconds: u64) -> f64 {
    if equity.len() < 3 {
        return 0.0;
    }
    let returns: Vec<f64> = equity
        .windows(2)
        .map(|w| ((w[1] + 1e-9) / (w[0] + 1e-9)).ln())
        .collect();
    let mean = returns.iter().mean();
    let sd = returns.iter().population_std_dev();
    if !(sd > 0.0) || !sd.is_finite() {
        return 0.0;
    }
    let bars_per_year = SECONDS_PER_YEAR / bar_seconds.max(1) as f64;
    (mean / sd) * bars_per_year.sqrt()
}

/// Largest fractional decline from a running peak
pub fn max_drawdown(equity: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0_f64;
    for &value in equity {
        peak = peak.max(value);
        if peak > 0.0 {
            worst = worst.max((peak - value) / peak);
        }
    }
    worst
}

/// Append-only history of aggregate snapshots
#[derive(Debug, Clone, Default)]
pub struct EquityHistory {
    snapshots: Vec<EquitySnapshot>,
    equity: Vec<f64>,
    bar_seconds: u64,
}

impl EquityHistory {
    pub fn new(bar_seconds: u64) -> Self {
        Self {
            snapshots: Vec::new(),
            equity: Vec::new(),
            bar_seconds,
        }
    }

    /// Record a new aggregate equity observation and return its snapshot
    pub fn record(&mut self, timestamp: DateTime<Utc>, total_equity: f64, trade_count: u64) -> EquitySnapshot {
        self.equity.push(total_equity);
        let snapshot = EquitySnapshot {
            timestamp,
            total_equity,
            sharpe: sharpe_ratio(&self.equity, self.bar_seconds),
            max_drawdown: max_drawdown(&self.equity),
            trade_count,
        };
        self.snapshots.push(snapshot.clone());
        snapshot
    }

    pub fn snapshots(&self) -> &[EquitySnapshot] {
        &self.snapshots
    }

    pub fn latest(&self) -> Option<&EquitySnapshot> {
        self.snapshots.last()
    }

    pub fn peak(&self) -> Option<f64> {
        self.equity.iter().copied().reduce(f64::max)
    }

    /// Drawdown of the latest point from the running peak
    pub fn current_drawdown(&self) -> f64 {
        match (self.peak(), self.equity.last()) {
            (Some(peak), Some(&last)) if peak > 0.0 => ((peak - last) / peak).max(0.0),
            _ => 0.0,
        }
    }
}
