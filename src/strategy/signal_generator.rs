//! Signal Generator
//!
//! Momentum/volatility z-score over a bounded price series per token.
//!
//! With `p[0..L)` the last `L = lookback_long` prices and `S = lookback_short`:
//! - momentum `m_i = p[i] / p[i-S] - 1` for `i` in `S..L`; current is `m_{L-1}`
//! - volatility is the population std of `r_i = p[i] / p[i-1] - 1`, floored
//! - `z = (m_{L-1} - mean(m)) / volatility`, clamped to ±10

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use statrs::statistics::Statistics;

use crate::domain::{Signal, SignalReading, Token};
use crate::strategy::params::SignalParams;

/// Volatility floor; keeps z finite on flat series
pub const MIN_VOLATILITY: f64 = 1e-8;
pub const Z_CLAMP: f64 = 10.0;

/// Bounded (timestamp, price) history, oldest evicted on insert
#[derive(Debug, Clone)]
pub struct PriceSeries {
    points: VecDeque<(DateTime<Utc>, f64)>,
    capacity: usize,
}

impl PriceSeries {
    pub fn new(capacity: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Returns false for non-positive or non-finite prices, which are dropped
    pub fn push(&mut self, at: DateTime<Utc>, price: f64) -> bool {
        if !(price > 0.0) || !price.is_finite() {
            return false;
        }
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back((at, price));
        true
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.points.len() == self.capacity
    }

    pub fn last(&self) -> Option<(DateTime<Utc>, f64)> {
        self.points.back().copied()
    }

    pub fn prices(&self) -> Vec<f64> {
        self.points.iter().map(|(_, p)| *p).collect()
    }
}

/// Raw statistics of a full window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MomentumStats {
    pub momentum: f64,
    pub mean_momentum: f64,
    pub volatility: f64,
    pub z_score: f64,
}

/// Compute momentum statistics over `prices` (oldest first)
pub fn momentum_stats(prices: &[f64], short: usize) -> Option<MomentumStats> {
    let len = prices.len();
    if short == 0 || len <= short {
        return None;
    }

    let momenta: Vec<f64> = (short..len).map(|i| prices[i] / prices[i - short] - 1.0).collect();
    let returns: Vec<f64> = (1..len).map(|i| prices[i] / prices[i - 1] - 1.0).collect();

    let momentum = *momenta.last()?;
    let mean_momentum = momenta.iter().mean();
    let raw_vol = returns.iter().population_std_dev();
    let volatility = if raw_vol.is_finite() {
        raw_vol.max(MIN_VOLATILITY)
    } else {
        MIN_VOLATILITY
    };
    let z_score = ((momentum - mean_momentum) / volatility).clamp(-Z_CLAMP, Z_CLAMP);

    Some(MomentumStats {
        momentum,
        mean_momentum,
        volatility,
        z_score,
    })
}

/// Per-token price series and signal computation for one chain
#[derive(Debug, Clone)]
pub struct SignalGenerator {
    params: SignalParams,
    series: HashMap<String, PriceSeries>,
}

impl SignalGenerator {
    pub fn new(params: SignalParams) -> Self {
        Self {
            params,
            series: HashMap::new(),
        }
    }

    pub fn params(&self) -> &SignalParams {
        &self.params
    }

    fn key(token: &Token) -> String {
        token.address.to_ascii_lowercase()
    }

    /// Append one observation. Invalid prices are ignored.
    pub fn record(&mut self, token: &Token, at: DateTime<Utc>, price: f64) -> bool {
        let capacity = self.params.lookback_long;
        let accepted = self
            .series
            .entry(Self::key(token))
            .or_insert_with(|| PriceSeries::new(capacity))
            .push(at, price);
        if !accepted {
            tracing::debug!("Dropped invalid price {} for {}", price, token.symbol);
        }
        accepted
    }

    /// Current reading for a token
    pub fn reading(&self, token: &Token, now: DateTime<Utc>) -> SignalReading {
        let required = self.params.lookback_long;
        let series = match self.series.get(&Self::key(token)) {
            Some(series) if series.is_full() => series,
            other => {
                return SignalReading::InsufficientData {
                    required,
                    available: other.map_or(0, |s| s.len()),
                }
            }
        };

        let prices = series.prices();
        match (momentum_stats(&prices, self.params.lookback_short), series.last()) {
            (Some(stats), Some((_, price))) => SignalReading::Ready(Signal {
                token: token.clone(),
                momentum: stats.momentum,
                volatility: stats.volatility,
                z_score: stats.z_score,
                price,
                generated_at: now,
            }),
            _ => SignalReading::InsufficientData {
                required,
                available: series.len(),
            },
        }
    }

    /// Record then read
    pub fn update(&mut self, token: &Token, at: DateTime<Utc>, price: f64) -> SignalReading {
        self.record(token, at, price);
        self.reading(token, at)
    }

    pub fn last_price(&self, token: &Token) -> Option<f64> {
        self.series.get(&Self::key(token)).and_then(|s| s.last()).map(|(_, p)| p)
    }

    pub fn series_len(&self, token: &Token) -> usize {
        self.series.get(&Self::key(token)).map_or(0, |s| s.len())
    }

    /// Drop series for tokens no longer tracked
    pub fn retain_tokens<'a>(&mut self, keep: impl IntoIterator<Item = &'a Token>) {
        let keep: HashSet<String> = keep.into_iter().map(Self::key).collect();
        self.series.retain(|key, _| keep.contains(key));
    }

    pub fn tracked(&self) -> usize {
        self.series.len()
    }
}
