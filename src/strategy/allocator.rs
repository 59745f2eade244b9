//! Risk-Parity Allocator
//!
//! Entry candidates get raw weight `1 / volatility`, normalised so the
//! weights sum to `max_aggregate_exposure`. Held tokens whose signal says
//! exit get a zero-weight liquidation target. Held tokens with neither an
//! entry nor an exit signal get no target and are left alone.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::domain::{Chain, Signal, Token};
use crate::strategy::params::SignalParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetIntent {
    Enter,
    Liquidate,
}

/// Fraction of the owning chain's equity to hold in one token
#[derive(Debug, Clone, PartialEq)]
pub struct TargetWeight {
    pub token: Token,
    pub chain: Chain,
    /// 0..=1
    pub weight: f64,
    pub intent: TargetIntent,
    /// Signal the target was derived from
    pub signal: Signal,
}

#[derive(Debug, Clone)]
pub struct Allocator {
    z_entry: f64,
    z_exit: f64,
    min_momentum: f64,
    max_aggregate_exposure: f64,
}

impl Allocator {
    pub fn new(params: &SignalParams, max_aggregate_exposure: f64) -> Self {
        Self {
            z_entry: params.z_entry,
            z_exit: params.z_exit,
            min_momentum: params.min_momentum,
            max_aggregate_exposure: max_aggregate_exposure.clamp(0.0, 1.0),
        }
    }

    /// Targets for this cycle. `held` holds asset keys of open positions.
    pub fn allocate(&self, signals: &[Signal], held: &HashSet<String>) -> Vec<TargetWeight> {
        let mut entries: Vec<&Signal> = signals
            .iter()
            .filter(|s| s.is_entry(self.z_entry, self.min_momentum))
            .collect();
        entries.sort_by(|a, b| by_risk_then_z(a, b));

        let inverse_sum: f64 = entries.iter().map(|s| 1.0 / s.volatility).sum();
        let mut targets: Vec<TargetWeight> = entries
            .into_iter()
            .map(|s| TargetWeight {
                token: s.token.clone(),
                chain: s.token.chain,
                weight: if inverse_sum > 0.0 {
                    (1.0 / s.volatility) / inverse_sum * self.max_aggregate_exposure
                } else {
                    0.0
                },
                intent: TargetIntent::Enter,
                signal: s.clone(),
            })
            .collect();

        let mut exits: Vec<&Signal> = signals
            .iter()
            .filter(|s| held.contains(&s.token.asset_key()))
            .filter(|s| !s.is_entry(self.z_entry, self.min_momentum))
            .filter(|s| s.is_exit(self.z_exit, self.min_momentum))
            .collect();
        exits.sort_by(|a, b| a.token.symbol.cmp(&b.token.symbol));

        targets.extend(exits.into_iter().map(|s| TargetWeight {
            token: s.token.clone(),
            chain: s.token.chain,
            weight: 0.0,
            intent: TargetIntent::Liquidate,
            signal: s.clone(),
        }));
        targets
    }
}

/// Lowest volatility (largest weight) first, then z descending, then symbol
fn by_risk_then_z(a: &Signal, b: &Signal) -> Ordering {
    a.volatility
        .partial_cmp(&b.volatility)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.z_score.partial_cmp(&a.z_score).unwrap_or(Ordering::Equal))
        .then_with(|| a.token.symbol.cmp(&b.token.symbol))
}
