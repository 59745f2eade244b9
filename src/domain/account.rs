//! Per-chain account state
//!
//! One `ChainAccount` exists per configured chain for the whole run. The
//! owning trading loop is its only writer; everyone else sees snapshots.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::chain::Chain;
use super::order::{Order, OrderSide};
use super::position::{Position, PositionError};
use super::token::asset_key;

/// Slack for float dust when checking cash
const CASH_EPSILON: f64 = 1e-6;

#[derive(Debug, Error, PartialEq)]
pub enum AccountError {
    #[error("Order for {0} is not filled")]
    NotFilled(String),
    #[error("Order chain {order} does not match account chain {account}")]
    ChainMismatch { order: Chain, account: Chain },
    #[error("Insufficient cash: have ${have:.2}, need ${need:.2}")]
    InsufficientCash { have: f64, need: f64 },
    #[error("No position in {0} to sell")]
    NoPosition(String),
    #[error(transparent)]
    Position(#[from] PositionError),
}

/// One balance line as reported by the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub symbol: String,
    pub address: String,
    pub amount: f64,
    /// USD price when the exchange includes one
    pub price: Option<f64>,
}

/// Read-only view of one chain, published to the risk desk
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainExposure {
    pub equity: f64,
    /// Asset key -> USD notional held
    pub by_asset: HashMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct ChainAccount {
    pub chain: Chain,
    pub cash_symbol: String,
    pub cash_address: String,
    cash: f64,
    positions: HashMap<String, Position>,
    marks: HashMap<String, f64>,
}

impl ChainAccount {
    pub fn new(chain: Chain, cash_symbol: impl Into<String>, cash_address: impl Into<String>) -> Self {
        Self {
            chain,
            cash_symbol: cash_symbol.into(),
            cash_address: cash_address.into(),
            cash: 0.0,
            positions: HashMap::new(),
            marks: HashMap::new(),
        }
    }

    pub fn with_cash(mut self, cash: f64) -> Self {
        self.cash = cash;
        self
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    /// Asset -> balance, cash included
    pub fn balances(&self) -> HashMap<String, f64> {
        let mut balances: HashMap<String, f64> = self
            .positions
            .iter()
            .map(|(key, p)| (key.clone(), p.quantity))
            .collect();
        balances.insert(asset_key(&self.cash_symbol), self.cash);
        balances
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(&asset_key(symbol))
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn held_quantity(&self, symbol: &str) -> f64 {
        self.position(symbol).map(|p| p.quantity).unwrap_or(0.0)
    }

    pub fn mark(&mut self, symbol: &str, price: f64) {
        if price > 0.0 && price.is_finite() {
            self.marks.insert(asset_key(symbol), price);
        }
    }

    pub fn mark_price(&self, symbol: &str) -> Option<f64> {
        self.marks.get(&asset_key(symbol)).copied()
    }

    /// Notional held in `symbol` at the latest mark
    pub fn exposure(&self, symbol: &str) -> f64 {
        let key = asset_key(symbol);
        self.positions
            .get(&key)
            .map(|p| p.notional(self.marks.get(&key).copied().unwrap_or(p.avg_entry_price)))
            .unwrap_or(0.0)
    }

    /// Sum of position notional
    pub fn invested(&self) -> f64 {
        self.positions.values().map(|p| self.exposure(&p.symbol)).sum()
    }

    pub fn equity(&self) -> f64 {
        self.cash + self.invested()
    }

    pub fn exposure_view(&self) -> ChainExposure {
        ChainExposure {
            equity: self.equity(),
            by_asset: self
                .positions
                .keys()
                .map(|key| (key.clone(), self.exposure(key)))
                .collect(),
        }
    }

    /// Reconcile against the exchange's balance report.
    ///
    /// Quantities follow the exchange; entry prices and trade timestamps are
    /// kept for positions we already track. Assets missing from the report
    /// are treated as fully closed.
    pub fn apply_balances(&mut self, balances: &[AssetBalance], now: DateTime<Utc>) {
        let cash_key = asset_key(&self.cash_symbol);
        let mut seen = Vec::with_capacity(balances.len());
        let mut cash = 0.0;

        for line in balances {
            let key = asset_key(&line.symbol);
            let is_cash = key == cash_key
                || (!self.cash_address.is_empty()
                    && line.address.eq_ignore_ascii_case(&self.cash_address));
            if is_cash {
                cash += line.amount;
                continue;
            }
            if let Some(price) = line.price {
                self.mark(&line.symbol, price);
            }
            if line.amount <= 0.0 {
                continue;
            }
            seen.push(key.clone());

            match self.positions.get_mut(&key) {
                Some(position) => position.quantity = line.amount,
                None => {
                    let entry = self.marks.get(&key).copied().unwrap_or(0.0);
                    match Position::open(&line.symbol, &line.address, self.chain, line.amount, entry, now) {
                        Ok(position) => {
                            self.positions.insert(key, position);
                        }
                        Err(e) => tracing::debug!(
                            "Skipping unpriced balance {} on {}: {}",
                            line.symbol,
                            self.chain,
                            e
                        ),
                    }
                }
            }
        }

        self.positions.retain(|key, _| seen.contains(key));
        self.cash = cash;
    }

    /// Apply a filled order. Cash and position move together or not at all.
    pub fn apply_fill(&mut self, order: &Order, at: DateTime<Utc>) -> Result<(), AccountError> {
        if order.chain != self.chain {
            return Err(AccountError::ChainMismatch {
                order: order.chain,
                account: self.chain,
            });
        }
        let (price, quantity) = match (order.fill_price, order.filled_quantity, order.is_filled()) {
            (Some(price), Some(quantity), true) => (price, quantity),
            _ => return Err(AccountError::NotFilled(order.token.symbol.clone())),
        };
        let key = order.token.asset_key();

        let (cash_after, position_after) = match order.side {
            OrderSide::Buy => {
                let cash_after = self.cash - order.notional;
                if cash_after < -CASH_EPSILON {
                    return Err(AccountError::InsufficientCash {
                        have: self.cash,
                        need: order.notional,
                    });
                }
                let position = match self.positions.get(&key) {
                    Some(existing) => {
                        let mut staged = existing.clone();
                        staged.increase(quantity, price, at)?;
                        staged
                    }
                    None => Position::open(
                        &order.token.symbol,
                        &order.token.address,
                        self.chain,
                        quantity,
                        price,
                        at,
                    )?,
                };
                (cash_after.max(0.0), Some(position))
            }
            OrderSide::Sell => {
                let mut staged = self
                    .positions
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| AccountError::NoPosition(order.token.symbol.clone()))?;
                staged.reduce(quantity, at)?;
                let remaining = if staged.is_closed() { None } else { Some(staged) };
                (self.cash + order.notional, remaining)
            }
        };

        self.cash = cash_after;
        match position_after {
            Some(position) => {
                self.positions.insert(key.clone(), position);
            }
            None => {
                self.positions.remove(&key);
            }
        }
        self.mark(&order.token.symbol, price);
        Ok(())
    }
}
