use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::chain::Chain;

/// A long holding on one chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub address: String,
    pub chain: Chain,
    pub quantity: f64,
    pub avg_entry_price: f64,
    pub opened_at: DateTime<Utc>,
    /// Drives the per-asset cooldown
    pub last_trade_at: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq)]
pub enum PositionError {
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(f64),
    #[error("Invalid entry price: {0}")]
    InvalidEntryPrice(f64),
    #[error("Cannot reduce by {requested}, only {held} held")]
    Oversold { requested: f64, held: f64 },
}

impl Position {
    pub fn open(
        symbol: impl Into<String>,
        address: impl Into<String>,
        chain: Chain,
        quantity: f64,
        price: f64,
        at: DateTime<Utc>,
    ) -> Result<Self, PositionError> {
        if !(quantity > 0.0) || !quantity.is_finite() {
            return Err(PositionError::InvalidQuantity(quantity));
        }
        if !(price > 0.0) || !price.is_finite() {
            return Err(PositionError::InvalidEntryPrice(price));
        }

        Ok(Self {
            symbol: symbol.into(),
            address: address.into(),
            chain,
            quantity,
            avg_entry_price: price,
            opened_at: at,
            last_trade_at: at,
        })
    }

    /// Add to the position, re-weighting the average entry price
    pub fn increase(&mut self, quantity: f64, price: f64, at: DateTime<Utc>) -> Result<(), PositionError> {
        if !(quantity > 0.0) {
            return Err(PositionError::InvalidQuantity(quantity));
        }
        if !(price > 0.0) {
            return Err(PositionError::InvalidEntryPrice(price));
        }
        let total = self.quantity + quantity;
        self.avg_entry_price = (self.avg_entry_price * self.quantity + price * quantity) / total;
        self.quantity = total;
        self.last_trade_at = at;
        Ok(())
    }

    /// Reduce the position. Returns the remaining quantity.
    pub fn reduce(&mut self, quantity: f64, at: DateTime<Utc>) -> Result<f64, PositionError> {
        if !(quantity > 0.0) {
            return Err(PositionError::InvalidQuantity(quantity));
        }
        // tolerate float dust on full exits
        if quantity > self.quantity * (1.0 + 1e-9) {
            return Err(PositionError::Oversold {
                requested: quantity,
                held: self.quantity,
            });
        }
        self.quantity = (self.quantity - quantity).max(0.0);
        if self.quantity < 1e-12 {
            self.quantity = 0.0;
        }
        self.last_trade_at = at;
        Ok(self.quantity)
    }

    pub fn is_closed(&self) -> bool {
        self.quantity <= 0.0
    }

    pub fn notional(&self, mark: f64) -> f64 {
        self.quantity * mark
    }

    pub fn unrealized_pnl(&self, mark: f64) -> f64 {
        (mark - self.avg_entry_price) * self.quantity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weth(quantity: f64, price: f64) -> Position {
        Position::open("WETH", "0xc02a", Chain::Eth, quantity, price, Utc::now()).unwrap()
    }

    #[test]
    fn test_open_position() {
        let position = weth(1.0, 2000.0);
        assert_eq!(position.quantity, 1.0);
        assert_eq!(position.avg_entry_price, 2000.0);
        assert_eq!(position.opened_at, position.last_trade_at);
    }

    #[test]
    fn test_open_invalid() {
        let now = Utc::now();
        assert_eq!(
            Position::open("WETH", "0x", Chain::Eth, 0.0, 2000.0, now),
            Err(PositionError::InvalidQuantity(0.0))
        );
        assert_eq!(
            Position::open("WETH", "0x", Chain::Eth, 1.0, -1.0, now),
            Err(PositionError::InvalidEntryPrice(-1.0))
        );
    }

    #[test]
    fn test_increase_averages_entry() {
        let mut position = weth(1.0, 2000.0);
        position.increase(1.0, 3000.0, Utc::now()).unwrap();
        assert_eq!(position.quantity, 2.0);
        assert_eq!(position.avg_entry_price, 2500.0);
    }

    #[test]
    fn test_reduce_to_zero() {
        let mut position = weth(2.0, 2000.0);
        assert_eq!(position.reduce(0.5, Utc::now()).unwrap(), 1.5);
        assert_eq!(position.reduce(1.5, Utc::now()).unwrap(), 0.0);
        assert!(position.is_closed());
    }

    #[test]
    fn test_reduce_more_than_held() {
        let mut position = weth(1.0, 2000.0);
        let result = position.reduce(2.0, Utc::now());
        assert!(matches!(result, Err(PositionError::Oversold { .. })));
        assert_eq!(position.quantity, 1.0);
    }

    #[test]
    fn test_pnl() {
        let position = weth(2.0, 2000.0);
        assert_eq!(position.unrealized_pnl(2100.0), 200.0);
        assert_eq!(position.notional(2100.0), 4200.0);
    }
}
