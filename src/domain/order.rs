use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::chain::Chain;
use super::token::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    /// Always reduces an existing long
    Sell,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Filled,
    Rejected(String),
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

/// An order against one chain account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub token: Token,
    pub chain: Chain,
    pub side: OrderSide,
    /// USD notional
    pub notional: f64,
    /// Price the order was sized at
    pub requested_price: f64,
    /// Execution price reported by the exchange, once filled
    pub fill_price: Option<f64>,
    /// Token quantity moved by the fill
    pub filled_quantity: Option<f64>,
    pub status: OrderStatus,
    pub exchange_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn new(token: Token, side: OrderSide, notional: f64, requested_price: f64) -> Self {
        Self {
            chain: token.chain,
            token,
            side,
            notional,
            requested_price,
            fill_price: None,
            filled_quantity: None,
            status: OrderStatus::Pending,
            exchange_id: None,
            created_at: Utc::now(),
        }
    }

    /// Mark the order filled at `price`, deriving quantity from notional when
    /// the exchange did not report one
    pub fn fill(mut self, price: f64, quantity: Option<f64>, exchange_id: Option<String>) -> Self {
        let quantity = quantity.unwrap_or_else(|| {
            if price > 0.0 {
                self.notional / price
            } else {
                0.0
            }
        });
        self.fill_price = Some(price);
        self.filled_quantity = Some(quantity);
        self.exchange_id = exchange_id;
        self.status = OrderStatus::Filled;
        self
    }

    pub fn reject(mut self, reason: impl Into<String>) -> Self {
        self.status = OrderStatus::Rejected(reason.into());
        self
    }

    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = match self.side {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        };
        write!(
            f,
            "{} {} ${:.2} on {} @ {:.6}",
            side, self.token.symbol, self.notional, self.chain, self.requested_price
        )
    }
}
