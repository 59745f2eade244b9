use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::domain::{AssetBalance, Chain, Order, OrderSide, Token};

/// Rate-limit category of an exchange call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestCategory {
    Trade,
    /// Prices and token discovery
    PriceQuery,
    /// Balances and the health check
    BalanceCheck,
}

impl RequestCategory {
    pub const ALL: [RequestCategory; 3] = [
        RequestCategory::Trade,
        RequestCategory::PriceQuery,
        RequestCategory::BalanceCheck,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestCategory::Trade => "trade",
            RequestCategory::PriceQuery => "price_query",
            RequestCategory::BalanceCheck => "balance_check",
        }
    }
}

impl fmt::Display for RequestCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw outcome of a failed transport call, before retry policy
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Request timed out")]
    Timeout,
    #[error("Rate limited by exchange")]
    RateLimited,
    #[error("Server error {status}: {body}")]
    Server { status: u16, body: String },
    #[error("Authentication failed ({status}): {body}")]
    Authentication { status: u16, body: String },
    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),
    #[error("Rejected ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("Malformed response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Map a non-2xx HTTP status and body to an outcome
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            429 => TransportError::RateLimited,
            401 | 403 => TransportError::Authentication { status, body },
            500..=599 => TransportError::Server { status, body },
            _ if body.to_ascii_lowercase().contains("insufficient") => {
                TransportError::InsufficientBalance(body)
            }
            _ => TransportError::Rejected { status, body },
        }
    }

    /// Worth retrying after a backoff
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Network(_)
                | TransportError::Timeout
                | TransportError::RateLimited
                | TransportError::Server { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// One trade as sent to the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRequest {
    pub chain: Chain,
    pub from_token: String,
    pub to_token: String,
    pub amount_usd: f64,
    pub reason: String,
    /// Percent
    pub slippage_tolerance: f64,
}

impl TradeRequest {
    /// Buys spend the chain's cash token, sells return to it
    pub fn for_order(order: &Order, cash_address: &str, reason: impl Into<String>, slippage_tolerance: f64) -> Self {
        let (from_token, to_token) = match order.side {
            OrderSide::Buy => (cash_address.to_string(), order.token.address.clone()),
            OrderSide::Sell => (order.token.address.clone(), cash_address.to_string()),
        };
        Self {
            chain: order.chain,
            from_token,
            to_token,
            amount_usd: order.notional,
            reason: reason.into(),
            slippage_tolerance,
        }
    }
}

/// Exchange acknowledgement of an executed trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeReceipt {
    pub id: String,
    /// Exchange-reported rate, informational
    pub price: Option<f64>,
    pub from_amount: Option<f64>,
    pub to_amount: Option<f64>,
}

/// Raw exchange calls. Implementations do no retries and no rate limiting.
#[async_trait]
pub trait ExchangeTransport: Send + Sync {
    async fn health(&self) -> Result<(), TransportError>;

    async fn discover_tokens(&self, chain: Chain) -> Result<Vec<Token>, TransportError>;

    async fn get_price(&self, token: &Token) -> Result<PriceQuote, TransportError>;

    /// Balance lines for one chain
    async fn get_balances(&self, chain: Chain) -> Result<Vec<AssetBalance>, TransportError>;

    async fn execute_trade(&self, request: &TradeRequest) -> Result<TradeReceipt, TransportError>;
}
