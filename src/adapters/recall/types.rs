//! Recall API wire types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{AssetBalance, Chain, Token};
use crate::ports::TradeRequest;

/// `GET /api/price`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceResponse {
    #[serde(default)]
    pub price: Option<f64>,
    /// Older deployments nest the price here
    #[serde(default)]
    pub prices: Option<NestedPrices>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NestedPrices {
    #[serde(default)]
    pub to_token: Option<f64>,
}

impl PriceResponse {
    pub fn price(&self) -> Option<f64> {
        self.price
            .or_else(|| self.prices.as_ref().and_then(|p| p.to_token))
            .filter(|p| *p > 0.0 && p.is_finite())
    }

    /// Exchange timestamp, or `fallback` when absent or unparsable
    pub fn timestamp_or(&self, fallback: DateTime<Utc>) -> DateTime<Utc> {
        self.timestamp
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or(fallback)
    }
}

/// `GET /api/agent/balances`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancesResponse {
    #[serde(default)]
    pub balances: Vec<BalanceLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceLine {
    pub token_address: String,
    pub amount: f64,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub specific_chain: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
}

impl BalancesResponse {
    /// Lines belonging to `chain`
    pub fn for_chain(&self, chain: Chain) -> Vec<AssetBalance> {
        self.balances
            .iter()
            .filter(|line| {
                line.specific_chain
                    .as_deref()
                    .and_then(|c| c.parse::<Chain>().ok())
                    == Some(chain)
            })
            .map(|line| AssetBalance {
                symbol: line.symbol.clone().unwrap_or_else(|| line.token_address.clone()),
                address: line.token_address.clone(),
                amount: line.amount,
                price: line.price,
            })
            .collect()
    }
}

/// Token discovery listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    #[serde(default)]
    pub tokens: Vec<DiscoveredToken>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredToken {
    pub address: String,
    pub symbol: String,
    #[serde(default)]
    pub age_hours: f64,
    #[serde(default)]
    pub volume_24h: f64,
    #[serde(default)]
    pub liquidity: f64,
    #[serde(default)]
    pub fdv: f64,
}

impl DiscoveredToken {
    pub fn into_token(self, chain: Chain) -> Token {
        Token {
            age_hours: self.age_hours,
            volume_24h: self.volume_24h,
            liquidity: self.liquidity,
            fdv: self.fdv,
            ..Token::new(self.symbol, self.address, chain)
        }
    }
}

/// `POST /api/trade/execute` body. The base token is spent, the quote
/// token received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteTradeBody {
    pub base_token: String,
    pub quote_token: String,
    pub trade_amount_usd: f64,
    pub reason: String,
    /// Percent
    pub slippage_tolerance_pct: f64,
    pub from_chain: String,
    pub from_specific_chain: String,
    pub to_chain: String,
    pub to_specific_chain: String,
}

impl From<&TradeRequest> for ExecuteTradeBody {
    fn from(request: &TradeRequest) -> Self {
        Self {
            base_token: request.from_token.clone(),
            quote_token: request.to_token.clone(),
            trade_amount_usd: request.amount_usd,
            reason: request.reason.clone(),
            slippage_tolerance_pct: request.slippage_tolerance,
            from_chain: request.chain.family().to_string(),
            from_specific_chain: request.chain.as_str().to_string(),
            to_chain: request.chain.family().to_string(),
            to_specific_chain: request.chain.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteTradeResponse {
    pub success: bool,
    #[serde(default)]
    pub transaction: Option<TransactionInfo>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInfo {
    pub id: String,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub to_amount: Option<f64>,
    #[serde(default)]
    pub from_amount: Option<f64>,
}
