use serde::{Deserialize, Serialize};

use super::chain::Chain;

/// Snapshot of a discovered token, refreshed every discovery cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub symbol: String,
    /// Contract address (mint on svm)
    pub address: String,
    pub chain: Chain,
    pub age_hours: f64,
    pub volume_24h: f64,
    pub liquidity: f64,
    /// Fully diluted valuation in USD
    pub fdv: f64,
    /// Set by the token filter
    pub eligible: bool,
}

impl Token {
    pub fn new(symbol: impl Into<String>, address: impl Into<String>, chain: Chain) -> Self {
        Self {
            symbol: symbol.into(),
            address: address.into(),
            chain,
            age_hours: 0.0,
            volume_24h: 0.0,
            liquidity: 0.0,
            fdv: 0.0,
            eligible: false,
        }
    }

    /// Case-insensitive asset key used for cross-chain exposure
    pub fn asset_key(&self) -> String {
        asset_key(&self.symbol)
    }
}

pub fn asset_key(symbol: &str) -> String {
    symbol.trim().to_ascii_uppercase()
}
