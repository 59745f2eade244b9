use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The eight chain accounts the agent trades on.
///
/// Names match the API's `specificChain` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Eth,
    Polygon,
    Bsc,
    Arbitrum,
    Optimism,
    Avalanche,
    Base,
    Svm,
}

#[derive(Debug, Error, PartialEq)]
#[error("Unknown chain: {0}")]
pub struct UnknownChain(pub String);

impl Chain {
    pub const ALL: [Chain; 8] = [
        Chain::Eth,
        Chain::Polygon,
        Chain::Bsc,
        Chain::Arbitrum,
        Chain::Optimism,
        Chain::Avalanche,
        Chain::Base,
        Chain::Svm,
    ];

    /// Value of `specificChain` on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Eth => "eth",
            Chain::Polygon => "polygon",
            Chain::Bsc => "bsc",
            Chain::Arbitrum => "arbitrum",
            Chain::Optimism => "optimism",
            Chain::Avalanche => "avalanche",
            Chain::Base => "base",
            Chain::Svm => "svm",
        }
    }

    /// Chain family (`chain` on the wire)
    pub fn family(&self) -> &'static str {
        match self {
            Chain::Svm => "svm",
            _ => "evm",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = UnknownChain;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Chain::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == lower)
            .or(match lower.as_str() {
                "ethereum" | "mainnet" => Some(Chain::Eth),
                "solana" => Some(Chain::Svm),
                _ => None,
            })
            .ok_or(UnknownChain(s.to_string()))
    }
}
