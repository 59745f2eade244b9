//! Recall Adapter
//!
//! HTTP implementation of the exchange transport for the Recall
//! trading-competition API.

mod client;
mod types;

pub use client::{RecallConfig, RecallTransport};
pub use types::{BalancesResponse, DiscoveryResponse, ExecuteTradeBody, ExecuteTradeResponse, PriceResponse};
