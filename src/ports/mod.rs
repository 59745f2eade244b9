//! Ports Layer - Trait definitions for external dependencies
//!
//! Following hexagonal architecture, these traits abstract:
//! - Raw exchange calls (discovery, prices, balances, trades)
//! - The per-cycle telemetry sink

pub mod exchange;
pub mod telemetry;
pub mod mocks;

pub use exchange::{
    ExchangeTransport, PriceQuote, RequestCategory, TradeReceipt, TradeRequest, TransportError,
};
pub use telemetry::{TelemetryError, TelemetrySink};
