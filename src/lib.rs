//! Recall Agent - Multi-chain competition trading agent
//!
//! A long-only momentum agent that trades eight chain accounts at once
//! against the Recall competition API, sharing one request budget and one
//! risk desk across all of them.
//!
//! # Modules
//!
//! - `domain`: Core types and rules (Chain, Token, ChainAccount, RiskManager, EquityHistory)
//! - `ports`: Trait abstractions (ExchangeTransport, TelemetrySink) and in-memory doubles
//! - `strategy`: Token screening, momentum/volatility signals, risk-parity allocation
//! - `adapters`: Rate limiter, retrying client, Recall HTTP transport, telemetry, CLI
//! - `config`: Configuration loading and validation
//! - `application`: Executor, per-chain trading loop, coordinator

pub mod domain;
pub mod ports;
pub mod strategy;
pub mod adapters;
pub mod config;
pub mod application;
