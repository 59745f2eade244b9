//! Domain Layer - Core business logic for the Recall trading agent
//!
//! Pure types and rules with no I/O. All exchange interaction happens
//! through the ports layer.
//!
//! - `chain`: The eight supported chains
//! - `account`: Per-chain cash, positions and marks
//! - `risk`: Trade/asset caps, cooldowns, drawdown halt, forced trades
//! - `equity`: Aggregate equity history, Sharpe and max drawdown

pub mod chain;
pub mod token;
pub mod order;
pub mod position;
pub mod account;
pub mod signal;
pub mod equity;
pub mod risk;

pub use chain::{Chain, UnknownChain};
pub use token::{asset_key, Token};
pub use order::{Order, OrderSide, OrderStatus};
pub use position::{Position, PositionError};
pub use account::{AccountError, AssetBalance, ChainAccount, ChainExposure};
pub use signal::{Signal, SignalReading};
pub use equity::{max_drawdown, sharpe_ratio, EquityHistory, EquitySnapshot};
pub use risk::{
    remaining_in_day, Clamp, DailyTradeCounter, ExposureBook, OrderProposal, RiskDecision,
    RiskLimits, RiskManager, RiskRejection, RiskState,
};
