//! Application Layer
//!
//! Wires the strategy and risk components to the exchange client: per-chain
//! trading loops, the shared risk desk, and the coordinator above them.

pub mod coordinator;
pub mod executor;
pub mod risk_desk;
pub mod trading_loop;

pub use coordinator::{Coordinator, CoordinatorError, RunSummary, StopHandle};
pub use executor::{ExecutionError, Executor, ExecutorConfig, OrderReason, PlannedOrder};
pub use risk_desk::RiskDesk;
pub use trading_loop::{ChainReport, LoopSettings, TradingLoop};
