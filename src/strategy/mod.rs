//! Strategy Layer - Token screening, momentum/volatility signals, risk parity
//!
//! - `token_filter`: Eligibility screen on age, volume, liquidity and FDV
//! - `signal_generator`: Bounded price series and z-scored momentum
//! - `allocator`: Inverse-volatility target weights and liquidation targets

pub mod params;
pub mod token_filter;
pub mod signal_generator;
pub mod allocator;

pub use params::{FilterThresholds, ParamsError, SignalParams};
pub use token_filter::{Criterion, Screening, TokenFilter};
pub use signal_generator::{momentum_stats, MomentumStats, PriceSeries, SignalGenerator};
pub use allocator::{Allocator, TargetIntent, TargetWeight};
