use chrono::{DateTime, Utc};
use std::fmt;

use super::token::Token;

/// Momentum/volatility reading for one token at one bar
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub token: Token,
    /// Short-window return
    pub momentum: f64,
    /// Std of returns over the long window (floored above zero)
    pub volatility: f64,
    pub z_score: f64,
    /// Last price in the series; the slippage guard compares against it
    pub price: f64,
    pub generated_at: DateTime<Utc>,
}

impl Signal {
    /// z >= z_entry and momentum >= min_momentum
    pub fn is_entry(&self, z_entry: f64, min_momentum: f64) -> bool {
        self.z_score >= z_entry && self.momentum >= min_momentum
    }

    /// z <= z_exit or momentum < min_momentum
    pub fn is_exit(&self, z_exit: f64, min_momentum: f64) -> bool {
        self.z_score <= z_exit || self.momentum < min_momentum
    }

    /// Calculates confidence based on z-score using standard normal CDF
    pub fn confidence(&self) -> f64 {
        use statrs::function::erf::erf;
        0.5 * (1.0 + erf(self.z_score / f64::sqrt(2.0)))
    }
}

/// Outcome of asking for a signal. Not enough history is a normal state,
/// not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalReading {
    Ready(Signal),
    InsufficientData { required: usize, available: usize },
}

impl SignalReading {
    pub fn signal(&self) -> Option<&Signal> {
        match self {
            SignalReading::Ready(signal) => Some(signal),
            SignalReading::InsufficientData { .. } => None,
        }
    }

    pub fn into_signal(self) -> Option<Signal> {
        match self {
            SignalReading::Ready(signal) => Some(signal),
            SignalReading::InsufficientData { .. } => None,
        }
    }
}

impl fmt::Display for SignalReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalReading::Ready(s) => write!(
                f,
                "{} z={:.2} mom={:.4} vol={:.5}",
                s.token.symbol, s.z_score, s.momentum, s.volatility
            ),
            SignalReading::InsufficientData { required, available } => {
                write!(f, "warming up {}/{}", available, required)
            }
        }
    }
}
