//! Strategy Parameters
//!
//! Parameter structs for the token filter, the momentum/volatility signal
//! and the risk-parity allocator.

use serde::{Deserialize, Serialize};

/// Momentum/volatility signal parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalParams {
    /// Bars in the momentum window
    pub lookback_short: usize,
    /// Bars kept per token; volatility and mean momentum use all of them
    pub lookback_long: usize,
    /// Enter at z >= z_entry
    pub z_entry: f64,
    /// Exit at z <= z_exit
    pub z_exit: f64,
    pub min_momentum: f64,
}

impl Default for SignalParams {
    fn default() -> Self {
        Self {
            lookback_short: 20,
            lookback_long: 120,
            z_entry: 1.0,
            z_exit: 0.2,
            min_momentum: 0.0,
        }
    }
}

impl SignalParams {
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.lookback_short == 0 || self.lookback_short >= self.lookback_long {
            return Err(ParamsError::InvalidLookback {
                short: self.lookback_short,
                long: self.lookback_long,
            });
        }
        if !self.z_entry.is_finite() || !self.z_exit.is_finite() || self.z_exit >= self.z_entry {
            return Err(ParamsError::InvalidZBand {
                entry: self.z_entry,
                exit: self.z_exit,
            });
        }
        if !self.min_momentum.is_finite() {
            return Err(ParamsError::InvalidMomentum(self.min_momentum));
        }
        Ok(())
    }
}

/// Token eligibility thresholds. Each is met when value >= threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterThresholds {
    pub min_age_hours: f64,
    pub min_volume_24h: f64,
    pub min_liquidity: f64,
    pub min_fdv: f64,
}

impl Default for FilterThresholds {
    fn default() -> Self {
        Self {
            min_age_hours: 720.0,
            min_volume_24h: 500_000.0,
            min_liquidity: 500_000.0,
            min_fdv: 1_000_000.0,
        }
    }
}

impl FilterThresholds {
    pub fn validate(&self) -> Result<(), ParamsError> {
        for (name, value) in [
            ("min_age_hours", self.min_age_hours),
            ("min_volume_24h", self.min_volume_24h),
            ("min_liquidity", self.min_liquidity),
            ("min_fdv", self.min_fdv),
        ] {
            if !(value >= 0.0) || !value.is_finite() {
                return Err(ParamsError::InvalidThreshold { name, value });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParamsError {
    #[error("Invalid lookbacks: short={short} long={long} (need 0 < short < long)")]
    InvalidLookback { short: usize, long: usize },
    #[error("Invalid z band: entry={entry} exit={exit} (need exit < entry)")]
    InvalidZBand { entry: f64, exit: f64 },
    #[error("Invalid min momentum: {0}")]
    InvalidMomentum(f64),
    #[error("Invalid filter threshold {name}: {value} (must be >= 0)")]
    InvalidThreshold { name: &'static str, value: f64 },
}
