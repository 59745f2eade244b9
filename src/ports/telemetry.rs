use thiserror::Error;

use crate::domain::EquitySnapshot;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Telemetry I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Receives one aggregate row per cycle
pub trait TelemetrySink: Send + Sync {
    fn record(&self, snapshot: &EquitySnapshot) -> Result<(), TelemetryError>;
}
