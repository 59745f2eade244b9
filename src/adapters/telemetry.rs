//! Telemetry sinks
//!
//! `CsvTelemetry` appends one row per cycle to a file; `LogTelemetry`
//! emits the same row through `tracing`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::domain::EquitySnapshot;
use crate::ports::{TelemetryError, TelemetrySink};

pub const CSV_HEADER: &str = "timestamp,equity_usd,sharpe,max_drawdown,trade_count";

fn csv_row(snapshot: &EquitySnapshot) -> String {
    format!(
        "{},{:.4},{:.4},{:.4},{}",
        snapshot.timestamp.to_rfc3339(),
        snapshot.total_equity,
        snapshot.sharpe,
        snapshot.max_drawdown,
        snapshot.trade_count
    )
}

#[derive(Debug)]
pub struct CsvTelemetry {
    path: PathBuf,
    /// Serializes appends from concurrent callers
    write_lock: Mutex<()>,
}

impl CsvTelemetry {
    /// `path` may start with `~` or contain `$VARS`
    pub fn new(path: &str) -> Self {
        let expanded = shellexpand::full(path)
            .map(|p| p.into_owned())
            .unwrap_or_else(|_| shellexpand::tilde(path).into_owned());
        Self::at(PathBuf::from(expanded))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TelemetrySink for CsvTelemetry {
    fn record(&self, snapshot: &EquitySnapshot) -> Result<(), TelemetryError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let is_new = fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true);

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        if is_new {
            writeln!(file, "{}", CSV_HEADER)?;
        }
        writeln!(file, "{}", csv_row(snapshot))?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct LogTelemetry;

impl TelemetrySink for LogTelemetry {
    fn record(&self, snapshot: &EquitySnapshot) -> Result<(), TelemetryError> {
        tracing::info!(
            "Equity ${:.2} | sharpe {:.4} | max drawdown {:.2}% | trades {}",
            snapshot.total_equity,
            snapshot.sharpe,
            snapshot.max_drawdown * 100.0,
            snapshot.trade_count
        );
        Ok(())
    }
}

/// Fans one row out to several sinks; the first error wins but every sink is tried
pub struct FanoutTelemetry {
    sinks: Vec<Box<dyn TelemetrySink>>,
}

impl FanoutTelemetry {
    pub fn new(sinks: Vec<Box<dyn TelemetrySink>>) -> Self {
        Self { sinks }
    }
}

impl TelemetrySink for FanoutTelemetry {
    fn record(&self, snapshot: &EquitySnapshot) -> Result<(), TelemetryError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.record(snapshot) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
