//! Adapters Layer - External System Implementations
//!
//! - `rate_limiter`: Process-wide token buckets per request category
//! - `retry`: Backoff policy and the retry driver
//! - `api_client`: Rate-limited, retrying front for the exchange transport
//! - `recall`: HTTP transport for the Recall competition API
//! - `telemetry`: CSV and log sinks for equity snapshots
//! - `cli`: Command-line interface

pub mod api_client;
pub mod cli;
pub mod rate_limiter;
pub mod recall;
pub mod retry;
pub mod telemetry;

pub use api_client::{ApiClient, ApiError};
pub use cli::CliApp;
pub use rate_limiter::{RateBudget, RateLimitError, RateLimiter};
pub use recall::{RecallConfig, RecallTransport};
pub use retry::{run_with_retry, Attempt, ExponentialBackoff, RetryError, RetryPolicy};
pub use telemetry::{CsvTelemetry, FanoutTelemetry, LogTelemetry};
