//! Snapshot provider trait and structured error types.
//!
//! The SnapshotProvider trait abstracts over upstream sources (the KRX data
//! portal, the synthetic generator) so readers can swap implementations and
//! tests can run offline.

use super::table::WideSnapshot;
use crate::registry::{Family, Source};
use chrono::NaiveDate;
use thiserror::Error;

/// Structured error types for provider and cache operations.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("{provider} does not supply the {family} family")]
    UnsupportedFamily { provider: String, family: Family },

    #[error("fetch failed for {family} on {date}: {reason}")]
    FetchFailed {
        family: Family,
        date: NaiveDate,
        reason: String,
    },

    #[error("cache error: {0}")]
    CacheError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("parquet I/O error: {0}")]
    ParquetError(String),

    #[error("no cached {family} snapshot for {date} and downloads are disabled")]
    NoCachedData { family: Family, date: NaiveDate },

    #[error("data error: {0}")]
    Other(String),
}

/// Trait for snapshot providers.
///
/// Implementations handle the specifics of one upstream source. The cache
/// sits above this trait; providers don't know about it.
pub trait SnapshotProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// The source this provider serves.
    fn source(&self) -> Source;

    /// Fetch the all-instrument snapshot of `family` for one date.
    ///
    /// Non-trading days yield an empty snapshot, not an error.
    fn fetch_snapshot(&self, family: Family, date: NaiveDate) -> Result<WideSnapshot, DataError>;

    /// Trading days between `start` and `end` inclusive, ascending.
    fn trading_days(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>, DataError>;

    /// Check if the provider is currently available (not rate-limited, not blocked).
    fn is_available(&self) -> bool;
}

/// Progress callback for per-date fetches over long ranges.
///
/// Fetches may run on a worker pool, so calls can arrive out of order and
/// from several threads.
pub trait FetchProgress: Send + Sync {
    /// Called when starting to fetch one date.
    fn on_start(&self, family: Family, date: NaiveDate, index: usize, total: usize);

    /// Called when one date's fetch completes, with the number of long rows
    /// it produced or the error.
    fn on_complete(
        &self,
        family: Family,
        date: NaiveDate,
        index: usize,
        total: usize,
        result: Result<usize, &DataError>,
    );

    /// Called when every pending date of a family has been attempted.
    fn on_batch_complete(&self, family: Family, succeeded: usize, failed: usize, total: usize);
}

/// Progress reporter that logs through `tracing`.
pub struct LogProgress;

impl FetchProgress for LogProgress {
    fn on_start(&self, family: Family, date: NaiveDate, index: usize, total: usize) {
        tracing::debug!(%family, %date, "[{}/{}] fetching", index + 1, total);
    }

    fn on_complete(
        &self,
        family: Family,
        date: NaiveDate,
        _index: usize,
        _total: usize,
        result: Result<usize, &DataError>,
    ) {
        match result {
            Ok(rows) => tracing::debug!(%family, %date, rows, "fetched"),
            Err(e) => tracing::warn!(%family, %date, error = %e, "fetch failed"),
        }
    }

    fn on_batch_complete(&self, family: Family, succeeded: usize, failed: usize, total: usize) {
        tracing::info!(%family, succeeded, failed, total, "fetch batch complete");
    }
}

/// Progress reporter that does nothing.
pub struct NoProgress;

impl FetchProgress for NoProgress {
    fn on_start(&self, _: Family, _: NaiveDate, _: usize, _: usize) {}

    fn on_complete(&self, _: Family, _: NaiveDate, _: usize, _: usize, _: Result<usize, &DataError>) {}

    fn on_batch_complete(&self, _: Family, _: usize, _: usize, _: usize) {}
}
