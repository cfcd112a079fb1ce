//! Snapshot reader: one family's snapshots over a list of dates.
//!
//! Fallback order per date:
//! 1. Parquet cache (if the date has been fetched before)
//! 2. Provider fetch (if `download` is enabled), written back to the cache
//!
//! An empty snapshot is only cached when it is a past non-trading day. The
//! portal also answers empty for today before the close, for future dates and
//! during outages; those are fetched again next time.
//!
//! Missing dates are fetched on a bounded rayon pool; the combined table is
//! re-sorted by date so output does not depend on completion order.

use super::cache::{CachedFile, SnapshotCache};
use super::provider::{DataError, FetchProgress, SnapshotProvider};
use super::table::{LongTable, WideSnapshot};
use crate::dates::market_today;
use crate::registry::Family;
use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What to do when one date of a range cannot be fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchFailurePolicy {
    /// Abort the whole request with the first error.
    #[default]
    FailFast,
    /// Drop the date and record a [`FetchGap`].
    SkipAndRecord,
}

/// A date dropped under [`FetchFailurePolicy::SkipAndRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchGap {
    pub family: Family,
    pub date: NaiveDate,
    pub reason: String,
}

impl fmt::Display for FetchGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.family, self.date, self.reason)
    }
}

/// Where each date of a request came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchReport {
    pub from_cache: usize,
    pub downloaded: usize,
    pub gaps: Vec<FetchGap>,
}

impl FetchReport {
    /// True when no date was dropped.
    pub fn is_complete(&self) -> bool {
        self.gaps.is_empty()
    }

    pub fn merge(&mut self, other: FetchReport) {
        self.from_cache += other.from_cache;
        self.downloaded += other.downloaded;
        self.gaps.extend(other.gaps);
    }
}

/// Knobs for a range fetch.
#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    /// Size of the fetch pool; 1 fetches sequentially.
    pub workers: usize,
    pub on_fetch_error: FetchFailurePolicy,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            on_fetch_error: FetchFailurePolicy::FailFast,
        }
    }
}

/// Reader for one family.
pub struct SnapshotReader<'a> {
    family: Family,
    provider: &'a dyn SnapshotProvider,
    cache: Option<&'a SnapshotCache>,
    progress: &'a dyn FetchProgress,
    options: FetchOptions,
}

impl<'a> SnapshotReader<'a> {
    pub fn new(
        family: Family,
        provider: &'a dyn SnapshotProvider,
        cache: Option<&'a SnapshotCache>,
        progress: &'a dyn FetchProgress,
        options: FetchOptions,
    ) -> Self {
        Self {
            family,
            provider,
            cache,
            progress,
            options,
        }
    }

    pub fn family(&self) -> Family {
        self.family
    }

    /// The provider's all-instrument snapshot for one date.
    pub fn fetch_one(&self, date: NaiveDate) -> Result<WideSnapshot, DataError> {
        self.provider.fetch_snapshot(self.family, date)
    }

    /// Unpivot a snapshot: one row per (date, instrument, field) with a value.
    pub fn to_long(&self, snapshot: &WideSnapshot) -> LongTable {
        snapshot.to_long()
    }

    /// Long rows for every date in `dates`, ascending by date.
    pub fn fetch_range(
        &self,
        dates: &[NaiveDate],
        download: bool,
    ) -> Result<(LongTable, FetchReport), DataError> {
        let mut report = FetchReport::default();
        let mut parts: Vec<(NaiveDate, LongTable)> = Vec::with_capacity(dates.len());
        let mut pending = Vec::new();

        for &date in dates {
            match self.load_cached(date) {
                Some(table) => {
                    report.from_cache += 1;
                    parts.push((date, table));
                }
                None => pending.push(date),
            }
        }

        if !pending.is_empty() {
            if download {
                let fetched = self.download_all(&pending)?;
                for (date, result) in fetched {
                    match result {
                        Ok(table) => {
                            report.downloaded += 1;
                            parts.push((date, table));
                        }
                        Err(e) => self.skip_or_fail(&mut report, date, e)?,
                    }
                }
            } else {
                for date in pending {
                    let missing = DataError::NoCachedData {
                        family: self.family,
                        date,
                    };
                    self.skip_or_fail(&mut report, date, missing)?;
                }
            }
        }

        parts.sort_by_key(|(date, _)| *date);
        let table = LongTable::concat(parts.into_iter().map(|(_, table)| table));
        Ok((table, report))
    }

    fn load_cached(&self, date: NaiveDate) -> Option<LongTable> {
        let cache = self.cache?;
        if !cache.contains(self.family, date) {
            return None;
        }
        // A corrupt file is quarantined by the cache; fall through to a fetch.
        cache.load(self.family, date).ok()
    }

    fn skip_or_fail(
        &self,
        report: &mut FetchReport,
        date: NaiveDate,
        error: DataError,
    ) -> Result<(), DataError> {
        match self.options.on_fetch_error {
            FetchFailurePolicy::FailFast => Err(error),
            FetchFailurePolicy::SkipAndRecord => {
                tracing::warn!(family = %self.family, %date, error = %error, "skipping date");
                report.gaps.push(FetchGap {
                    family: self.family,
                    date,
                    reason: error.to_string(),
                });
                Ok(())
            }
        }
    }

    /// Fetch every pending date on the worker pool. Results come back in
    /// input order.
    fn download_all(
        &self,
        pending: &[NaiveDate],
    ) -> Result<Vec<(NaiveDate, Result<LongTable, DataError>)>, DataError> {
        let total = pending.len();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.workers.max(1))
            .build()
            .map_err(|e| DataError::Other(format!("failed to build fetch pool: {e}")))?;

        let fetched: Vec<(NaiveDate, Result<LongTable, DataError>, Option<CachedFile>)> =
            pool.install(|| {
                pending
                    .par_iter()
                    .enumerate()
                    .map(|(index, &date)| {
                        let (result, cached) = self.download_one(date, index, total);
                        (date, result, cached)
                    })
                    .collect()
            });

        let failed = fetched.iter().filter(|(_, r, _)| r.is_err()).count();
        self.progress
            .on_batch_complete(self.family, total - failed, failed, total);

        let mut written = Vec::new();
        let mut results = Vec::with_capacity(fetched.len());
        for (date, result, cached) in fetched {
            if let Some(file) = cached {
                written.push((date, file));
            }
            results.push((date, result));
        }

        if let (Some(cache), false) = (self.cache, written.is_empty()) {
            if let Err(e) = cache.record(self.family, &written) {
                tracing::warn!(family = %self.family, error = %e, "failed to update cache metadata");
            }
        }

        Ok(results)
    }

    /// Whether a freshly fetched table may be served from the cache later.
    fn cacheable(&self, date: NaiveDate, table: &LongTable) -> bool {
        if !table.is_empty() {
            return true;
        }
        if date >= market_today() {
            return false;
        }
        match self.provider.trading_days(date, date) {
            Ok(days) => !days.contains(&date),
            Err(e) => {
                tracing::debug!(family = %self.family, %date, error = %e, "calendar lookup failed");
                false
            }
        }
    }

    fn download_one(
        &self,
        date: NaiveDate,
        index: usize,
        total: usize,
    ) -> (Result<LongTable, DataError>, Option<CachedFile>) {
        self.progress.on_start(self.family, date, index, total);

        let result = self.fetch_one(date).map(|snapshot| self.to_long(&snapshot));

        let mut cached = None;
        if let (Ok(table), Some(cache)) = (&result, self.cache) {
            if !self.cacheable(date, table) {
                tracing::debug!(family = %self.family, %date, "empty snapshot on a trading day, not cached");
            } else {
                match cache.write(self.family, date, table) {
                    Ok(file) => cached = Some(file),
                    Err(e) => {
                        tracing::warn!(family = %self.family, %date, error = %e, "failed to cache snapshot")
                    }
                }
            }
        }

        self.progress.on_complete(
            self.family,
            date,
            index,
            total,
            result.as_ref().map(LongTable::len),
        );
        (result, cached)
    }
}
