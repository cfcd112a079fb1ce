//! Aggregation: fan a field request out to per-family readers, then narrow
//! the combined long table down to what was asked for.

use super::cache::SnapshotCache;
use super::provider::{FetchProgress, SnapshotProvider};
use super::reader::{FetchOptions, FetchReport, SnapshotReader};
use super::table::{LongTable, Universe};
use crate::error::Result;
use crate::registry::{FieldRegistry, Resolution, Source};
use chrono::NaiveDate;
use std::collections::HashSet;

/// Everything `collect` needs besides the request itself.
pub struct CollectContext<'a> {
    pub registry: &'a FieldRegistry,
    pub source: Source,
    pub provider: &'a dyn SnapshotProvider,
    pub cache: Option<&'a SnapshotCache>,
    pub progress: &'a dyn FetchProgress,
    pub options: FetchOptions,
}

/// Output of [`collect`].
#[derive(Debug, Clone)]
pub struct Collected {
    /// Full snapshots of every family involved, all instruments.
    pub table: LongTable,
    /// Requested fields grouped by family, canonical names.
    pub resolution: Resolution,
    pub report: FetchReport,
}

impl Collected {
    /// Canonical names of every requested field.
    pub fn fields(&self) -> Vec<String> {
        self.resolution.values().flatten().cloned().collect()
    }
}

/// Resolve `fields`, read each family over `dates`, and concatenate.
///
/// Families are visited in ascending order, so the table is grouped by family
/// and sorted by date within each group.
pub fn collect<S: AsRef<str>>(
    ctx: &CollectContext<'_>,
    fields: &[S],
    dates: &[NaiveDate],
    download: bool,
) -> Result<Collected> {
    let resolution = ctx.registry.resolve(ctx.source, fields)?;

    let mut tables = Vec::with_capacity(resolution.len());
    let mut report = FetchReport::default();

    for family in resolution.keys() {
        let reader = SnapshotReader::new(*family, ctx.provider, ctx.cache, ctx.progress, ctx.options);
        let (table, family_report) = reader.fetch_range(dates, download)?;
        tracing::debug!(%family, rows = table.len(), "family collected");
        tables.push(table);
        report.merge(family_report);
    }

    Ok(Collected {
        table: LongTable::concat(tables),
        resolution,
        report,
    })
}

/// Keep rows whose field is in `allowed` and, when a universe is given, whose
/// instrument is in it. `None` keeps every instrument.
pub fn filter(table: &LongTable, allowed: &[String], universe: Option<&Universe>) -> LongTable {
    let allowed: HashSet<&str> = allowed.iter().map(String::as_str).collect();
    let rows = table
        .rows
        .iter()
        .filter(|row| allowed.contains(row.field.as_str()))
        .filter(|row| universe.map_or(true, |u| u.contains(&row.instrument)))
        .cloned()
        .collect();
    LongTable::new(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::NoProgress;
    use crate::data::synthetic::SyntheticProvider;
    use crate::data::table::{universe, LongRow};
    use crate::error::LoaderError;
    use crate::registry::{ConflictPolicy, Family};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 1, d).unwrap()
    }

    fn context<'a>(registry: &'a FieldRegistry, provider: &'a SyntheticProvider) -> CollectContext<'a> {
        CollectContext {
            registry,
            source: Source::Krx,
            provider,
            cache: None,
            progress: &NoProgress,
            options: FetchOptions::default(),
        }
    }

    #[test]
    fn collect_spans_families() {
        let registry = FieldRegistry::builtin(ConflictPolicy::Reject).unwrap();
        let provider = SyntheticProvider::new(["005930"]);
        let ctx = context(&registry, &provider);

        let collected = collect(&ctx, &["close", "per", "종가"], &[day(4), day(5)], true).unwrap();

        assert_eq!(collected.resolution.len(), 2);
        assert_eq!(collected.resolution[&Family::Ohlcv], vec!["close".to_string()]);
        assert_eq!(collected.fields(), vec!["close".to_string(), "per".to_string()]);
        // Whole snapshots: 7 price fields + 6 fundamentals, two days.
        assert_eq!(collected.table.len(), (7 + 6) * 2);
        assert_eq!(collected.report.downloaded, 4);
    }

    #[test]
    fn unknown_field_fails_before_fetching() {
        let registry = FieldRegistry::builtin(ConflictPolicy::Reject).unwrap();
        let provider = SyntheticProvider::default();
        let ctx = context(&registry, &provider);

        let err = collect(&ctx, &["close", "nonexistent"], &[day(4)], true).unwrap_err();
        assert!(matches!(err, LoaderError::UnavailableField { .. }));
        assert_eq!(provider.fetch_count(), 0);
    }

    #[test]
    fn filter_by_field_and_universe() {
        let table = LongTable::new(vec![
            LongRow::new(day(4), "005930", "close", 1.0),
            LongRow::new(day(4), "005930", "open", 2.0),
            LongRow::new(day(4), "000660", "close", 3.0),
        ]);
        let fields = vec!["close".to_string()];

        let all = filter(&table, &fields, None);
        assert_eq!(all.len(), 2);

        let u = universe(["005930"]);
        let narrowed = filter(&table, &fields, Some(&u));
        assert_eq!(narrowed.rows, vec![LongRow::new(day(4), "005930", "close", 1.0)]);

        let empty = universe(Vec::<&str>::new());
        assert!(filter(&table, &fields, Some(&empty)).is_empty());
    }
}
