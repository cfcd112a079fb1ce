//! Criterion benchmarks for the reshape hot paths.
//!
//! Benchmarks:
//! 1. Wide snapshot → long form (one trading day, full market)
//! 2. Filter by field and universe
//! 3. melt_to_single / melt_to_multi over a year of snapshots

use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kqdl_core::data::{
    filter, melt_to_multi, melt_to_single, universe, LongTable, SnapshotProvider,
    SyntheticProvider,
};
use kqdl_core::dates::calendar_days;
use kqdl_core::Family;

// ── Helpers ──────────────────────────────────────────────────────────

fn instruments(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{:06}", 100 + i * 7)).collect()
}

fn long_table(n_instruments: usize, n_days: i64) -> LongTable {
    let provider = SyntheticProvider::new(instruments(n_instruments));
    let start = NaiveDate::from_ymd_opt(2021, 1, 4).unwrap();
    let end = start + chrono::Duration::days(n_days - 1);
    LongTable::concat(
        calendar_days(start, end, true)
            .into_iter()
            .map(|d| provider.fetch_snapshot(Family::Ohlcv, d).unwrap().to_long()),
    )
}

// ── 1. Snapshot unpivot ──────────────────────────────────────────────

fn bench_to_long(c: &mut Criterion) {
    let mut group = c.benchmark_group("to_long");
    for n in [500usize, 2500] {
        let provider = SyntheticProvider::new(instruments(n));
        let snapshot = provider
            .fetch_snapshot(Family::Ohlcv, NaiveDate::from_ymd_opt(2021, 1, 4).unwrap())
            .unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(n), &snapshot, |b, s| {
            b.iter(|| black_box(s.to_long()))
        });
    }
    group.finish();
}

// ── 2. Filter ────────────────────────────────────────────────────────

fn bench_filter(c: &mut Criterion) {
    let table = long_table(500, 60);
    let fields = vec!["close".to_string(), "volume".to_string()];
    let u = universe(instruments(50));

    c.bench_function("filter/fields", |b| {
        b.iter(|| black_box(filter(&table, &fields, None)))
    });
    c.bench_function("filter/fields_and_universe", |b| {
        b.iter(|| black_box(filter(&table, &fields, Some(&u))))
    });
}

// ── 3. Pivots ────────────────────────────────────────────────────────

fn bench_melt(c: &mut Criterion) {
    let table = long_table(200, 365);
    let closes = filter(&table, &["close".to_string()], None);
    let prices = filter(
        &table,
        &["open".to_string(), "close".to_string(), "volume".to_string()],
        None,
    );

    c.bench_function("melt_to_single/200x365", |b| {
        b.iter(|| black_box(melt_to_single(&closes).unwrap()))
    });
    c.bench_function("melt_to_multi/200x365x3", |b| {
        b.iter(|| black_box(melt_to_multi(&prices).unwrap()))
    });
    c.bench_function("round_trip/200x365x3", |b| {
        b.iter(|| black_box(melt_to_multi(&prices).unwrap().to_long()))
    });
}

criterion_group!(benches, bench_to_long, bench_filter, bench_melt);
criterion_main!(benches);
