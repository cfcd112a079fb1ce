//! Property tests for the reshape and date invariants.
//!
//! Uses proptest to verify:
//! 1. Round-trip: melting a long table to multi form and back is lossless
//! 2. Single-field pivots preserve every observation
//! 3. Date ranges are contiguous, ascending and bounded
//! 4. Date shifting is invertible

use chrono::NaiveDate;
use kqdl_core::data::{melt_to_multi, melt_to_single, LongRow, LongTable};
use kqdl_core::dates::{add_strdt, format_date, get_daterange, parse_date};
use proptest::prelude::*;
use std::collections::BTreeMap;

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_date() -> impl Strategy<Value = NaiveDate> {
    (0i64..3650).prop_map(|offset| {
        NaiveDate::from_ymd_opt(2015, 1, 1).unwrap() + chrono::Duration::days(offset)
    })
}

fn arb_instrument() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["005930", "000660", "035420", "051910"]).prop_map(String::from)
}

fn arb_field() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["close", "open", "per", "market_cap"]).prop_map(String::from)
}

fn arb_value() -> impl Strategy<Value = f64> {
    (-1.0e9..1.0e9_f64).prop_map(|v| (v * 100.0).round() / 100.0)
}

/// Long tables with unique (date, instrument, field) keys.
fn arb_long_table() -> impl Strategy<Value = LongTable> {
    prop::collection::vec(
        (0i64..20, arb_instrument(), arb_field(), arb_value()),
        0..60,
    )
    .prop_map(|cells| {
        let base = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        let unique: BTreeMap<(i64, String, String), f64> = cells
            .into_iter()
            .map(|(d, i, f, v)| ((d, i, f), v))
            .collect();
        LongTable::new(
            unique
                .into_iter()
                .map(|((d, i, f), v)| {
                    LongRow::new(base + chrono::Duration::days(d), i.as_str(), &f, v)
                })
                .collect(),
        )
    })
}

// ── 1. Round-trip ────────────────────────────────────────────────────

proptest! {
    #[test]
    fn multi_round_trip_is_lossless(table in arb_long_table()) {
        let multi = melt_to_multi(&table).unwrap();
        prop_assert_eq!(multi.to_long().sorted(), table.sorted());
    }

    #[test]
    fn multi_index_is_sorted_and_unique(table in arb_long_table()) {
        let multi = melt_to_multi(&table).unwrap();
        prop_assert!(multi.index.windows(2).all(|w| w[0] < w[1]));
        prop_assert_eq!(multi.fields, table.fields());
    }
}

// ── 2. Single-field pivots ───────────────────────────────────────────

proptest! {
    #[test]
    fn single_pivot_keeps_every_observation(table in arb_long_table()) {
        let closes = LongTable::new(
            table.rows.into_iter().filter(|r| r.field == "close").collect(),
        );
        prop_assume!(!closes.is_empty());

        let single = melt_to_single(&closes).unwrap();
        for row in &closes.rows {
            prop_assert_eq!(single.get(row.date, &row.instrument), Some(row.value));
        }
        let present = single.cells.iter().flatten().filter(|c| c.is_some()).count();
        prop_assert_eq!(present, closes.len());
    }
}

// ── 3. Date ranges ───────────────────────────────────────────────────

proptest! {
    #[test]
    fn inclusive_range_is_contiguous(start in arb_date(), len in 0i64..400) {
        let end = start + chrono::Duration::days(len);
        let range = get_daterange(&format_date(start), &format_date(end), true).unwrap();

        prop_assert_eq!(range.len() as i64, len + 1);
        prop_assert_eq!(range.first().cloned(), Some(format_date(start)));
        prop_assert_eq!(range.last().cloned(), Some(format_date(end)));
        for pair in range.windows(2) {
            let a = parse_date(&pair[0]).unwrap();
            let b = parse_date(&pair[1]).unwrap();
            prop_assert_eq!(b - a, chrono::Duration::days(1));
        }
    }

    #[test]
    fn exclusive_range_drops_end(start in arb_date(), len in 1i64..400) {
        let end = start + chrono::Duration::days(len);
        let range = get_daterange(&format_date(start), &format_date(end), false).unwrap();
        prop_assert_eq!(range.len() as i64, len);
        prop_assert!(!range.contains(&format_date(end)));
    }

    // ── 4. Date shifting ─────────────────────────────────────────────

    #[test]
    fn add_strdt_is_invertible(date in arb_date(), days in -1000i64..1000) {
        let s = format_date(date);
        let shifted = add_strdt(&s, days).unwrap();
        prop_assert_eq!(add_strdt(&shifted, -days).unwrap(), s);
    }
}
