//! Snapshot tables: one day's wide snapshot and the long (molten) form.
//!
//! The long form is the pipeline's canonical intermediate: one row per
//! (date, instrument, field) observation. Tables from different days and
//! different families concatenate without schema conflicts.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Opaque instrument identifier (KRX six-digit short code).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstrumentId(pub String);

impl InstrumentId {
    /// Numeric codes are zero-padded to six digits (`5930` → `005930`).
    pub fn new(id: impl AsRef<str>) -> Self {
        let id = id.as_ref().trim();
        if !id.is_empty() && id.len() < 6 && id.bytes().all(|b| b.is_ascii_digit()) {
            Self(format!("{id:0>6}"))
        } else {
            Self(id.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for InstrumentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for InstrumentId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl From<u32> for InstrumentId {
    fn from(id: u32) -> Self {
        Self::new(id.to_string())
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Set of instruments a request is restricted to.
pub type Universe = BTreeSet<InstrumentId>;

/// Build a universe from any iterable of ids; duplicates collapse.
pub fn universe<I, T>(ids: I) -> Universe
where
    I: IntoIterator<Item = T>,
    T: Into<InstrumentId>,
{
    ids.into_iter().map(Into::into).collect()
}

/// One day's provider snapshot: rows = instruments, columns = fields.
#[derive(Debug, Clone, PartialEq)]
pub struct WideSnapshot {
    pub date: NaiveDate,
    pub fields: Vec<String>,
    /// Each row holds one cell per entry of `fields`.
    pub rows: Vec<(InstrumentId, Vec<Option<f64>>)>,
}

impl WideSnapshot {
    pub fn new(date: NaiveDate, fields: Vec<String>) -> Self {
        Self {
            date,
            fields,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, instrument: InstrumentId, values: Vec<Option<f64>>) {
        debug_assert_eq!(values.len(), self.fields.len());
        self.rows.push((instrument, values));
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Unpivot into long form. Blank cells produce no row.
    pub fn to_long(&self) -> LongTable {
        let mut rows = Vec::with_capacity(self.rows.len() * self.fields.len());
        for (instrument, values) in &self.rows {
            for (field, value) in self.fields.iter().zip(values) {
                if let Some(value) = value {
                    rows.push(LongRow {
                        date: self.date,
                        instrument: instrument.clone(),
                        field: field.clone(),
                        value: *value,
                    });
                }
            }
        }
        LongTable { rows }
    }
}

/// One observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongRow {
    pub date: NaiveDate,
    pub instrument: InstrumentId,
    pub field: String,
    pub value: f64,
}

impl LongRow {
    pub fn new(date: NaiveDate, instrument: impl Into<InstrumentId>, field: &str, value: f64) -> Self {
        Self {
            date,
            instrument: instrument.into(),
            field: field.to_string(),
            value,
        }
    }
}

/// Long-form table of observations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LongTable {
    pub rows: Vec<LongRow>,
}

impl LongTable {
    pub fn new(rows: Vec<LongRow>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Concatenate tables, preserving input order.
    pub fn concat(tables: impl IntoIterator<Item = LongTable>) -> LongTable {
        let mut rows = Vec::new();
        for table in tables {
            rows.extend(table.rows);
        }
        LongTable { rows }
    }

    /// Distinct field names, ascending.
    pub fn fields(&self) -> Vec<String> {
        self.rows
            .iter()
            .map(|r| r.field.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Distinct dates, ascending.
    pub fn dates(&self) -> Vec<NaiveDate> {
        self.rows
            .iter()
            .map(|r| r.date)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Stable sort by (date, instrument, field).
    pub fn sort(&mut self) {
        self.rows.sort_by(|a, b| {
            (a.date, &a.instrument, &a.field).cmp(&(b.date, &b.instrument, &b.field))
        });
    }

    /// Sorted copy, for order-insensitive comparisons.
    pub fn sorted(&self) -> LongTable {
        let mut copy = self.clone();
        copy.sort();
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 1, day).unwrap()
    }

    #[test]
    fn to_long_emits_one_row_per_present_cell() {
        let mut snap = WideSnapshot::new(d(4), vec!["open".into(), "close".into()]);
        snap.push_row("005930".into(), vec![Some(81000.0), Some(83000.0)]);
        snap.push_row("000660".into(), vec![None, Some(126000.0)]);

        let long = snap.to_long();
        assert_eq!(long.len(), 3);
        assert_eq!(long.rows[0], LongRow::new(d(4), "005930", "open", 81000.0));
        assert_eq!(long.rows[2], LongRow::new(d(4), "000660", "close", 126000.0));
    }

    #[test]
    fn instrument_ids_are_zero_padded() {
        assert_eq!(InstrumentId::from(5930u32).as_str(), "005930");
        assert_eq!(InstrumentId::new(" 660 ").as_str(), "000660");
        assert_eq!(InstrumentId::new("Q500001").as_str(), "Q500001");
    }

    #[test]
    fn universe_collapses_duplicates() {
        let u = universe(["005930", "5930", "000660"]);
        assert_eq!(u.len(), 2);
    }

    #[test]
    fn concat_and_sort() {
        let a = LongTable::new(vec![LongRow::new(d(5), "005930", "close", 1.0)]);
        let b = LongTable::new(vec![LongRow::new(d(4), "005930", "close", 2.0)]);
        let mut all = LongTable::concat([a, b]);
        assert_eq!(all.dates(), vec![d(4), d(5)]);
        all.sort();
        assert_eq!(all.rows[0].date, d(4));
        assert_eq!(all.fields(), vec!["close".to_string()]);
    }
}
