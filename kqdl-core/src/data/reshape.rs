//! Pivot long tables into the two result shapes.
//!
//! - [`melt_to_single`]: one field, rows = dates, columns = instruments
//! - [`melt_to_multi`]: rows = (date, instrument), columns = fields
//!
//! Cells are `Option<f64>`: a combination with no observation is `None`,
//! never zero. Both shapes unpivot back to the long form with `to_long`.

use super::table::{InstrumentId, LongRow, LongTable, Universe};
use crate::dates::format_date;
use crate::error::{LoaderError, Result};
use chrono::NaiveDate;
use polars::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Single-field result: one row per date, one column per instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct SingleFieldTable {
    pub field: String,
    pub dates: Vec<NaiveDate>,
    pub instruments: Vec<InstrumentId>,
    /// `cells[date_idx][instrument_idx]`.
    pub cells: Vec<Vec<Option<f64>>>,
}

impl SingleFieldTable {
    /// A table with no rows or columns.
    pub fn empty(field: &str) -> Self {
        Self {
            field: field.to_string(),
            dates: Vec::new(),
            instruments: Vec::new(),
            cells: Vec::new(),
        }
    }

    /// Same data laid out on the given dates and instruments, both ascending.
    /// Combinations without an observation are `None`; observations outside
    /// the new axes are dropped.
    pub fn reindex(&self, dates: &[NaiveDate], instruments: &[InstrumentId]) -> Self {
        let cells = dates
            .iter()
            .map(|date| {
                instruments
                    .iter()
                    .map(|instrument| self.get(*date, instrument))
                    .collect()
            })
            .collect();
        Self {
            field: self.field.clone(),
            dates: dates.to_vec(),
            instruments: instruments.to_vec(),
            cells,
        }
    }

    pub fn get(&self, date: NaiveDate, instrument: &InstrumentId) -> Option<f64> {
        let row = self.dates.binary_search(&date).ok()?;
        let col = self.instruments.binary_search(instrument).ok()?;
        self.cells[row][col]
    }

    /// The column of one instrument, aligned with `dates`.
    pub fn column(&self, instrument: &InstrumentId) -> Option<Vec<Option<f64>>> {
        let col = self.instruments.binary_search(instrument).ok()?;
        Some(self.cells.iter().map(|row| row[col]).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn to_long(&self) -> LongTable {
        let mut rows = Vec::new();
        for (date, cells) in self.dates.iter().zip(&self.cells) {
            for (instrument, cell) in self.instruments.iter().zip(cells) {
                if let Some(value) = cell {
                    rows.push(LongRow {
                        date: *date,
                        instrument: instrument.clone(),
                        field: self.field.clone(),
                        value: *value,
                    });
                }
            }
        }
        LongTable::new(rows)
    }

    /// `date` column plus one Float64 column per instrument.
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let mut columns = vec![date_column(&self.dates)?];
        for (col, instrument) in self.instruments.iter().enumerate() {
            let values: Vec<Option<f64>> = self.cells.iter().map(|row| row[col]).collect();
            columns.push(Column::new(instrument.as_str().into(), values));
        }
        DataFrame::new(columns).map_err(|e| LoaderError::Export(format!("dataframe creation: {e}")))
    }

    pub fn to_csv(&self) -> Result<String> {
        let mut header = vec!["date".to_string()];
        header.extend(self.instruments.iter().map(|i| i.to_string()));

        let records = self.dates.iter().zip(&self.cells).map(|(date, cells)| {
            let mut record = vec![format_date(*date)];
            record.extend(cells.iter().map(format_cell));
            record
        });
        write_records(&header, records)
    }
}

/// Multi-field result: one row per (date, instrument), one column per field.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiFieldTable {
    pub fields: Vec<String>,
    /// Ascending by date, then instrument.
    pub index: Vec<(NaiveDate, InstrumentId)>,
    /// `cells[index_idx][field_idx]`.
    pub cells: Vec<Vec<Option<f64>>>,
}

impl MultiFieldTable {
    /// Same data indexed by every (date, instrument) combination of the
    /// given ascending axes.
    pub fn reindex(&self, dates: &[NaiveDate], instruments: &[InstrumentId]) -> Self {
        let mut index = Vec::with_capacity(dates.len() * instruments.len());
        let mut cells = Vec::with_capacity(index.capacity());
        for date in dates {
            for instrument in instruments {
                let row = self
                    .fields
                    .iter()
                    .map(|field| self.get(*date, instrument, field))
                    .collect();
                index.push((*date, instrument.clone()));
                cells.push(row);
            }
        }
        Self {
            fields: self.fields.clone(),
            index,
            cells,
        }
    }

    /// Add empty columns so every name in `fields` is present. Columns stay
    /// ascending.
    pub fn with_fields(&self, fields: &[String]) -> Self {
        let all: BTreeSet<&String> = self.fields.iter().chain(fields).collect();
        let all: Vec<String> = all.into_iter().cloned().collect();
        let cells = self
            .cells
            .iter()
            .map(|row| {
                all.iter()
                    .map(|field| {
                        self.fields
                            .iter()
                            .position(|f| f == field)
                            .and_then(|pos| row[pos])
                    })
                    .collect()
            })
            .collect();
        Self {
            fields: all,
            index: self.index.clone(),
            cells,
        }
    }

    /// Distinct instruments of the index, ascending.
    pub fn instruments(&self) -> Vec<InstrumentId> {
        self.index
            .iter()
            .map(|(_, i)| i)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn get(&self, date: NaiveDate, instrument: &InstrumentId, field: &str) -> Option<f64> {
        let row = self
            .index
            .binary_search_by(|(d, i)| (d, i).cmp(&(&date, instrument)))
            .ok()?;
        let col = self.fields.iter().position(|f| f == field)?;
        self.cells[row][col]
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn to_long(&self) -> LongTable {
        let mut rows = Vec::new();
        for ((date, instrument), cells) in self.index.iter().zip(&self.cells) {
            for (field, cell) in self.fields.iter().zip(cells) {
                if let Some(value) = cell {
                    rows.push(LongRow {
                        date: *date,
                        instrument: instrument.clone(),
                        field: field.clone(),
                        value: *value,
                    });
                }
            }
        }
        LongTable::new(rows)
    }

    /// `date` and `instrument` columns plus one Float64 column per field.
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let dates: Vec<NaiveDate> = self.index.iter().map(|(d, _)| *d).collect();
        let instruments: Vec<String> = self.index.iter().map(|(_, i)| i.to_string()).collect();

        let mut columns = vec![
            date_column(&dates)?,
            Column::new("instrument".into(), instruments),
        ];
        for (col, field) in self.fields.iter().enumerate() {
            let values: Vec<Option<f64>> = self.cells.iter().map(|row| row[col]).collect();
            columns.push(Column::new(field.as_str().into(), values));
        }
        DataFrame::new(columns).map_err(|e| LoaderError::Export(format!("dataframe creation: {e}")))
    }

    pub fn to_csv(&self) -> Result<String> {
        let mut header = vec!["date".to_string(), "instrument".to_string()];
        header.extend(self.fields.iter().cloned());

        let records = self.index.iter().zip(&self.cells).map(|((date, instrument), cells)| {
            let mut record = vec![format_date(*date), instrument.to_string()];
            record.extend(cells.iter().map(format_cell));
            record
        });
        write_records(&header, records)
    }
}

/// Result of a loader request; the variant follows the request mode.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultTable {
    Single(SingleFieldTable),
    Multi(MultiFieldTable),
}

impl ResultTable {
    pub fn to_long(&self) -> LongTable {
        match self {
            ResultTable::Single(t) => t.to_long(),
            ResultTable::Multi(t) => t.to_long(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ResultTable::Single(t) => t.is_empty(),
            ResultTable::Multi(t) => t.is_empty(),
        }
    }

    pub fn to_dataframe(&self) -> Result<DataFrame> {
        match self {
            ResultTable::Single(t) => t.to_dataframe(),
            ResultTable::Multi(t) => t.to_dataframe(),
        }
    }

    pub fn to_csv(&self) -> Result<String> {
        match self {
            ResultTable::Single(t) => t.to_csv(),
            ResultTable::Multi(t) => t.to_csv(),
        }
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let csv = self.to_csv()?;
        std::fs::write(path, csv)
            .map_err(|e| LoaderError::Export(format!("write {}: {e}", path.display())))
    }

    /// Lay the table out on `dates`, and on `universe` when given (otherwise on
    /// the instruments already present). Dates with no data get empty rows.
    pub fn reindex(&self, dates: &[NaiveDate], universe: Option<&Universe>) -> ResultTable {
        match self {
            ResultTable::Single(t) => {
                let instruments = match universe {
                    Some(u) => u.iter().cloned().collect(),
                    None => t.instruments.clone(),
                };
                ResultTable::Single(t.reindex(dates, &instruments))
            }
            ResultTable::Multi(t) => {
                let instruments = match universe {
                    Some(u) => u.iter().cloned().collect(),
                    None => t.instruments(),
                };
                ResultTable::Multi(t.reindex(dates, &instruments))
            }
        }
    }

    pub fn as_single(&self) -> Option<&SingleFieldTable> {
        match self {
            ResultTable::Single(t) => Some(t),
            ResultTable::Multi(_) => None,
        }
    }

    pub fn as_multi(&self) -> Option<&MultiFieldTable> {
        match self {
            ResultTable::Multi(t) => Some(t),
            ResultTable::Single(_) => None,
        }
    }
}

/// Pivot a table holding exactly one field.
///
/// Fails with `AmbiguousField` when the table holds zero or several fields,
/// and with `DuplicateObservation` when a (date, instrument) pair repeats.
pub fn melt_to_single(table: &LongTable) -> Result<SingleFieldTable> {
    let fields = table.fields();
    if fields.len() != 1 {
        return Err(LoaderError::AmbiguousField { found: fields });
    }
    let field = fields.into_iter().next().unwrap_or_default();

    let mut values: BTreeMap<(NaiveDate, &InstrumentId), f64> = BTreeMap::new();
    let mut instruments: BTreeSet<&InstrumentId> = BTreeSet::new();
    for row in &table.rows {
        if values.insert((row.date, &row.instrument), row.value).is_some() {
            return Err(duplicate(row));
        }
        instruments.insert(&row.instrument);
    }

    let dates = table.dates();
    let instruments: Vec<InstrumentId> = instruments.into_iter().cloned().collect();
    let cells = dates
        .iter()
        .map(|date| {
            instruments
                .iter()
                .map(|instrument| values.get(&(*date, instrument)).copied())
                .collect()
        })
        .collect();

    Ok(SingleFieldTable {
        field,
        dates,
        instruments,
        cells,
    })
}

/// Pivot on field: one row per (date, instrument) present in the table.
pub fn melt_to_multi(table: &LongTable) -> Result<MultiFieldTable> {
    let fields = table.fields();
    let field_pos: BTreeMap<&str, usize> = fields
        .iter()
        .enumerate()
        .map(|(i, f)| (f.as_str(), i))
        .collect();

    let mut rows: BTreeMap<(NaiveDate, &InstrumentId), Vec<Option<f64>>> = BTreeMap::new();
    for row in &table.rows {
        let cells = rows
            .entry((row.date, &row.instrument))
            .or_insert_with(|| vec![None; fields.len()]);
        let slot = &mut cells[field_pos[row.field.as_str()]];
        if slot.is_some() {
            return Err(duplicate(row));
        }
        *slot = Some(row.value);
    }

    let (index, cells) = rows
        .into_iter()
        .map(|((date, instrument), cells)| ((date, instrument.clone()), cells))
        .unzip();

    Ok(MultiFieldTable {
        fields,
        index,
        cells,
    })
}

fn duplicate(row: &LongRow) -> LoaderError {
    LoaderError::DuplicateObservation {
        date: row.date,
        instrument: row.instrument.to_string(),
        field: row.field.clone(),
    }
}

fn date_column(dates: &[NaiveDate]) -> Result<Column> {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)
        .ok_or_else(|| LoaderError::Export("epoch date".into()))?;
    let days: Vec<i32> = dates.iter().map(|d| (*d - epoch).num_days() as i32).collect();
    Column::new("date".into(), days)
        .cast(&DataType::Date)
        .map_err(|e| LoaderError::Export(format!("date cast: {e}")))
}

fn format_cell(cell: &Option<f64>) -> String {
    cell.map(|v| v.to_string()).unwrap_or_default()
}

fn write_records(
    header: &[String],
    records: impl Iterator<Item = Vec<String>>,
) -> Result<String> {
    let export = |e: csv::Error| LoaderError::Export(format!("csv: {e}"));
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(header).map_err(export)?;
    for record in records {
        wtr.write_record(&record).map_err(export)?;
    }
    let data = wtr
        .into_inner()
        .map_err(|e| LoaderError::Export(format!("failed to flush CSV writer: {e}")))?;
    String::from_utf8(data).map_err(|e| LoaderError::Export(format!("CSV output is not valid UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 1, d).unwrap()
    }

    fn id(s: &str) -> InstrumentId {
        InstrumentId::new(s)
    }

    fn prices() -> LongTable {
        LongTable::new(vec![
            LongRow::new(day(5), "005930", "close", 83900.0),
            LongRow::new(day(4), "005930", "close", 83000.0),
            LongRow::new(day(4), "000660", "close", 126000.0),
        ])
    }

    #[test]
    fn single_pivots_dates_by_instruments() {
        let t = melt_to_single(&prices()).unwrap();
        assert_eq!(t.field, "close");
        assert_eq!(t.dates, vec![day(4), day(5)]);
        assert_eq!(t.instruments, vec![id("000660"), id("005930")]);
        assert_eq!(t.get(day(4), &id("005930")), Some(83000.0));
        // 000660 has no row on the 5th.
        assert_eq!(t.get(day(5), &id("000660")), None);
        assert_eq!(t.column(&id("005930")), Some(vec![Some(83000.0), Some(83900.0)]));
    }

    #[test]
    fn single_rejects_zero_or_many_fields() {
        let err = melt_to_single(&LongTable::default()).unwrap_err();
        assert!(matches!(err, LoaderError::AmbiguousField { ref found } if found.is_empty()));

        let mut two = prices();
        two.rows.push(LongRow::new(day(4), "005930", "open", 81000.0));
        match melt_to_single(&two).unwrap_err() {
            LoaderError::AmbiguousField { found } => assert_eq!(found, vec!["close", "open"]),
            other => panic!("expected AmbiguousField, got {other:?}"),
        }
    }

    #[test]
    fn duplicates_are_rejected() {
        let mut dup = prices();
        dup.rows.push(LongRow::new(day(4), "005930", "close", 1.0));
        assert!(matches!(
            melt_to_single(&dup),
            Err(LoaderError::DuplicateObservation { .. })
        ));
        assert!(matches!(
            melt_to_multi(&dup),
            Err(LoaderError::DuplicateObservation { .. })
        ));
    }

    #[test]
    fn multi_indexes_by_date_and_instrument() {
        let mut long = prices();
        long.rows.push(LongRow::new(day(4), "005930", "per", 21.3));

        let t = melt_to_multi(&long).unwrap();
        assert_eq!(t.fields, vec!["close", "per"]);
        assert_eq!(
            t.index,
            vec![(day(4), id("000660")), (day(4), id("005930")), (day(5), id("005930"))]
        );
        assert_eq!(t.get(day(4), &id("005930"), "per"), Some(21.3));
        assert_eq!(t.get(day(4), &id("000660"), "per"), None);
    }

    #[test]
    fn multi_round_trips_to_long() {
        let mut long = prices();
        long.rows.push(LongRow::new(day(5), "000660", "per", 9.8));
        let back = melt_to_multi(&long).unwrap().to_long();
        assert_eq!(back.sorted(), long.sorted());
    }

    #[test]
    fn single_round_trips_to_long() {
        let back = melt_to_single(&prices()).unwrap().to_long();
        assert_eq!(back.sorted(), prices().sorted());
    }

    #[test]
    fn empty_multi_is_empty() {
        let t = melt_to_multi(&LongTable::default()).unwrap();
        assert!(t.is_empty());
        assert!(t.fields.is_empty());
    }

    #[test]
    fn reindex_adds_empty_dates_and_keeps_data() {
        let single = melt_to_single(&prices()).unwrap();
        let dates = [day(3), day(4), day(5)];
        let wide = single.reindex(&dates, &[id("005930")]);
        assert_eq!(wide.dates, dates.to_vec());
        assert_eq!(wide.column(&id("005930")), Some(vec![None, Some(83000.0), Some(83900.0)]));

        let u = crate::data::table::universe(["005930", "000660"]);
        let multi = ResultTable::Multi(melt_to_multi(&prices()).unwrap()).reindex(&dates, Some(&u));
        assert_eq!(multi.as_multi().unwrap().index.len(), 6);
        assert_eq!(multi.to_long().sorted(), prices().sorted());
    }

    #[test]
    fn with_fields_adds_empty_columns() {
        let multi = melt_to_multi(&prices())
            .unwrap()
            .with_fields(&["per".to_string(), "close".to_string()]);
        assert_eq!(multi.fields, vec!["close", "per"]);
        assert!(multi.cells.iter().all(|row| row[0].is_some() && row[1].is_none()));
        assert_eq!(multi.to_long().sorted(), prices().sorted());
    }

    #[test]
    fn csv_leaves_missing_cells_blank() {
        let table = ResultTable::Single(melt_to_single(&prices()).unwrap());
        let csv = table.to_csv().unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "date,000660,005930");
        assert_eq!(lines[1], "2021-01-04,126000,83000");
        assert_eq!(lines[2], "2021-01-05,,83900");
    }

    #[test]
    fn dataframe_shapes() {
        let single = melt_to_single(&prices()).unwrap().to_dataframe().unwrap();
        assert_eq!(single.shape(), (2, 3));

        let multi = melt_to_multi(&prices()).unwrap().to_dataframe().unwrap();
        assert_eq!(multi.shape(), (3, 3));
        assert_eq!(multi.column("close").unwrap().null_count(), 0);
    }
}
