//! Parquet snapshot cache with Hive-style partitioning.
//!
//! Layout: `{cache_dir}/family={FAMILY}/{YYYY-MM-DD}.parquet`
//!
//! Each file holds one family's full long-form snapshot for one date
//! (columns `date`, `instrument`, `field`, `value`). Non-trading days are
//! cached as empty files so they are not fetched again; deciding whether an
//! empty snapshot is a holiday is the reader's job.
//!
//! Features:
//! - Atomic writes (write to .tmp, rename into place)
//! - Integrity validation on load (schema check)
//! - Quarantine for corrupt files ({filename}.quarantined)
//! - Metadata sidecar per family, updated from the files just written

use super::provider::DataError;
use super::table::{InstrumentId, LongRow, LongTable};
use crate::dates::{format_date, parse_date};
use crate::registry::Family;
use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

const COLUMNS: [&str; 4] = ["date", "instrument", "field", "value"];

/// One cached date: row count and BLAKE3 hash of the Parquet bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedFile {
    pub rows: usize,
    pub hash: String,
}

/// Metadata sidecar for one cached family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMeta {
    pub family: Family,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub date_count: usize,
    pub row_count: usize,
    /// Hash over the per-file hashes in date order.
    pub data_hash: String,
    pub updated_at: NaiveDateTime,
    /// Per-date entries keyed by `YYYY-MM-DD`.
    #[serde(default)]
    pub files: BTreeMap<String, CachedFile>,
}

/// The Parquet snapshot cache.
#[derive(Debug, Clone)]
pub struct SnapshotCache {
    cache_dir: PathBuf,
}

impl SnapshotCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// Root directory of the cache.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// `{cache_dir}/family={FAMILY}/`
    fn family_dir(&self, family: Family) -> PathBuf {
        self.cache_dir.join(format!("family={family}"))
    }

    fn date_path(&self, family: Family, date: NaiveDate) -> PathBuf {
        self.family_dir(family)
            .join(format!("{}.parquet", format_date(date)))
    }

    fn meta_path(&self, family: Family) -> PathBuf {
        self.family_dir(family).join("meta.json")
    }

    /// Whether a snapshot for `date` is on disk.
    pub fn contains(&self, family: Family, date: NaiveDate) -> bool {
        self.date_path(family, date).is_file()
    }

    /// Write one date's long-form snapshot. Rows for other dates are rejected.
    ///
    /// Returns the entry to pass to [`SnapshotCache::record`].
    pub fn write(
        &self,
        family: Family,
        date: NaiveDate,
        table: &LongTable,
    ) -> Result<CachedFile, DataError> {
        if let Some(stray) = table.rows.iter().find(|r| r.date != date) {
            return Err(DataError::CacheError(format!(
                "row dated {} in snapshot for {date}",
                stray.date
            )));
        }

        let dir = self.family_dir(family);
        fs::create_dir_all(&dir)
            .map_err(|e| DataError::CacheError(format!("failed to create dir: {e}")))?;

        let mut df = table_to_dataframe(table)?;
        let path = self.date_path(family, date);
        let tmp_path = path.with_extension("parquet.tmp");

        let bytes = encode_parquet(&mut df)?;
        fs::write(&tmp_path, &bytes)
            .map_err(|e| DataError::ParquetError(format!("write {}: {e}", tmp_path.display())))?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            DataError::CacheError(format!("atomic rename failed: {e}"))
        })?;

        Ok(CachedFile {
            rows: table.len(),
            hash: blake3::hash(&bytes).to_hex().to_string(),
        })
    }

    /// Load one date's snapshot.
    ///
    /// A corrupt file is quarantined and reported as not cached.
    pub fn load(&self, family: Family, date: NaiveDate) -> Result<LongTable, DataError> {
        let path = self.date_path(family, date);
        if !path.is_file() {
            return Err(DataError::NoCachedData { family, date });
        }

        match load_and_validate_parquet(&path) {
            Ok(table) => Ok(table),
            Err(e) => {
                let quarantine = path.with_extension("parquet.quarantined");
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "quarantining corrupt cache file"
                );
                let _ = fs::rename(&path, &quarantine);
                Err(DataError::NoCachedData { family, date })
            }
        }
    }

    /// Dates cached for a family, ascending.
    pub fn cached_dates(&self, family: Family) -> Vec<NaiveDate> {
        let Ok(entries) = fs::read_dir(self.family_dir(family)) else {
            return Vec::new();
        };
        let mut dates: Vec<NaiveDate> = entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
                    return None;
                }
                let stem = path.file_stem()?.to_str()?.to_string();
                parse_date(&stem).ok()
            })
            .collect();
        dates.sort();
        dates
    }

    /// Merge freshly written files into the family's sidecar.
    ///
    /// Entries whose file is gone (quarantined, deleted) are dropped. Files on
    /// disk that the sidecar has never seen are hashed and counted once;
    /// files already recorded are not read.
    pub fn record(
        &self,
        family: Family,
        written: &[(NaiveDate, CachedFile)],
    ) -> Result<CacheMeta, DataError> {
        let mut files = self.get_meta(family).map(|m| m.files).unwrap_or_default();
        for (date, file) in written {
            files.insert(format_date(*date), file.clone());
        }

        let on_disk = self.cached_dates(family);
        let keys: BTreeSet<String> = on_disk.iter().map(|d| format_date(*d)).collect();
        files.retain(|key, _| keys.contains(key));
        for date in &on_disk {
            let key = format_date(*date);
            if !files.contains_key(&key) {
                if let Some(file) = self.describe(family, *date) {
                    files.insert(key, file);
                }
            }
        }

        let dates: Vec<NaiveDate> = files.keys().filter_map(|k| parse_date(k).ok()).collect();
        let mut hasher = blake3::Hasher::new();
        for (key, file) in &files {
            hasher.update(key.as_bytes());
            hasher.update(file.hash.as_bytes());
        }

        let meta = CacheMeta {
            family,
            first_date: dates.first().copied(),
            last_date: dates.last().copied(),
            date_count: files.len(),
            row_count: files.values().map(|f| f.rows).sum(),
            data_hash: hasher.finalize().to_hex().to_string(),
            updated_at: chrono::Local::now().naive_local(),
            files,
        };

        fs::create_dir_all(self.family_dir(family))
            .map_err(|e| DataError::CacheError(format!("failed to create dir: {e}")))?;
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| DataError::CacheError(format!("meta serialization: {e}")))?;
        fs::write(self.meta_path(family), meta_json)
            .map_err(|e| DataError::CacheError(format!("meta write: {e}")))?;

        Ok(meta)
    }

    /// Bring the sidecar in line with the files on disk.
    pub fn refresh_meta(&self, family: Family) -> Result<CacheMeta, DataError> {
        self.record(family, &[])
    }

    /// Entry for a file the sidecar does not know. Unreadable files are
    /// skipped and left for [`SnapshotCache::load`] to quarantine.
    fn describe(&self, family: Family, date: NaiveDate) -> Option<CachedFile> {
        let path = self.date_path(family, date);
        let bytes = fs::read(&path).ok()?;
        let table = load_and_validate_parquet(&path).ok()?;
        Some(CachedFile {
            rows: table.len(),
            hash: blake3::hash(&bytes).to_hex().to_string(),
        })
    }

    /// Read the metadata sidecar, if present and parseable.
    pub fn get_meta(&self, family: Family) -> Option<CacheMeta> {
        let content = fs::read_to_string(self.meta_path(family)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Metadata of every family that has a sidecar.
    pub fn status(&self, families: &[Family]) -> Vec<CacheMeta> {
        families.iter().filter_map(|f| self.get_meta(*f)).collect()
    }
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn table_to_dataframe(table: &LongTable) -> Result<DataFrame, DataError> {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)
        .ok_or_else(|| DataError::Other("epoch date".into()))?;
    let dates: Vec<i32> = table
        .rows
        .iter()
        .map(|r| (r.date - epoch).num_days() as i32)
        .collect();
    let instruments: Vec<String> = table.rows.iter().map(|r| r.instrument.0.clone()).collect();
    let fields: Vec<String> = table.rows.iter().map(|r| r.field.clone()).collect();
    let values: Vec<f64> = table.rows.iter().map(|r| r.value).collect();

    DataFrame::new(vec![
        Column::new("date".into(), dates)
            .cast(&DataType::Date)
            .map_err(|e| DataError::ParquetError(format!("date cast: {e}")))?,
        Column::new("instrument".into(), instruments),
        Column::new("field".into(), fields),
        Column::new("value".into(), values),
    ])
    .map_err(|e| DataError::ParquetError(format!("dataframe creation: {e}")))
}

fn encode_parquet(df: &mut DataFrame) -> Result<Vec<u8>, DataError> {
    let mut bytes = Vec::new();
    ParquetWriter::new(&mut bytes)
        .finish(df)
        .map_err(|e| DataError::ParquetError(format!("write parquet: {e}")))?;
    Ok(bytes)
}

fn load_and_validate_parquet(path: &Path) -> Result<LongTable, DataError> {
    let file = fs::File::open(path).map_err(|e| DataError::ParquetError(format!("open: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::ParquetError(format!("read: {e}")))?;

    for col_name in &COLUMNS {
        if df.column(col_name).is_err() {
            return Err(DataError::ValidationError(format!(
                "missing column '{col_name}'"
            )));
        }
    }

    dataframe_to_table(&df)
}

fn dataframe_to_table(df: &DataFrame) -> Result<LongTable, DataError> {
    let map_err = |e: PolarsError| DataError::ParquetError(format!("column read: {e}"));

    let date_ca = df
        .column("date")
        .map_err(map_err)?
        .date()
        .map_err(|e| DataError::ParquetError(format!("date column type: {e}")))?;
    let instrument_ca = df
        .column("instrument")
        .map_err(map_err)?
        .str()
        .map_err(|e| DataError::ParquetError(format!("instrument column type: {e}")))?;
    let field_ca = df
        .column("field")
        .map_err(map_err)?
        .str()
        .map_err(|e| DataError::ParquetError(format!("field column type: {e}")))?;
    let value_ca = df
        .column("value")
        .map_err(map_err)?
        .f64()
        .map_err(|e| DataError::ParquetError(format!("value column type: {e}")))?;

    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)
        .ok_or_else(|| DataError::Other("epoch date".into()))?;
    let n = df.height();
    let mut rows = Vec::with_capacity(n);

    for i in 0..n {
        let null_at = |col: &str| DataError::ValidationError(format!("null {col} at row {i}"));
        let days = date_ca.get(i).ok_or_else(|| null_at("date"))?;
        rows.push(LongRow {
            date: epoch + chrono::Duration::days(days as i64),
            instrument: InstrumentId(instrument_ca.get(i).ok_or_else(|| null_at("instrument"))?.to_string()),
            field: field_ca.get(i).ok_or_else(|| null_at("field"))?.to_string(),
            value: value_ca.get(i).ok_or_else(|| null_at("value"))?,
        });
    }

    Ok(LongTable { rows })
}
