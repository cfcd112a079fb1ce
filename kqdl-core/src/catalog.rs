//! The catalog of fetchable data: one row per (source, family, field).

use crate::error::{LoaderError, Result};
use crate::registry::{builtin_specs, FamilySpec, FieldRegistry};
use polars::prelude::*;
use serde::Serialize;
use std::fmt;

/// Request-time switches that apply to every family.
pub const REQUEST_OPTIONS: &str = "download, trading_days_only";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogRow {
    pub source: String,
    pub family: String,
    pub field: String,
    pub label: String,
    pub description: String,
    pub options: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatalogTable {
    pub rows: Vec<CatalogRow>,
}

impl CatalogTable {
    pub fn from_specs(specs: &[FamilySpec]) -> Self {
        let rows = specs
            .iter()
            .flat_map(|spec| {
                spec.fields.iter().map(move |field| CatalogRow {
                    source: spec.source.to_string(),
                    family: spec.family.to_string(),
                    field: field.name.clone(),
                    label: field.label.clone(),
                    description: field.description.clone(),
                    options: REQUEST_OPTIONS.to_string(),
                })
            })
            .collect();
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column(&self, name: &str, get: impl Fn(&CatalogRow) -> &str) -> Column {
        let values: Vec<String> = self.rows.iter().map(|r| get(r).to_string()).collect();
        Column::new(name.into(), values)
    }

    pub fn to_dataframe(&self) -> Result<DataFrame> {
        DataFrame::new(vec![
            self.column("source", |r| r.source.as_str()),
            self.column("family", |r| r.family.as_str()),
            self.column("field", |r| r.field.as_str()),
            self.column("label", |r| r.label.as_str()),
            self.column("description", |r| r.description.as_str()),
            self.column("options", |r| r.options.as_str()),
        ])
        .map_err(|e| LoaderError::Export(format!("catalog dataframe: {e}")))
    }
}

impl fmt::Display for CatalogTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<8} {:<12} {:<14} {:<10} {}",
            "source", "family", "field", "label", "description"
        )?;
        for row in &self.rows {
            writeln!(
                f,
                "{:<8} {:<12} {:<14} {:<10} {}",
                row.source, row.family, row.field, row.label, row.description
            )?;
        }
        write!(f, "options: {REQUEST_OPTIONS}")
    }
}

/// Catalog of a specific registry.
pub fn catalog(registry: &FieldRegistry) -> CatalogTable {
    CatalogTable::from_specs(registry.specs())
}

/// Catalog of everything the built-in sources can supply.
pub fn show_catalog() -> CatalogTable {
    CatalogTable::from_specs(&builtin_specs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_lists_every_builtin_field() {
        let catalog = show_catalog();
        assert_eq!(catalog.len(), 7 + 2 + 6);
        assert!(catalog
            .rows
            .iter()
            .any(|r| r.field == "close" && r.label == "종가" && r.family == "ohlcv"));
        assert!(catalog.rows.iter().all(|r| r.source == "pykrx"));
    }

    #[test]
    fn catalog_dataframe_has_one_row_per_field() {
        let df = show_catalog().to_dataframe().unwrap();
        assert_eq!(df.shape(), (15, 6));
    }

    #[test]
    fn display_lists_options() {
        let text = show_catalog().to_string();
        assert!(text.contains("market_cap"));
        assert!(text.ends_with(REQUEST_OPTIONS));
    }
}
