//! Loader-level error taxonomy.
//!
//! Every error is propagated to the caller unmodified. Provider and cache
//! failures arrive wrapped in [`LoaderError::Fetch`].

use crate::data::provider::DataError;
use crate::registry::{Family, Source};
use chrono::NaiveDate;
use thiserror::Error;

/// Errors surfaced by the public loader API.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("invalid date format: '{0}' (expected YYYY-MM-DD)")]
    Format(String),

    #[error("field '{field}' is not available from source '{origin}'")]
    UnavailableField { field: String, origin: Source },

    #[error("expected exactly one distinct field, found {}: [{}]", found.len(), found.join(", "))]
    AmbiguousField { found: Vec<String> },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid fields argument: {0} (expected a field name or a list of field names)")]
    InvalidFieldArgument(String),

    #[error("unsupported data source: '{0}'")]
    UnsupportedSource(String),

    #[error("field '{field}' is declared by both {first:?} and {second:?}")]
    FieldConflict {
        field: String,
        first: Family,
        second: Family,
    },

    #[error("duplicate observation for ({date}, {instrument}, {field})")]
    DuplicateObservation {
        date: NaiveDate,
        instrument: String,
        field: String,
    },

    #[error("config file error: {0}")]
    Config(String),

    #[error("export error: {0}")]
    Export(String),

    #[error(transparent)]
    Fetch(#[from] DataError),
}

pub type Result<T, E = LoaderError> = std::result::Result<T, E>;
