//! kqdl core: Korean stock-market data loader.
//!
//! Fetches daily all-instrument snapshots from the KRX data portal, keeps
//! them in a Parquet cache, and reshapes the requested fields into wide
//! tables:
//! - Date utilities and the trading calendar
//! - Field registry mapping field names to data families
//! - Per-family snapshot readers with cache-first fetching
//! - Aggregation, filtering and the two result shapes
//! - The `Loader` facade

pub mod catalog;
pub mod config;
pub mod data;
pub mod dates;
pub mod error;
pub mod loader;
pub mod registry;

pub use catalog::{show_catalog, CatalogTable};
pub use config::{KrxConfig, LoaderConfig};
pub use data::{FetchReport, InstrumentId, LongTable, ResultTable, Universe};
pub use error::{LoaderError, Result};
pub use loader::{FieldRequest, Loader, LoaderState, RequestMode};
pub use registry::{ConflictPolicy, Family, FieldRegistry, Source};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything shared with the fetch pool is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<registry::FieldRegistry>();
        require_sync::<registry::FieldRegistry>();
        require_send::<data::SnapshotCache>();
        require_sync::<data::SnapshotCache>();
        require_send::<data::KrxProvider>();
        require_sync::<data::KrxProvider>();
        require_send::<data::SyntheticProvider>();
        require_sync::<data::SyntheticProvider>();
        require_send::<data::LongTable>();
        require_sync::<data::LongTable>();
        require_send::<data::ResultTable>();
        require_sync::<data::ResultTable>();
        require_send::<loader::Loader>();
    }

    /// A single field name must map to the single-field shape.
    #[test]
    fn field_request_modes() {
        assert_eq!(FieldRequest::from("close").mode(), RequestMode::Single);
        assert_eq!(FieldRequest::from(vec!["close"]).mode(), RequestMode::Multi);
    }
}
