//! Snapshot acquisition, caching and reshaping

pub mod aggregate;
pub mod cache;
pub mod circuit_breaker;
pub mod krx;
pub mod provider;
pub mod reader;
pub mod reshape;
pub mod synthetic;
pub mod table;

pub use aggregate::{collect, filter, CollectContext, Collected};
pub use cache::{CacheMeta, CachedFile, SnapshotCache};
pub use krx::KrxProvider;
pub use provider::{DataError, FetchProgress, LogProgress, NoProgress, SnapshotProvider};
pub use reader::{FetchFailurePolicy, FetchGap, FetchOptions, FetchReport, SnapshotReader};
pub use reshape::{melt_to_multi, melt_to_single, MultiFieldTable, ResultTable, SingleFieldTable};
pub use synthetic::SyntheticProvider;
pub use table::{universe, InstrumentId, LongRow, LongTable, Universe, WideSnapshot};
