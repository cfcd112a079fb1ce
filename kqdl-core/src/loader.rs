//! The loader facade.
//!
//! A [`Loader`] holds the request parameters (source, date bounds, universe)
//! and turns a field request into a reshaped table:
//!
//! ```text
//! registry.resolve → collect (per-family readers) → filter → melt → reindex
//! ```
//!
//! Lifecycle: `Configured → Reconfigured → Fetching → Ready | Failed`. Any
//! setter moves the loader back to `Reconfigured`; `get_data` may be called
//! from every state.

use crate::config::LoaderConfig;
use crate::data::aggregate::{collect, filter, CollectContext};
use crate::data::cache::SnapshotCache;
use crate::data::krx::KrxProvider;
use crate::data::provider::{FetchProgress, LogProgress, SnapshotProvider};
use crate::data::reader::FetchReport;
use crate::data::reshape::{melt_to_multi, melt_to_single, ResultTable, SingleFieldTable};
use crate::data::table::{LongTable, Universe};
use crate::dates::{calendar_days, format_date, parse_date};
use crate::error::{LoaderError, Result};
use crate::registry::{FieldRegistry, Source};
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    Configured,
    Reconfigured,
    Fetching,
    Ready,
    Failed,
}

impl fmt::Display for LoaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoaderState::Configured => "configured",
            LoaderState::Reconfigured => "reconfigured",
            LoaderState::Fetching => "fetching",
            LoaderState::Ready => "ready",
            LoaderState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Which result shape a request asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    Single,
    Multi,
}

/// A field request: one name (single mode) or a list (multi mode).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRequest {
    Single(String),
    Multi(Vec<String>),
}

impl FieldRequest {
    pub fn mode(&self) -> RequestMode {
        match self {
            FieldRequest::Single(_) => RequestMode::Single,
            FieldRequest::Multi(_) => RequestMode::Multi,
        }
    }

    /// The request as a list; a single name becomes a one-element list.
    pub fn fields(&self) -> Vec<String> {
        match self {
            FieldRequest::Single(field) => vec![field.clone()],
            FieldRequest::Multi(fields) => fields.clone(),
        }
    }
}

impl From<&str> for FieldRequest {
    fn from(field: &str) -> Self {
        FieldRequest::Single(field.to_string())
    }
}

impl From<String> for FieldRequest {
    fn from(field: String) -> Self {
        FieldRequest::Single(field)
    }
}

impl From<Vec<String>> for FieldRequest {
    fn from(fields: Vec<String>) -> Self {
        FieldRequest::Multi(fields)
    }
}

impl From<Vec<&str>> for FieldRequest {
    fn from(fields: Vec<&str>) -> Self {
        FieldRequest::Multi(fields.into_iter().map(String::from).collect())
    }
}

impl<const N: usize> From<[&str; N]> for FieldRequest {
    fn from(fields: [&str; N]) -> Self {
        FieldRequest::Multi(fields.iter().map(|f| f.to_string()).collect())
    }
}

/// Dynamic requests (JSON bodies, config values): a string or an array of
/// strings. Anything else is `InvalidFieldArgument`.
impl TryFrom<serde_json::Value> for FieldRequest {
    type Error = LoaderError;

    fn try_from(value: serde_json::Value) -> Result<Self> {
        use serde_json::Value;
        match value {
            Value::String(field) => Ok(FieldRequest::Single(field)),
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(field) => Ok(field),
                    other => Err(LoaderError::InvalidFieldArgument(format!(
                        "list element {other} is not a string"
                    ))),
                })
                .collect::<Result<Vec<_>>>()
                .map(FieldRequest::Multi),
            other => Err(LoaderError::InvalidFieldArgument(format!(
                "got {}",
                json_kind(&other)
            ))),
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    use serde_json::Value;
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

pub struct Loader {
    source: Source,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
    universe: Option<Universe>,
    config: LoaderConfig,
    registry: FieldRegistry,
    cache: Option<SnapshotCache>,
    /// Caller-supplied provider; overrides the source's own.
    provider: Option<Arc<dyn SnapshotProvider>>,
    /// KRX client, built on first use.
    krx: Option<Arc<dyn SnapshotProvider>>,
    progress: Arc<dyn FetchProgress>,
    state: LoaderState,
    mode: Option<RequestMode>,
}

impl Loader {
    /// `end_date = None` requests the single day `start_date`;
    /// `universe = None` keeps every instrument.
    pub fn new(
        source: &str,
        start_date: &str,
        end_date: Option<&str>,
        universe: Option<Universe>,
    ) -> Result<Self> {
        let source = source.parse::<Source>()?;
        let start_date = parse_date(start_date)?;
        let end_date = end_date.map(parse_date).transpose()?;
        check_range(start_date, end_date)?;
        let config = LoaderConfig::default();

        Ok(Self {
            source,
            start_date,
            end_date,
            universe,
            registry: FieldRegistry::builtin(config.field_conflicts)?,
            cache: config.cache_dir.as_ref().map(SnapshotCache::new),
            config,
            provider: None,
            krx: None,
            progress: Arc::new(LogProgress),
            state: LoaderState::Configured,
            mode: None,
        })
    }

    /// Replace the configuration. Rebuilds the registry under the new
    /// conflict policy and points the cache at the new directory.
    pub fn with_config(mut self, config: LoaderConfig) -> Result<Self> {
        config.validate()?;
        self.registry = FieldRegistry::builtin(config.field_conflicts)?;
        self.cache = config.cache_dir.as_ref().map(SnapshotCache::new);
        self.krx = None;
        self.config = config;
        Ok(self)
    }

    /// Use `provider` instead of the KRX portal.
    pub fn with_provider(mut self, provider: Arc<dyn SnapshotProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn FetchProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    pub fn end_date(&self) -> Option<NaiveDate> {
        self.end_date
    }

    pub fn universe(&self) -> Option<&Universe> {
        self.universe.as_ref()
    }

    pub fn state(&self) -> LoaderState {
        self.state
    }

    /// Mode of the most recent request.
    pub fn mode(&self) -> Option<RequestMode> {
        self.mode
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    /// Replace both date bounds. A missing bound collapses the range onto
    /// the other one; clearing both is a configuration error.
    pub fn set_date(&mut self, start_date: Option<&str>, end_date: Option<&str>) -> Result<()> {
        let start = start_date.map(parse_date).transpose()?;
        let end = end_date.map(parse_date).transpose()?;
        let (start, end) = match (start, end) {
            (None, None) => {
                return Err(LoaderError::Configuration(
                    "at least one of start_date and end_date is required".into(),
                ))
            }
            (Some(start), end) => (start, end),
            (None, Some(end)) => (end, Some(end)),
        };
        check_range(start, end)?;
        self.start_date = start;
        self.end_date = end;
        self.state = LoaderState::Reconfigured;
        Ok(())
    }

    pub fn set_universe(&mut self, universe: Option<Universe>) {
        self.universe = universe;
        self.state = LoaderState::Reconfigured;
    }

    pub fn set_source(&mut self, source: &str) -> Result<()> {
        self.source = source.parse::<Source>()?;
        self.state = LoaderState::Reconfigured;
        Ok(())
    }

    /// Fetch `fields` over the configured range and reshape them.
    ///
    /// A single field name yields a [`ResultTable::Single`] (dates ×
    /// instruments); a list yields a [`ResultTable::Multi`] ((date,
    /// instrument) × fields).
    pub fn get_data(&mut self, fields: impl Into<FieldRequest>, download: bool) -> Result<ResultTable> {
        let (table, report) = self.get_data_with_report(fields, download)?;
        if !report.is_complete() {
            tracing::warn!(gaps = report.gaps.len(), "result has missing dates");
        }
        Ok(table)
    }

    /// [`Loader::get_data`], also returning where each date came from and
    /// which dates were skipped.
    pub fn get_data_with_report(
        &mut self,
        fields: impl Into<FieldRequest>,
        download: bool,
    ) -> Result<(ResultTable, FetchReport)> {
        let request = fields.into();
        if let FieldRequest::Multi(list) = &request {
            if list.is_empty() {
                return Err(LoaderError::InvalidFieldArgument("empty field list".into()));
            }
        }
        self.mode = Some(request.mode());
        self.state = LoaderState::Fetching;

        let result = self.run(&request, download);
        self.state = match result {
            Ok(_) => LoaderState::Ready,
            Err(_) => LoaderState::Failed,
        };
        result
    }

    fn run(&mut self, request: &FieldRequest, download: bool) -> Result<(ResultTable, FetchReport)> {
        let fields = request.fields();
        // Unknown fields fail here, before any provider is built.
        self.registry.resolve(self.source, &fields)?;

        let provider = self.provider()?;
        let dates = self.dates(provider.as_ref())?;
        tracing::info!(
            source = %self.source,
            fields = ?fields,
            start = %self.start_date,
            dates = dates.len(),
            download,
            "loading"
        );

        let ctx = CollectContext {
            registry: &self.registry,
            source: self.source,
            provider: provider.as_ref(),
            cache: self.cache.as_ref(),
            progress: self.progress.as_ref(),
            options: self.config.fetch_options(),
        };
        let collected = collect(&ctx, &fields, &dates, download)?;
        let filtered = filter(&collected.table, &collected.fields(), self.universe.as_ref());

        let table = match request {
            FieldRequest::Single(_) => {
                ResultTable::Single(self.single(&filtered, &collected.fields())?)
            }
            FieldRequest::Multi(_) => {
                ResultTable::Multi(melt_to_multi(&filtered)?.with_fields(&collected.fields()))
            }
        };

        Ok((table.reindex(&dates, self.universe.as_ref()), collected.report))
    }

    fn single(&self, table: &LongTable, fields: &[String]) -> Result<SingleFieldTable> {
        match fields {
            [field] if table.is_empty() => Ok(SingleFieldTable::empty(field)),
            _ => melt_to_single(table),
        }
    }

    /// The provider for the current source, building the KRX client on
    /// first use.
    fn provider(&mut self) -> Result<Arc<dyn SnapshotProvider>> {
        if let Some(provider) = &self.provider {
            return Ok(Arc::clone(provider));
        }
        match self.source {
            Source::Krx => {
                if let Some(krx) = &self.krx {
                    return Ok(Arc::clone(krx));
                }
                let krx: Arc<dyn SnapshotProvider> = Arc::new(KrxProvider::new(&self.config.krx)?);
                self.krx = Some(Arc::clone(&krx));
                Ok(krx)
            }
            other => Err(LoaderError::UnsupportedSource(other.to_string())),
        }
    }

    /// Dates of the configured range, optionally narrowed to trading days.
    fn dates(&self, provider: &dyn SnapshotProvider) -> Result<Vec<NaiveDate>> {
        let end = self.end_date.unwrap_or(self.start_date);
        let mut dates = calendar_days(self.start_date, end, true);
        if self.config.trading_days_only && !dates.is_empty() {
            let open: BTreeSet<NaiveDate> =
                provider.trading_days(self.start_date, end)?.into_iter().collect();
            dates.retain(|d| open.contains(d));
        }
        Ok(dates)
    }
}

fn check_range(start: NaiveDate, end: Option<NaiveDate>) -> Result<()> {
    match end {
        Some(end) if end < start => Err(LoaderError::Configuration(format!(
            "start_date {} is after end_date {}",
            format_date(start),
            format_date(end)
        ))),
        _ => Ok(()),
    }
}

impl fmt::Display for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Current Loader information:")?;
        writeln!(f, "- source: {}", self.source)?;
        writeln!(f, "- start_date: {}", format_date(self.start_date))?;
        match self.end_date {
            Some(end) => writeln!(f, "- end_date: {}", format_date(end))?,
            None => writeln!(f, "- end_date: None")?,
        }
        match &self.universe {
            Some(universe) => {
                let ids: Vec<&str> = universe.iter().map(|i| i.as_str()).collect();
                writeln!(f, "- universe: [{}]", ids.join(", "))?;
            }
            None => writeln!(f, "- universe: None")?,
        }
        write!(f, "- state: {}", self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::NoProgress;
    use crate::data::synthetic::SyntheticProvider;
    use crate::data::table::universe;
    use serde_json::json;

    fn offline(start: &str, end: Option<&str>) -> Loader {
        let config = LoaderConfig {
            cache_dir: None,
            ..LoaderConfig::default()
        };
        Loader::new("pykrx", start, end, Some(universe(["005930"])))
            .unwrap()
            .with_config(config)
            .unwrap()
            .with_provider(Arc::new(SyntheticProvider::default()))
            .with_progress(Arc::new(NoProgress))
    }

    #[test]
    fn construction_validates_inputs() {
        assert!(matches!(
            Loader::new("pykrx", "2021/01/01", None, None),
            Err(LoaderError::Format(_))
        ));
        assert!(matches!(
            Loader::new("yahoo", "2021-01-01", None, None),
            Err(LoaderError::UnsupportedSource(_))
        ));
        let loader = Loader::new("FDR", "2021-01-01", None, None).unwrap();
        assert_eq!(loader.source(), Source::FinanceDataReader);
        assert_eq!(loader.state(), LoaderState::Configured);
    }

    #[test]
    fn single_request_is_dates_by_instruments() {
        let mut loader = offline("2021-01-04", Some("2021-01-06"));
        let table = loader.get_data("close", true).unwrap();

        let single = table.as_single().unwrap();
        assert_eq!(single.dates.len(), 3);
        assert_eq!(single.instruments.len(), 1);
        assert!(single.cells.iter().all(|row| row[0].is_some()));
        assert_eq!(loader.mode(), Some(RequestMode::Single));
        assert_eq!(loader.state(), LoaderState::Ready);
    }

    #[test]
    fn multi_request_spans_families() {
        let mut loader = offline("2021-01-04", None);
        let table = loader.get_data(["close", "per", "시가총액"], true).unwrap();

        let multi = table.as_multi().unwrap();
        assert_eq!(multi.fields, vec!["close", "market_cap", "per"]);
        assert_eq!(multi.index.len(), 1);
        assert_eq!(loader.mode(), Some(RequestMode::Multi));
    }

    #[test]
    fn holidays_are_empty_rows() {
        let mut loader = offline("2021-01-01", Some("2021-01-05"));
        let table = loader.get_data("close", true).unwrap();

        let single = table.as_single().unwrap();
        assert_eq!(single.dates.len(), 5);
        let present: Vec<bool> = single.cells.iter().map(|row| row[0].is_some()).collect();
        assert_eq!(present, vec![false, false, false, true, true]);
    }

    #[test]
    fn trading_days_only_skips_holidays() {
        let mut loader = offline("2021-01-01", Some("2021-01-05"));
        let config = LoaderConfig {
            cache_dir: None,
            trading_days_only: true,
            ..LoaderConfig::default()
        };
        loader = loader.with_config(config).unwrap();

        let table = loader.get_data("close", true).unwrap();
        assert_eq!(table.as_single().unwrap().dates.len(), 2);
    }

    #[test]
    fn unknown_field_marks_failure() {
        let mut loader = offline("2021-01-04", None);
        let err = loader.get_data("unknown_field", true).unwrap_err();
        assert!(matches!(err, LoaderError::UnavailableField { .. }));
        assert_eq!(loader.state(), LoaderState::Failed);
    }

    #[test]
    fn fdr_has_no_fields() {
        let mut loader = offline("2021-01-04", None);
        loader.set_source("financedatareader").unwrap();
        assert!(matches!(
            loader.get_data("close", true),
            Err(LoaderError::UnavailableField { .. })
        ));
    }

    #[test]
    fn set_date_rules() {
        let mut loader = offline("2021-01-04", None);
        assert!(matches!(
            loader.set_date(None, None),
            Err(LoaderError::Configuration(_))
        ));

        loader.set_date(None, Some("2021-01-08")).unwrap();
        assert_eq!(loader.start_date(), NaiveDate::from_ymd_opt(2021, 1, 8).unwrap());
        assert_eq!(loader.state(), LoaderState::Reconfigured);

        assert!(matches!(
            loader.set_date(Some("2021-1-8"), None),
            Err(LoaderError::Format(_))
        ));
    }

    #[test]
    fn inverted_range_is_rejected() {
        assert!(matches!(
            Loader::new("pykrx", "2021-01-08", Some("2021-01-04"), None),
            Err(LoaderError::Configuration(_))
        ));

        let mut loader = offline("2021-01-04", Some("2021-01-08"));
        assert!(matches!(
            loader.set_date(Some("2021-01-08"), Some("2021-01-04")),
            Err(LoaderError::Configuration(_))
        ));
        // The rejected range leaves the old one in place.
        assert_eq!(loader.start_date(), NaiveDate::from_ymd_opt(2021, 1, 4).unwrap());
        assert_eq!(loader.end_date(), NaiveDate::from_ymd_opt(2021, 1, 8));
        assert!(loader.set_date(Some("2021-01-06"), Some("2021-01-06")).is_ok());
    }

    #[test]
    fn universe_none_keeps_every_instrument() {
        let mut loader = offline("2021-01-04", None);
        loader.set_universe(None);
        let table = loader.get_data("close", true).unwrap();
        assert_eq!(table.as_single().unwrap().instruments.len(), 6);
    }

    #[test]
    fn json_field_requests() {
        assert_eq!(
            FieldRequest::try_from(json!("close")).unwrap(),
            FieldRequest::Single("close".into())
        );
        assert_eq!(
            FieldRequest::try_from(json!(["close", "per"])).unwrap().mode(),
            RequestMode::Multi
        );
        for bad in [json!(42), json!({"field": "close"}), json!(["close", 1]), json!(null)] {
            assert!(matches!(
                FieldRequest::try_from(bad),
                Err(LoaderError::InvalidFieldArgument(_))
            ));
        }
    }

    #[test]
    fn empty_list_is_rejected() {
        let mut loader = offline("2021-01-04", None);
        assert!(matches!(
            loader.get_data(Vec::<String>::new(), true),
            Err(LoaderError::InvalidFieldArgument(_))
        ));
    }

    #[test]
    fn display_shows_configuration() {
        let loader = offline("2021-01-01", Some("2021-01-05"));
        let text = loader.to_string();
        assert!(text.contains("- source: pykrx"));
        assert!(text.contains("- end_date: 2021-01-05"));
        assert!(text.contains("- universe: [005930]"));
        assert!(text.ends_with("- state: configured"));
    }
}
