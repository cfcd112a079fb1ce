//! Field registry: which data family supplies which field.
//!
//! Each family of a source declares a closed set of fields. The registry is
//! built once from plain [`FamilySpec`] records and passed explicitly to
//! whatever needs to resolve field requests.

use crate::error::{LoaderError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

/// Supported upstream data sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// KRX data portal (the data behind `pykrx`).
    Krx,
    FinanceDataReader,
    OpenDart,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::Krx, Source::FinanceDataReader, Source::OpenDart];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Krx => "pykrx",
            Source::FinanceDataReader => "fdr",
            Source::OpenDart => "opendartreader",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = LoaderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pykrx" | "krx" => Ok(Source::Krx),
            "fdr" | "financedatareader" => Ok(Source::FinanceDataReader),
            "opendartreader" | "opendart" => Ok(Source::OpenDart),
            _ => Err(LoaderError::UnsupportedSource(s.to_string())),
        }
    }
}

/// A category of fetchable data sharing one provider call shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    Ohlcv,
    MarketCap,
    Fundamental,
}

impl Family {
    pub fn as_str(&self) -> &'static str {
        match self {
            Family::Ohlcv => "ohlcv",
            Family::MarketCap => "market_cap",
            Family::Fundamental => "fundamental",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observable quantity a family can supply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Canonical field name used throughout the pipeline.
    pub name: String,
    /// Provider-native label (Korean column name on the KRX portal).
    pub label: String,
    pub description: String,
}

impl FieldSpec {
    pub fn new(name: &str, label: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            description: description.to_string(),
        }
    }
}

/// The fields declared by one family of one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilySpec {
    pub source: Source,
    pub family: Family,
    pub fields: Vec<FieldSpec>,
}

impl FamilySpec {
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }
}

/// What to do when two families of one source declare the same field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Refuse to build the registry.
    #[default]
    Reject,
    /// The family registered last owns the field.
    LastWins,
}

/// Which families [`FieldRegistry::available_fields`] should cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FamilyScope {
    Family(Source, Family),
    Source(Source),
    All,
}

/// Family → requested fields it supplies.
pub type Resolution = BTreeMap<Family, Vec<String>>;

/// Static table of family specs plus the derived field index.
#[derive(Debug, Clone)]
pub struct FieldRegistry {
    specs: Vec<FamilySpec>,
    /// (source, canonical name or label) → (family, canonical name)
    index: HashMap<(Source, String), (Family, String)>,
}

impl FieldRegistry {
    /// Build the registry, indexing every field by name and by label.
    pub fn new(specs: Vec<FamilySpec>, policy: ConflictPolicy) -> Result<Self> {
        let mut index: HashMap<(Source, String), (Family, String)> = HashMap::new();

        for spec in &specs {
            for field in &spec.fields {
                let entry = (spec.family, field.name.clone());
                let mut keys = vec![field.name.clone()];
                if field.label != field.name {
                    keys.push(field.label.clone());
                }
                // Names and labels share one namespace per source.
                for key in keys {
                    let key = (spec.source, key);
                    if let Some(existing) = index.get(&key) {
                        if *existing != entry && policy == ConflictPolicy::Reject {
                            return Err(LoaderError::FieldConflict {
                                field: key.1,
                                first: existing.0,
                                second: spec.family,
                            });
                        }
                    }
                    index.insert(key, entry.clone());
                }
            }
        }

        Ok(Self { specs, index })
    }

    /// The built-in catalog of every supported source.
    pub fn builtin(policy: ConflictPolicy) -> Result<Self> {
        Self::new(builtin_specs(), policy)
    }

    pub fn specs(&self) -> &[FamilySpec] {
        &self.specs
    }

    pub fn family_spec(&self, source: Source, family: Family) -> Option<&FamilySpec> {
        self.specs
            .iter()
            .rev()
            .find(|s| s.source == source && s.family == family)
    }

    /// Canonical field names available within `scope`, in declaration order.
    pub fn available_fields(&self, scope: FamilyScope) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut fields = Vec::new();
        for spec in &self.specs {
            let in_scope = match scope {
                FamilyScope::Family(source, family) => {
                    spec.source == source && spec.family == family
                }
                FamilyScope::Source(source) => spec.source == source,
                FamilyScope::All => true,
            };
            if !in_scope {
                continue;
            }
            for field in &spec.fields {
                if seen.insert(field.name.clone()) {
                    fields.push(field.name.clone());
                }
            }
        }
        fields
    }

    /// Map each requested field (name or label) to its canonical name.
    pub fn canonical_name(&self, source: Source, field: &str) -> Option<&str> {
        self.index
            .get(&(source, field.to_string()))
            .map(|(_, name)| name.as_str())
    }

    /// Group requested fields by the family that supplies them.
    ///
    /// Every requested field appears in exactly one group, under its
    /// canonical name. Fails on the first field the source does not declare.
    pub fn resolve<S: AsRef<str>>(&self, source: Source, requested: &[S]) -> Result<Resolution> {
        let mut resolution: Resolution = BTreeMap::new();
        for field in requested {
            let field = field.as_ref();
            let (family, name) = self
                .index
                .get(&(source, field.to_string()))
                .ok_or_else(|| LoaderError::UnavailableField {
                    field: field.to_string(),
                    origin: source,
                })?;
            let group = resolution.entry(*family).or_default();
            if !group.contains(name) {
                group.push(name.clone());
            }
        }
        Ok(resolution)
    }
}

/// Family specs for every source the loader knows about.
///
/// FinanceDataReader and OpenDART are recognised sources without readers yet,
/// so they contribute no families.
pub fn builtin_specs() -> Vec<FamilySpec> {
    vec![
        FamilySpec {
            source: Source::Krx,
            family: Family::Ohlcv,
            fields: vec![
                FieldSpec::new("open", "시가", "opening price"),
                FieldSpec::new("high", "고가", "intraday high"),
                FieldSpec::new("low", "저가", "intraday low"),
                FieldSpec::new("close", "종가", "closing price"),
                FieldSpec::new("volume", "거래량", "shares traded"),
                FieldSpec::new("turnover", "거래대금", "traded value in KRW"),
                FieldSpec::new("change_rate", "등락률", "percent change vs previous close"),
            ],
        },
        FamilySpec {
            source: Source::Krx,
            family: Family::MarketCap,
            fields: vec![
                FieldSpec::new("market_cap", "시가총액", "market capitalisation in KRW"),
                FieldSpec::new("listed_shares", "상장주식수", "number of listed shares"),
            ],
        },
        FamilySpec {
            source: Source::Krx,
            family: Family::Fundamental,
            fields: vec![
                FieldSpec::new("bps", "BPS", "book value per share"),
                FieldSpec::new("per", "PER", "price to earnings ratio"),
                FieldSpec::new("pbr", "PBR", "price to book ratio"),
                FieldSpec::new("eps", "EPS", "earnings per share"),
                FieldSpec::new("div_yield", "DIV", "dividend yield"),
                FieldSpec::new("dps", "DPS", "dividend per share"),
            ],
        },
    ]
}
