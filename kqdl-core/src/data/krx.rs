//! KRX data portal provider.
//!
//! Fetches all-instrument daily snapshots from the JSON endpoint behind the
//! portal's statistics pages (the same data `pykrx` scrapes). Handles rate
//! limiting, retries with exponential backoff, response parsing, and the
//! circuit breaker.
//!
//! The portal is unofficial and changes column names without notice; every
//! parse failure is reported as [`DataError::ResponseFormatChanged`].

use super::circuit_breaker::CircuitBreaker;
use super::provider::{DataError, SnapshotProvider};
use super::table::{InstrumentId, WideSnapshot};
use crate::config::KrxConfig;
use crate::registry::{Family, Source};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// All-instrument daily prices, market cap and listed shares.
const BLD_DAILY_PRICES: &str = "dbms/MDC/STAT/standard/MDCSTAT01501";
/// All-instrument PER/PBR/dividend table.
const BLD_FUNDAMENTALS: &str = "dbms/MDC/STAT/standard/MDCSTAT03501";
/// Daily index series; its dates are the trading calendar.
const BLD_INDEX_SERIES: &str = "dbms/MDC/STAT/standard/MDCSTAT00301";

/// Longest wait between two attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize)]
struct PortalResponse<T> {
    #[serde(rename = "OutBlock_1", alias = "output", default = "Vec::new")]
    rows: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct PriceRow {
    #[serde(rename = "ISU_SRT_CD")]
    ticker: String,
    #[serde(rename = "TDD_OPNPRC", default)]
    open: Option<String>,
    #[serde(rename = "TDD_HGPRC", default)]
    high: Option<String>,
    #[serde(rename = "TDD_LWPRC", default)]
    low: Option<String>,
    #[serde(rename = "TDD_CLSPRC", default)]
    close: Option<String>,
    #[serde(rename = "ACC_TRDVOL", default)]
    volume: Option<String>,
    #[serde(rename = "ACC_TRDVAL", default)]
    turnover: Option<String>,
    #[serde(rename = "FLUC_RT", default)]
    change_rate: Option<String>,
    #[serde(rename = "MKTCAP", default)]
    market_cap: Option<String>,
    #[serde(rename = "LIST_SHRS", default)]
    listed_shares: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FundamentalRow {
    #[serde(rename = "ISU_SRT_CD")]
    ticker: String,
    #[serde(rename = "BPS", default)]
    bps: Option<String>,
    #[serde(rename = "PER", default)]
    per: Option<String>,
    #[serde(rename = "PBR", default)]
    pbr: Option<String>,
    #[serde(rename = "EPS", default)]
    eps: Option<String>,
    #[serde(rename = "DVD_YLD", default)]
    div_yield: Option<String>,
    #[serde(rename = "DPS", default)]
    dps: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IndexRow {
    #[serde(rename = "TRD_DD")]
    date: String,
}

/// KRX data portal provider.
pub struct KrxProvider {
    client: reqwest::blocking::Client,
    base_url: String,
    circuit_breaker: Arc<CircuitBreaker>,
    max_retries: u32,
    base_delay: Duration,
}

impl KrxProvider {
    pub fn new(config: &KrxConfig) -> Result<Self, DataError> {
        let mut builder = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36");
        // Local mirrors and stubs are reached directly, never through a proxy.
        if is_loopback(&config.base_url) {
            builder = builder.no_proxy();
        }
        let client = builder
            .build()
            .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            circuit_breaker: Arc::new(CircuitBreaker::new(
                Duration::from_secs(config.breaker_cooldown_secs),
                config.breaker_failure_threshold,
            )),
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/comm/bldAttendant/getJsonData.cmd", self.base_url)
    }

    /// POST one `bld` query with retry and circuit breaker logic.
    fn post_with_retry<T: DeserializeOwned>(
        &self,
        bld: &str,
        params: &[(&str, &str)],
    ) -> Result<Vec<T>, DataError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(DataError::CircuitBreakerTripped);
        }

        let mut form: Vec<(&str, &str)> = vec![("bld", bld), ("locale", "ko_KR")];
        form.extend_from_slice(params);

        let url = self.endpoint();
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = backoff_delay(self.base_delay, attempt);
                tracing::debug!(bld, attempt, ?delay, "retrying KRX request");
                std::thread::sleep(delay);
            }

            if !self.circuit_breaker.is_allowed() {
                return Err(DataError::CircuitBreakerTripped);
            }

            let sent = self
                .client
                .post(&url)
                .header(
                    "Referer",
                    format!("{}/contents/MDC/MDI/mdiLoader", self.base_url),
                )
                .form(&form)
                .send();

            match sent {
                Ok(resp) => {
                    let status = resp.status();

                    if status == reqwest::StatusCode::FORBIDDEN {
                        self.circuit_breaker.trip();
                        return Err(DataError::CircuitBreakerTripped);
                    }

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        self.circuit_breaker.record_failure();
                        let retry_after = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(60);
                        last_error = Some(DataError::RateLimited {
                            retry_after_secs: retry_after,
                        });
                        continue;
                    }

                    if !status.is_success() {
                        self.circuit_breaker.record_failure();
                        last_error = Some(DataError::Other(format!("HTTP {status} for {bld}")));
                        continue;
                    }

                    let body: PortalResponse<T> = resp.json().map_err(|e| {
                        DataError::ResponseFormatChanged(format!("{bld}: {e}"))
                    })?;
                    self.circuit_breaker.record_success();
                    return Ok(body.rows);
                }
                Err(e) => {
                    if e.is_connect() || e.is_timeout() {
                        self.circuit_breaker.record_failure();
                        last_error = Some(DataError::NetworkUnreachable(e.to_string()));
                        continue;
                    }
                    return Err(DataError::NetworkUnreachable(e.to_string()));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| DataError::Other("max retries exceeded".into())))
    }

    fn price_snapshot(&self, family: Family, date: NaiveDate) -> Result<WideSnapshot, DataError> {
        let trd_dd = date.format("%Y%m%d").to_string();
        let rows: Vec<PriceRow> = self.post_with_retry(
            BLD_DAILY_PRICES,
            &[
                ("mktId", "ALL"),
                ("trdDd", &trd_dd),
                ("share", "1"),
                ("money", "1"),
                ("csvxls_isNo", "false"),
            ],
        )?;

        let fields: &[&str] = match family {
            Family::Ohlcv => &[
                "open",
                "high",
                "low",
                "close",
                "volume",
                "turnover",
                "change_rate",
            ],
            _ => &["market_cap", "listed_shares"],
        };
        let mut snapshot = WideSnapshot::new(date, fields.iter().map(|f| f.to_string()).collect());

        for row in rows {
            let values = match family {
                Family::Ohlcv => vec![
                    parse_number(&row.open),
                    parse_number(&row.high),
                    parse_number(&row.low),
                    parse_number(&row.close),
                    parse_number(&row.volume),
                    parse_number(&row.turnover),
                    parse_number(&row.change_rate),
                ],
                _ => vec![
                    parse_number(&row.market_cap),
                    parse_number(&row.listed_shares),
                ],
            };
            // A suspended or not-yet-listed ticker comes back with every cell blank.
            if values.iter().all(Option::is_none) {
                continue;
            }
            snapshot.push_row(InstrumentId::new(&row.ticker), values);
        }

        Ok(snapshot)
    }

    fn fundamental_snapshot(&self, date: NaiveDate) -> Result<WideSnapshot, DataError> {
        let trd_dd = date.format("%Y%m%d").to_string();
        let rows: Vec<FundamentalRow> = self.post_with_retry(
            BLD_FUNDAMENTALS,
            &[("searchType", "1"), ("mktId", "ALL"), ("trdDd", &trd_dd)],
        )?;

        let mut snapshot = WideSnapshot::new(
            date,
            ["bps", "per", "pbr", "eps", "div_yield", "dps"]
                .iter()
                .map(|f| f.to_string())
                .collect(),
        );
        for row in rows {
            let values = vec![
                parse_number(&row.bps),
                parse_number(&row.per),
                parse_number(&row.pbr),
                parse_number(&row.eps),
                parse_number(&row.div_yield),
                parse_number(&row.dps),
            ];
            if values.iter().all(Option::is_none) {
                continue;
            }
            snapshot.push_row(InstrumentId::new(&row.ticker), values);
        }
        Ok(snapshot)
    }
}

impl SnapshotProvider for KrxProvider {
    fn name(&self) -> &str {
        "krx_data_portal"
    }

    fn source(&self) -> Source {
        Source::Krx
    }

    fn fetch_snapshot(&self, family: Family, date: NaiveDate) -> Result<WideSnapshot, DataError> {
        let snapshot = match family {
            Family::Ohlcv | Family::MarketCap => self.price_snapshot(family, date)?,
            Family::Fundamental => self.fundamental_snapshot(date)?,
        };
        tracing::debug!(%family, %date, rows = snapshot.rows.len(), "KRX snapshot fetched");
        Ok(snapshot)
    }

    fn trading_days(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>, DataError> {
        let strt_dd = start.format("%Y%m%d").to_string();
        let end_dd = end.format("%Y%m%d").to_string();
        // KOSPI composite: it trades on every KRX session.
        let rows: Vec<IndexRow> = self.post_with_retry(
            BLD_INDEX_SERIES,
            &[
                ("indIdx", "1"),
                ("indIdx2", "001"),
                ("strtDd", &strt_dd),
                ("endDd", &end_dd),
            ],
        )?;

        let mut days = rows
            .iter()
            .map(|r| parse_portal_date(&r.date))
            .collect::<Result<Vec<_>, _>>()?;
        days.sort();
        days.dedup();
        Ok(days)
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}

fn is_loopback(base_url: &str) -> bool {
    let host = base_url
        .split("://")
        .nth(1)
        .unwrap_or(base_url)
        .split(['/', ':'])
        .next()
        .unwrap_or_default();
    host == "localhost" || host == "127.0.0.1"
}

/// Delay before retry `attempt` (1-based): `base * 2^(attempt - 1)`, capped
/// at [`MAX_BACKOFF`].
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(MAX_BACKOFF).min(MAX_BACKOFF)
}

/// Parse a portal number cell (`"1,234.5"`, `"-"`, `""`).
fn parse_number(cell: &Option<String>) -> Option<f64> {
    let cleaned = cell.as_ref()?.replace(',', "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "-" {
        return None;
    }
    cleaned.parse().ok()
}

/// Portal dates come as `YYYY/MM/DD`.
fn parse_portal_date(raw: &str) -> Result<NaiveDate, DataError> {
    NaiveDate::parse_from_str(raw, "%Y/%m/%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y%m%d"))
        .map_err(|_| DataError::ResponseFormatChanged(format!("unexpected date '{raw}'")))
}
