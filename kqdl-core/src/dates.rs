//! Calendar-day utilities over `YYYY-MM-DD` date strings.
//!
//! Every date crossing the public API is a `YYYY-MM-DD` string; internally
//! dates are `chrono::NaiveDate`. Ranges here are calendar ranges. Trading-day
//! filtering is done by intersecting with a provider's trading calendar (see
//! [`crate::data::provider::SnapshotProvider::trading_days`]).

use crate::error::{LoaderError, Result};
use chrono::{Duration, NaiveDate, Utc};

/// The only accepted date layout.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse a `YYYY-MM-DD` string into a date.
///
/// `NaiveDate::parse_from_str` tolerates unpadded fields (`2021-1-5`), so the
/// shape is checked first.
pub fn parse_date(date: &str) -> Result<NaiveDate> {
    let bytes = date.as_bytes();
    let well_shaped = bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit());
    if !well_shaped {
        return Err(LoaderError::Format(date.to_string()));
    }
    NaiveDate::parse_from_str(date, DATE_FORMAT).map_err(|_| LoaderError::Format(date.to_string()))
}

/// Render a date as `YYYY-MM-DD`.
pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Fail with [`LoaderError::Format`] unless `date` is a real `YYYY-MM-DD` day.
pub fn validate_date(date: &str) -> Result<()> {
    parse_date(date).map(|_| ())
}

/// Every calendar date from `start` to `end`, ascending.
///
/// With `inclusive` the end bound is part of the range. An inverted range is
/// empty.
pub fn get_daterange(start: &str, end: &str, inclusive: bool) -> Result<Vec<String>> {
    let start = parse_date(start)?;
    let end = parse_date(end)?;
    Ok(calendar_days(start, end, inclusive)
        .into_iter()
        .map(format_date)
        .collect())
}

/// Same as [`get_daterange`] over already-parsed dates.
pub fn calendar_days(start: NaiveDate, end: NaiveDate, inclusive: bool) -> Vec<NaiveDate> {
    let stop = if inclusive { end + Duration::days(1) } else { end };
    let mut days = Vec::new();
    let mut current = start;
    while current < stop {
        days.push(current);
        current += Duration::days(1);
    }
    days
}

/// Reinterpret an integer `YYYYMMDD` as a date string.
pub fn intdate_to_strdate(intdate: i64) -> Result<String> {
    let digits = intdate.to_string();
    if digits.len() != 8 {
        return Err(LoaderError::Format(digits));
    }
    let strdt = format!("{}-{}-{}", &digits[..4], &digits[4..6], &digits[6..]);
    validate_date(&strdt)?;
    Ok(strdt)
}

/// Inverse of [`intdate_to_strdate`].
pub fn strdt_to_intdate(date: &str) -> Result<i64> {
    let parsed = parse_date(date)?;
    parsed
        .format("%Y%m%d")
        .to_string()
        .parse()
        .map_err(|_| LoaderError::Format(date.to_string()))
}

/// Today on the exchange's clock (KST, UTC+9).
pub fn market_today() -> NaiveDate {
    (Utc::now() + Duration::hours(9)).date_naive()
}

/// The date `days` calendar days after `date` (negative goes back).
pub fn add_strdt(date: &str, days: i64) -> Result<String> {
    let parsed = parse_date(date)?;
    Duration::try_days(days)
        .and_then(|delta| parsed.checked_add_signed(delta))
        .map(format_date)
        .ok_or_else(|| LoaderError::Format(format!("{date} shifted by {days} days is out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daterange_inclusive_crosses_year_end() {
        let days = get_daterange("2021-12-25", "2022-01-05", true).unwrap();
        assert_eq!(days.len(), 12);
        assert_eq!(days.first().unwrap(), "2021-12-25");
        assert_eq!(days[7], "2022-01-01");
        assert_eq!(days.last().unwrap(), "2022-01-05");
    }

    #[test]
    fn daterange_exclusive_drops_end() {
        let days = get_daterange("2021-12-25", "2022-01-05", false).unwrap();
        assert_eq!(days.len(), 11);
        assert_eq!(days.last().unwrap(), "2022-01-04");
    }

    #[test]
    fn daterange_inverted_is_empty() {
        assert!(get_daterange("2022-01-05", "2021-12-25", true)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn daterange_rejects_malformed_bound() {
        let err = get_daterange("2021/12/25", "2022-01-05", true).unwrap_err();
        assert!(matches!(err, LoaderError::Format(_)));
    }

    #[test]
    fn validate_date_checks_calendar() {
        assert!(validate_date("2021-12-25").is_ok());
        assert!(matches!(
            validate_date("2021-13-25"),
            Err(LoaderError::Format(_))
        ));
        assert!(validate_date("2021-02-30").is_err());
        assert!(validate_date("2021-1-05").is_err());
        assert!(validate_date("20211225").is_err());
    }

    #[test]
    fn intdate_roundtrip() {
        assert_eq!(intdate_to_strdate(20211225).unwrap(), "2021-12-25");
        assert_eq!(strdt_to_intdate("2021-12-25").unwrap(), 20211225);
        assert!(intdate_to_strdate(20211325).is_err());
        assert!(intdate_to_strdate(211225).is_err());
    }

    #[test]
    fn add_strdt_both_directions() {
        assert_eq!(add_strdt("2021-12-25", 1).unwrap(), "2021-12-26");
        assert_eq!(add_strdt("2021-12-25", -1).unwrap(), "2021-12-24");
        assert_eq!(add_strdt("2021-12-31", 1).unwrap(), "2022-01-01");
    }

    #[test]
    fn add_strdt_out_of_range_is_error() {
        assert!(matches!(
            add_strdt("2021-12-25", 1_000_000_000),
            Err(LoaderError::Format(_))
        ));
        assert!(add_strdt("2021-12-25", i64::MIN).is_err());
        assert!(add_strdt("2021-12-25", i64::MAX).is_err());
    }
}
