//! Ingestion data model
//!
//! - [`IngestionWindow`]: what to fetch
//! - [`RawMarketRow`] / [`ReferenceRow`]: provider-native rows, discarded after normalization
//! - [`CanonicalRecord`]: the persisted unit, unique on `(time, symbol)`

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::ContinuousSymbol;

/// OHLCV bar schema requested from the provider.
///
/// Each schema is persisted to its own table (`ohlcv_1d` for daily bars).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BarSchema {
    #[serde(rename = "ohlcv-1s")]
    Ohlcv1s,
    #[serde(rename = "ohlcv-1m")]
    Ohlcv1m,
    #[serde(rename = "ohlcv-1h")]
    Ohlcv1h,
    #[default]
    #[serde(rename = "ohlcv-1d")]
    Ohlcv1d,
}

impl BarSchema {
    /// Provider schema name
    pub fn as_str(&self) -> &'static str {
        match self {
            BarSchema::Ohlcv1s => "ohlcv-1s",
            BarSchema::Ohlcv1m => "ohlcv-1m",
            BarSchema::Ohlcv1h => "ohlcv-1h",
            BarSchema::Ohlcv1d => "ohlcv-1d",
        }
    }

    /// Table name inside the storage namespace
    pub fn table_name(&self) -> &'static str {
        match self {
            BarSchema::Ohlcv1s => "ohlcv_1s",
            BarSchema::Ohlcv1m => "ohlcv_1m",
            BarSchema::Ohlcv1h => "ohlcv_1h",
            BarSchema::Ohlcv1d => "ohlcv_1d",
        }
    }
}

impl fmt::Display for BarSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BarSchema {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ohlcv-1s" => Ok(BarSchema::Ohlcv1s),
            "ohlcv-1m" => Ok(BarSchema::Ohlcv1m),
            "ohlcv-1h" => Ok(BarSchema::Ohlcv1h),
            "ohlcv-1d" => Ok(BarSchema::Ohlcv1d),
            other => Err(format!(
                "unsupported schema '{}', expected one of ohlcv-1s, ohlcv-1m, ohlcv-1h, ohlcv-1d",
                other
            )),
        }
    }
}

/// Input symbology of a request. The provider accepts one per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbology {
    /// `ROOT.RULE.RANK` continuous symbols, resolved through reference data
    Continuous,
    /// Provider-native symbols stored as-is
    RawSymbol,
}

impl Symbology {
    /// Provider `stype_in` value
    pub fn as_stype(&self) -> &'static str {
        match self {
            Symbology::Continuous => "continuous",
            Symbology::RawSymbol => "raw_symbol",
        }
    }
}

/// Reasons a window is rejected before any network call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WindowError {
    #[error("symbol set is empty")]
    NoSymbols,

    #[error("dataset is empty")]
    NoDataset,

    #[error("start {start} is after end {end}")]
    InvertedRange { start: NaiveDate, end: NaiveDate },

    #[error("cannot mix continuous and raw symbols in one request: {0:?}")]
    MixedSymbology(Vec<String>),
}

/// Request descriptor for one fetch.
///
/// `start` and `end` are both inclusive calendar dates. The provider's range end is
/// exclusive, so [`IngestionWindow::provider_end`] adds one day at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionWindow {
    pub symbols: Vec<String>,
    pub dataset: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    #[serde(default)]
    pub schema: BarSchema,
}

impl IngestionWindow {
    pub fn new(
        symbols: Vec<String>,
        dataset: impl Into<String>,
        start: NaiveDate,
        end: NaiveDate,
        schema: BarSchema,
    ) -> Self {
        Self {
            symbols,
            dataset: dataset.into(),
            start,
            end,
            schema,
        }
    }

    /// Daily bars for a set of symbols
    pub fn daily(symbols: &[&str], dataset: &str, start: NaiveDate, end: NaiveDate) -> Self {
        Self::new(
            symbols.iter().map(|s| s.to_string()).collect(),
            dataset,
            start,
            end,
            BarSchema::Ohlcv1d,
        )
    }

    /// Check the input constraints and return the request's symbology.
    pub fn validate(&self) -> Result<Symbology, WindowError> {
        if self.symbols.is_empty() {
            return Err(WindowError::NoSymbols);
        }
        if self.dataset.trim().is_empty() {
            return Err(WindowError::NoDataset);
        }
        if self.start > self.end {
            return Err(WindowError::InvertedRange {
                start: self.start,
                end: self.end,
            });
        }

        let continuous = self
            .symbols
            .iter()
            .filter(|s| ContinuousSymbol::is_continuous(s))
            .count();

        match continuous {
            0 => Ok(Symbology::RawSymbol),
            n if n == self.symbols.len() => Ok(Symbology::Continuous),
            _ => Err(WindowError::MixedSymbology(self.symbols.clone())),
        }
    }

    /// Exclusive end date passed to the provider
    pub fn provider_end(&self) -> NaiveDate {
        self.end + Duration::days(1)
    }

    /// Whether a calendar date falls inside the window
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// One window per symbol, sharing dataset, range and schema
    pub fn split_by_symbol(&self) -> Vec<IngestionWindow> {
        self.symbols
            .iter()
            .map(|s| IngestionWindow {
                symbols: vec![s.clone()],
                ..self.clone()
            })
            .collect()
    }
}

impl fmt::Display for IngestionWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}..={}",
            self.dataset, self.schema, self.start, self.end
        )
    }
}

/// Provider timestamp as delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderTimestamp {
    /// Nanoseconds since the UNIX epoch (absolute, UTC)
    UnixNanos(i64),
    /// Wall-clock time in the provider's documented source timezone
    Naive(NaiveDateTime),
}

impl ProviderTimestamp {
    /// Calendar date in the provider's own frame
    pub fn date(&self) -> NaiveDate {
        match self {
            ProviderTimestamp::UnixNanos(nanos) => {
                DateTime::from_timestamp_nanos(*nanos).date_naive()
            }
            ProviderTimestamp::Naive(ts) => ts.date(),
        }
    }
}

/// One provider-native OHLCV observation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMarketRow {
    pub ts: ProviderTimestamp,
    /// Provider instrument identifier
    pub instrument_id: u32,
    /// Provider-native symbol, when the provider can attribute one
    pub symbol: Option<String>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl RawMarketRow {
    /// Calendar date used to join against reference data
    pub fn date(&self) -> NaiveDate {
        self.ts.date()
    }
}

/// One day's contract definition backing a continuous symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReferenceRow {
    pub date: NaiveDate,
    pub instrument_id: u32,
    /// Underlying contract (e.g., "ESH4")
    pub contract: String,
    /// Continuous symbol it backs (e.g., "ES.c.0")
    pub continuous_symbol: String,
}

/// Persisted OHLCV record, unique on `(time, symbol)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub time: DateTime<Utc>,
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl CanonicalRecord {
    /// Natural key
    pub fn key(&self) -> (DateTime<Utc>, &str) {
        (self.time, self.symbol.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// Daily window over January 2024
    fn january(symbols: &[&str]) -> IngestionWindow {
        IngestionWindow::daily(symbols, "GLBX.MDP3", date(2024, 1, 1), date(2024, 1, 31))
    }

    #[test]
    fn test_validate_symbology() {
        let window = january(&["ES.c.0", "NQ.c.0"]);
        assert_eq!(window.validate(), Ok(Symbology::Continuous));

        let window = january(&["ESH4"]);
        assert_eq!(window.validate(), Ok(Symbology::RawSymbol));

        let window = january(&["ES.c.0", "ESH4"]);
        assert!(matches!(window.validate(), Err(WindowError::MixedSymbology(_))));
    }

    #[test]
    fn test_validate_constraints() {
        let window = january(&[]);
        assert_eq!(window.validate(), Err(WindowError::NoSymbols));

        let window = IngestionWindow::daily(&["ES"], " ", date(2024, 1, 1), date(2024, 1, 31));
        assert_eq!(window.validate(), Err(WindowError::NoDataset));

        let window =
            IngestionWindow::daily(&["ES"], "GLBX.MDP3", date(2024, 2, 1), date(2024, 1, 31));
        assert!(matches!(window.validate(), Err(WindowError::InvertedRange { .. })));

        // Single-day window is valid
        let window =
            IngestionWindow::daily(&["ES"], "GLBX.MDP3", date(2024, 1, 2), date(2024, 1, 2));
        assert!(window.validate().is_ok());
    }

    #[test]
    fn test_provider_end_is_exclusive() {
        let window = january(&["ES.c.0"]);
        assert_eq!(window.provider_end(), date(2024, 2, 1));
        assert!(window.contains(date(2024, 1, 31)));
        assert!(!window.contains(date(2024, 2, 1)));
    }

    #[test]
    fn test_split_by_symbol() {
        let window = january(&["ES.c.0", "NQ.c.0"]);
        let split = window.split_by_symbol();
        assert_eq!(split.len(), 2);
        assert_eq!(split[1].symbols, vec!["NQ.c.0".to_string()]);
        assert_eq!(split[1].dataset, "GLBX.MDP3");
    }

    #[test]
    fn test_schema_parse() {
        assert_eq!("ohlcv-1d".parse::<BarSchema>(), Ok(BarSchema::Ohlcv1d));
        assert_eq!(BarSchema::Ohlcv1h.table_name(), "ohlcv_1h");
        assert!("ohlcv".parse::<BarSchema>().is_err());
    }

    #[test]
    fn test_timestamp_date() {
        // 2024-01-02 00:00:00 UTC
        let ts = ProviderTimestamp::UnixNanos(1_704_153_600_000_000_000);
        assert_eq!(ts.date(), date(2024, 1, 2));

        let naive = date(2024, 1, 2).and_hms_opt(17, 0, 0).unwrap();
        assert_eq!(ProviderTimestamp::Naive(naive).date(), date(2024, 1, 2));
    }
}
