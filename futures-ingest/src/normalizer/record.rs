//! Canonical record normalizer implementation

use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::warn;

use crate::config::IngestSettings;
use crate::resolver::ResolvedRow;
use crate::schema::{CanonicalRecord, ProviderTimestamp, RawMarketRow};

/// Reasons a row is excluded during normalization
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Stored symbol is empty
    EmptySymbol,
    /// Price is NaN or infinite
    NonFinitePrice { field: &'static str, value: f64 },
    /// High below low
    HighBelowLow { high: f64, low: f64 },
    /// High below open
    HighBelowOpen { high: f64, open: f64 },
    /// High below close
    HighBelowClose { high: f64, close: f64 },
    /// Low above open
    LowAboveOpen { low: f64, open: f64 },
    /// Low above close
    LowAboveClose { low: f64, close: f64 },
    /// Volume is negative
    NegativeVolume { volume: i64 },
    /// Volume does not fit the persisted column
    VolumeOverflow { volume: i64 },
    /// Local time skipped by a DST transition
    NonexistentLocalTime { timestamp: NaiveDateTime, timezone: Tz },
    /// Local time repeated by a DST transition
    AmbiguousLocalTime { timestamp: NaiveDateTime, timezone: Tz },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::EmptySymbol => write!(f, "Symbol cannot be empty"),
            ValidationError::NonFinitePrice { field, value } => {
                write!(f, "{} price is not finite: {}", field, value)
            }
            ValidationError::HighBelowLow { high, low } => {
                write!(f, "High {} is below low {}", high, low)
            }
            ValidationError::HighBelowOpen { high, open } => {
                write!(f, "High {} is below open {}", high, open)
            }
            ValidationError::HighBelowClose { high, close } => {
                write!(f, "High {} is below close {}", high, close)
            }
            ValidationError::LowAboveOpen { low, open } => {
                write!(f, "Low {} is above open {}", low, open)
            }
            ValidationError::LowAboveClose { low, close } => {
                write!(f, "Low {} is above close {}", low, close)
            }
            ValidationError::NegativeVolume { volume } => {
                write!(f, "Volume must not be negative, got: {}", volume)
            }
            ValidationError::VolumeOverflow { volume } => {
                write!(f, "Volume {} exceeds the 32-bit volume column", volume)
            }
            ValidationError::NonexistentLocalTime {
                timestamp,
                timezone,
            } => {
                write!(f, "Local time {} does not exist in {}", timestamp, timezone)
            }
            ValidationError::AmbiguousLocalTime {
                timestamp,
                timezone,
            } => {
                write!(f, "Local time {} is ambiguous in {}", timestamp, timezone)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Normalizer configuration
#[derive(Debug, Clone, Copy)]
pub struct NormalizerConfig {
    /// Zone naive provider timestamps are expressed in
    pub source_timezone: Tz,
    /// Decimal places kept on prices
    pub price_decimals: u32,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            source_timezone: Tz::UTC,
            price_decimals: 2,
        }
    }
}

impl NormalizerConfig {
    /// Build from ingest settings; fails on an unknown timezone name
    pub fn from_settings(settings: &IngestSettings) -> Result<Self, String> {
        let source_timezone = settings
            .source_timezone
            .parse::<Tz>()
            .map_err(|e| format!("invalid source timezone '{}': {}", settings.source_timezone, e))?;
        Ok(Self {
            source_timezone,
            price_decimals: settings.price_decimals,
        })
    }
}

/// Rows excluded during a batch normalization
#[derive(Debug, Clone, Default)]
pub struct NormalizeReport {
    pub accepted: usize,
    pub rejected: usize,
    pub errors: Vec<(String, ValidationError)>,
}

/// Converts resolved provider rows into canonical records.
#[derive(Debug, Clone, Default)]
pub struct RecordNormalizer {
    config: NormalizerConfig,
}

impl RecordNormalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// Normalize one row under `symbol`.
    ///
    /// The consistency checks run on the provider's values. Rounding is monotone, so a
    /// bar that passes them still passes after rounding.
    pub fn normalize(
        &self,
        raw: &RawMarketRow,
        symbol: &str,
    ) -> ValidationResult<CanonicalRecord> {
        if symbol.trim().is_empty() {
            return Err(ValidationError::EmptySymbol);
        }

        for (field, value) in [
            ("open", raw.open),
            ("high", raw.high),
            ("low", raw.low),
            ("close", raw.close),
        ] {
            if !value.is_finite() {
                return Err(ValidationError::NonFinitePrice { field, value });
            }
        }

        if raw.high < raw.low {
            return Err(ValidationError::HighBelowLow {
                high: raw.high,
                low: raw.low,
            });
        }
        if raw.high < raw.open {
            return Err(ValidationError::HighBelowOpen {
                high: raw.high,
                open: raw.open,
            });
        }
        if raw.high < raw.close {
            return Err(ValidationError::HighBelowClose {
                high: raw.high,
                close: raw.close,
            });
        }
        if raw.low > raw.open {
            return Err(ValidationError::LowAboveOpen {
                low: raw.low,
                open: raw.open,
            });
        }
        if raw.low > raw.close {
            return Err(ValidationError::LowAboveClose {
                low: raw.low,
                close: raw.close,
            });
        }

        if raw.volume < 0 {
            return Err(ValidationError::NegativeVolume { volume: raw.volume });
        }
        if i32::try_from(raw.volume).is_err() {
            return Err(ValidationError::VolumeOverflow { volume: raw.volume });
        }

        Ok(CanonicalRecord {
            time: self.to_utc(raw.ts)?,
            symbol: symbol.to_string(),
            open: self.round_price("open", raw.open)?,
            high: self.round_price("high", raw.high)?,
            low: self.round_price("low", raw.low)?,
            close: self.round_price("close", raw.close)?,
            volume: raw.volume,
        })
    }

    /// Normalize resolved rows, excluding and logging the ones that fail.
    pub fn normalize_batch(
        &self,
        rows: &[ResolvedRow],
    ) -> (Vec<CanonicalRecord>, NormalizeReport) {
        let mut report = NormalizeReport::default();
        let mut records = Vec::with_capacity(rows.len());

        for resolved in rows {
            match self.normalize(&resolved.row, &resolved.symbol) {
                Ok(record) => {
                    report.accepted += 1;
                    records.push(record);
                }
                Err(e) => {
                    warn!(
                        "Rejected {} ({}) bar for {}: {}",
                        resolved.symbol,
                        resolved.contract,
                        resolved.row.date(),
                        e
                    );
                    report.rejected += 1;
                    report.errors.push((resolved.symbol.clone(), e));
                }
            }
        }

        (records, report)
    }

    /// Convert a provider timestamp to UTC.
    pub fn to_utc(&self, ts: ProviderTimestamp) -> ValidationResult<DateTime<Utc>> {
        match ts {
            ProviderTimestamp::UnixNanos(nanos) => Ok(DateTime::from_timestamp_nanos(nanos)),
            ProviderTimestamp::Naive(naive) => {
                let tz = self.config.source_timezone;
                match tz.from_local_datetime(&naive) {
                    LocalResult::Single(local) => Ok(local.with_timezone(&Utc)),
                    LocalResult::Ambiguous(_, _) => Err(ValidationError::AmbiguousLocalTime {
                        timestamp: naive,
                        timezone: tz,
                    }),
                    LocalResult::None => Err(ValidationError::NonexistentLocalTime {
                        timestamp: naive,
                        timezone: tz,
                    }),
                }
            }
        }
    }

    fn round_price(&self, field: &'static str, value: f64) -> ValidationResult<f64> {
        round_to(value, self.config.price_decimals)
            .ok_or(ValidationError::NonFinitePrice { field, value })
    }
}

/// Round half away from zero at `decimals` places, going through `Decimal` so that
/// exact binary midpoints such as 4700.125 round up.
pub fn round_to(value: f64, decimals: u32) -> Option<f64> {
    Decimal::from_f64(value)?
        .round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero)
        .to_f64()
}
