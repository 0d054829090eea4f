//! Conversions between DBN records and pipeline types

use chrono::{Datelike, NaiveDate};
use databento::dbn::{OhlcvMsg, SType, Schema, FIXED_PRICE_SCALE, UNDEF_PRICE};
use time::{Month, OffsetDateTime};

use crate::provider::{ProviderError, ProviderResult};
use crate::schema::{BarSchema, ProviderTimestamp, RawMarketRow, Symbology};

/// Convert a fixed-point price (1e-9 scale) to `f64`. Undefined prices become NaN.
pub fn price_to_f64(value: i64) -> f64 {
    if value == UNDEF_PRICE {
        f64::NAN
    } else {
        value as f64 / FIXED_PRICE_SCALE as f64
    }
}

/// Convert a bar into a provider-native row, attributing `symbol` when known.
pub fn ohlcv_to_raw_row(msg: &OhlcvMsg, symbol: Option<String>) -> RawMarketRow {
    RawMarketRow {
        ts: ProviderTimestamp::UnixNanos(i64::try_from(msg.hd.ts_event).unwrap_or(i64::MAX)),
        instrument_id: msg.hd.instrument_id,
        symbol,
        open: price_to_f64(msg.open),
        high: price_to_f64(msg.high),
        low: price_to_f64(msg.low),
        close: price_to_f64(msg.close),
        // Out-of-range volumes are rejected by the normalizer
        volume: i64::try_from(msg.volume).unwrap_or(i64::MAX),
    }
}

pub fn schema(schema: BarSchema) -> Schema {
    match schema {
        BarSchema::Ohlcv1s => Schema::Ohlcv1S,
        BarSchema::Ohlcv1m => Schema::Ohlcv1M,
        BarSchema::Ohlcv1h => Schema::Ohlcv1H,
        BarSchema::Ohlcv1d => Schema::Ohlcv1D,
    }
}

pub fn stype(symbology: Symbology) -> SType {
    match symbology {
        Symbology::Continuous => SType::Continuous,
        Symbology::RawSymbol => SType::RawSymbol,
    }
}

pub fn to_time_date(date: NaiveDate) -> ProviderResult<time::Date> {
    let month = u8::try_from(date.month())
        .ok()
        .and_then(|m| Month::try_from(m).ok())
        .ok_or_else(|| ProviderError::InvalidRequest(format!("invalid date {}", date)))?;
    let day = u8::try_from(date.day())
        .map_err(|_| ProviderError::InvalidRequest(format!("invalid date {}", date)))?;

    time::Date::from_calendar_date(date.year(), month, day)
        .map_err(|e| ProviderError::InvalidRequest(format!("invalid date {}: {}", date, e)))
}

pub fn to_naive_date(date: time::Date) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(date.year(), u32::from(u8::from(date.month())), u32::from(date.day()))
}

/// UTC midnight of `date`
pub fn midnight_utc(date: NaiveDate) -> ProviderResult<OffsetDateTime> {
    Ok(to_time_date(date)?.midnight().assume_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use databento::dbn::{rtype, RecordHeader};

    fn bar(open: i64, volume: u64) -> OhlcvMsg {
        OhlcvMsg {
            hd: RecordHeader::new::<OhlcvMsg>(
                rtype::OHLCV_1D,
                1,
                5002,
                1_704_153_600_000_000_000,
            ),
            open,
            high: 4_710_000_000_000,
            low: 4_690_500_000_000,
            close: 4_705_250_000_000,
            volume,
        }
    }

    #[test]
    fn test_ohlcv_to_raw_row() {
        let row = ohlcv_to_raw_row(&bar(4_700_125_000_000, 1250), Some("ESH4".to_string()));

        assert_eq!(row.instrument_id, 5002);
        assert_eq!(row.ts, ProviderTimestamp::UnixNanos(1_704_153_600_000_000_000));
        assert_eq!(row.symbol.as_deref(), Some("ESH4"));
        assert!((row.open - 4700.125).abs() < 1e-9);
        assert!((row.low - 4690.5).abs() < 1e-9);
        assert_eq!(row.volume, 1250);
    }

    #[test]
    fn test_undefined_price_is_nan() {
        let row = ohlcv_to_raw_row(&bar(UNDEF_PRICE, 1), None);
        assert!(row.open.is_nan());
    }

    #[test]
    fn test_oversized_volume_saturates() {
        let row = ohlcv_to_raw_row(&bar(4_700_000_000_000, u64::MAX), None);
        assert_eq!(row.volume, i64::MAX);
    }

    #[test]
    fn test_date_conversion() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let converted = to_time_date(date).unwrap();

        assert_eq!(converted.year(), 2024);
        assert_eq!(converted.month(), Month::February);
        assert_eq!(converted.day(), 29);
        assert_eq!(to_naive_date(converted), Some(date));
        assert_eq!(midnight_utc(date).unwrap().date(), converted);
    }

    #[test]
    fn test_schema_and_stype() {
        assert_eq!(schema(BarSchema::Ohlcv1d), Schema::Ohlcv1D);
        assert_eq!(schema(BarSchema::Ohlcv1m), Schema::Ohlcv1M);
        assert_eq!(stype(Symbology::Continuous), SType::Continuous);
        assert_eq!(stype(Symbology::RawSymbol), SType::RawSymbol);
    }
}
