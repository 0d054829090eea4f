//! Record normalization for OHLCV bars
//!
//! Converts resolved provider rows into [`CanonicalRecord`](crate::schema::CanonicalRecord)s:
//! timestamps to UTC, prices rounded to the stored precision, and numeric sanity checks.
//! Rows that fail are excluded from the batch; the run continues.

mod record;


pub use record::{
    round_to, NormalizeReport, NormalizerConfig, RecordNormalizer, ValidationError,
    ValidationResult,
};
