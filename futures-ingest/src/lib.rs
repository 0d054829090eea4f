//! # Futures Ingest
//!
//! Historical futures OHLCV ingestion from Databento into PostgreSQL/TimescaleDB.
//!
//! ## Flow
//!
//! - **Fetch**: one request per window, continuous (`ES.c.0`) or raw (`ESH4`) symbology
//! - **Resolve**: attribute continuous bars to the symbol that was asked for, using the
//!   per-day instrument mapping returned alongside the bars
//! - **Normalize**: UTC timestamps, rounded prices and row-level validation
//! - **Upsert**: idempotent writes keyed by `(time, symbol)`
//!
//! Row-level problems are counted in an [`IngestReport`] and never abort a run. Request
//! and store failures surface as [`IngestError`].

pub mod cli;
pub mod config;
pub mod driver;
pub mod error;
pub mod normalizer;
pub mod pipeline;
pub mod provider;
pub mod resolver;
pub mod schema;
pub mod storage;

// Re-export commonly used types
pub use config::Settings;
pub use driver::{ingest, IngestConfig};
pub use error::{ErrorCategory, ErrorClassification, IngestError, IngestResult};
pub use pipeline::{IngestPipeline, IngestReport};
pub use provider::{HistoricalDataProvider, ProviderError, ProviderInfo, ProviderResult};
pub use schema::{BarSchema, CanonicalRecord, IngestionWindow, RawMarketRow, ReferenceRow};
pub use storage::{MemoryOhlcvStore, OhlcvStore, PgOhlcvStore, RepositoryError};
