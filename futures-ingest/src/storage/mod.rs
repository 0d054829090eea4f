//! Storage layer for OHLCV bars
//!
//! This module provides the [`OhlcvStore`] interface, the PostgreSQL/TimescaleDB
//! implementation with keyed upserts, and an in-memory store with the same semantics.

mod memory;
mod repository;
mod timescale;
mod traits;

pub use memory::MemoryOhlcvStore;
pub use repository::PgOhlcvStore;
pub use timescale::*;
pub use traits::*;
