//! Data provider abstractions and implementations
//!
//! This module defines the historical provider interface, the fetch adapter that drives
//! it, and the Databento and mock implementations.

mod adapter;
pub mod databento;
pub mod mock;
mod traits;

pub use adapter::{FetchAdapter, FetchOutput};
pub use traits::*;
