//! Common normalized data types
//!
//! This module defines the request descriptor, the provider-native row shapes, and the
//! canonical record persisted to the store. Provider-specific data is converted to
//! [`CanonicalRecord`] before it is written.

mod continuous;
mod market_data;

pub use continuous::*;
pub use market_data::*;
