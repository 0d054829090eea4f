//! Configuration loading and management

mod settings;

pub use settings::*;
