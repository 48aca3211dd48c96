//! Configuration Module
//!
//! Configuration loading for the currency service.

mod settings;

pub use settings::{ConfigError, RateSettings, ServerSettings, ServiceConfig, StreamingSettings};
