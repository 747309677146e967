//! Infrastructure layer module
//!
//! - Configuration loading (figment)
//! - Logging (tracing, tracing-subscriber, tracing-appender)

pub mod config;
pub mod logging;
