//! Source level helpers for binaries and demos built on this crate

#[cfg(feature = "config")]
pub mod config;
pub mod console;

use crate::api::ApiClientError;
use simple_logger::SimpleLogger;

/// Installs `simple_logger` at `level`. The library itself never installs a logger.
pub fn init_logging(level: log::LevelFilter) -> Result<(), ApiClientError> {
    SimpleLogger::new()
        .with_level(level)
        .init()
        .map_err(|e| ApiClientError::Config(format!("Logger already installed: {}", e)))
}
