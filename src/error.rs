//! Error types

use std::path::PathBuf;

use thiserror::Error;

/// Crate-level error for configuration and tensor handling
#[derive(Debug, Error)]
pub enum Error {
    /// A configuration value is out of range (zero sizes, zero runs, ...)
    #[error("invalid configuration: {field} {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("failed to read config file {path}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file")]
    ConfigParse(#[from] toml::de::Error),

    /// Inputs could not be stacked into one batch tensor
    #[error("cannot stack batch: {0}")]
    Shape(String),
}

impl Error {
    pub(crate) fn must_be_positive(field: &'static str) -> Self {
        Error::InvalidConfig {
            field,
            reason: "must be greater than zero".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
