//! Initialization-time errors.
//!
//! Emulated operations themselves never fail; only loading the model can.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FamError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("unknown config key '{0}'")]
    UnknownKey(String),

    #[error("invalid value '{value}' for config key '{key}'")]
    InvalidValue { key: String, value: String },

    #[error("the fam model has already been initialized")]
    AlreadyInitialized,
}

pub type Result<T> = std::result::Result<T, FamError>;
