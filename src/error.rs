use std::io;

use thiserror::Error;

use crate::responses::SensorCode;

/// Failure of a single backend call. Every variant is retryable from the worker's point of view.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("backend answered with HTTP {status}")]
    Status { status: u16 },

    #[error("could not decode backend response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("could not read backend response: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] io::Error),

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// The terminal cannot start with this module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BootError {
    #[error("fingerprint module rejected the password ({0:?})")]
    Password(SensorCode),
}
