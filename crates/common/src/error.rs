use thiserror::Error;

use crate::Interval;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("Interval mismatch for {symbol}: window is {expected}, update is {got}")]
    IntervalMismatch {
        symbol: String,
        expected: Interval,
        got: Interval,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
