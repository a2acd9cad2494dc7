//! Error types for reshelf.

use thiserror::Error;

/// Main error type for reshelf CLI operations.
#[derive(Error, Debug)]
pub enum ReshelfError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No access token. Set RESHELF_ACCESS_TOKEN or api.access_token in {0}")]
    MissingToken(String),

    #[error("Ids file error: {0}")]
    IdsFile(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Interrupted")]
    Interrupted,
}

impl From<serde_json::Error> for ReshelfError {
    fn from(e: serde_json::Error) -> Self {
        ReshelfError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for ReshelfError {
    fn from(e: toml::de::Error) -> Self {
        ReshelfError::Config(e.to_string())
    }
}

/// Result type alias for reshelf operations.
pub type ReshelfResult<T> = Result<T, ReshelfError>;
