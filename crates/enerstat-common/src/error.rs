//! Error types shared across the workspace

use thiserror::Error;

/// Result type alias for Enerstat operations
pub type Result<T> = std::result::Result<T, EnerstatError>;

/// Errors raised outside the ETL pipeline proper: configuration,
/// logging setup, and other process-level concerns.
#[derive(Error, Debug)]
pub enum EnerstatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl EnerstatError {
    /// Configuration error for a required environment variable that is unset.
    pub fn missing_env(var: &str) -> Self {
        EnerstatError::Config(format!("required environment variable {var} is not set"))
    }
}
