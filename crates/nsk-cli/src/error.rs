//! Error handling for the nsk CLI

use thiserror::Error;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    /// Kernel rejected an operation
    #[error("Kernel error: {0}")]
    Kernel(#[from] nsk_runtime::KernelError),

    /// Experiment file is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Experiment file is not valid TOML
    #[error("Parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Experiment could not be written as TOML
    #[error("Serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// Report could not be written as JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("Error: {0}")]
    Generic(#[from] anyhow::Error),

    /// Invalid command arguments
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),
}

impl CliError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid arguments error
    pub fn invalid_args(msg: impl Into<String>) -> Self {
        Self::InvalidArgs(msg.into())
    }
}
