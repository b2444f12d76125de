use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the wildgate daemon
#[derive(Error, Debug)]
pub enum WildgateError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Regex compilation errors
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// Discovery ledger errors
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// Acquisition source errors
    #[error("Source error: {0}")]
    Source(String),

    /// Address resolution errors
    #[error("Resolve error: {0}")]
    Resolve(String),

    /// Daemon errors
    #[error("Daemon error: {0}")]
    Daemon(String),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type for wildgate operations
pub type Result<T> = std::result::Result<T, WildgateError>;
