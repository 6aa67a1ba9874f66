//! QQBridge error types

use thiserror::Error;

/// QQBridge error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Gateway connection error (socket absent, closed, or write failed)
    #[error("Connection error: {0}")]
    Connection(String),

    /// CLI invocation error
    #[error("Invocation error: {0}")]
    Invocation(String),

    /// Bridge lifecycle error
    #[error("Bridge error: {0}")]
    Bridge(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML config error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TOML config parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type alias for QQBridge operations
pub type Result<T> = std::result::Result<T, Error>;
