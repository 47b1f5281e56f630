//! Error types for the deploy_config crate.

use thiserror::Error;

/// Result type for deploy_config operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// I/O error when reading configuration files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error parsing the YAML container list.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml_ng::Error),

    /// Error parsing TOML settings.
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Configuration file not found.
    #[error("Configuration not found: {0}")]
    NotFound(String),

    /// One or more container declarations are invalid.
    #[error("Validation failed:\n  {}", .0.join("\n  "))]
    Validation(Vec<String>),

    /// A secret referenced by the settings is not available.
    #[error("Missing secret: {0}")]
    MissingSecret(String),
}

impl ConfigError {
    /// Create a validation error with a single problem.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(vec![msg.into()])
    }
}
