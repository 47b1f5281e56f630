//! CLI error types.

use thiserror::Error;

/// CLI error type.
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    ConfigError(#[from] deploy_config::ConfigError),

    #[error("{0}")]
    Converge(#[from] converge_types::ConvergeError),

    #[error("{0}")]
    Reconcile(#[from] converge_core::ReconcileError),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml_ng::Error),
}

pub type Result<T> = std::result::Result<T, CliError>;
