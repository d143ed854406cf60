//! Hyperparameter store error types.

use std::path::PathBuf;
use thiserror::Error;

/// Hyperparameter file errors
#[derive(Debug, Error)]
pub enum HParamsError {
    #[error("YAML path '{0}' does not exist")]
    MissingFile(PathBuf),

    #[error("No group named '{0}'")]
    UnknownGroup(String),

    #[error("Group '{0}' is not a mapping")]
    NotAMapping(String),

    #[error("Group text must start with a 'name:' line, got: {0:?}")]
    InvalidGroupText(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for hyperparameter operations
pub type Result<T> = std::result::Result<T, HParamsError>;
