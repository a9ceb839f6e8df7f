//! Error types for cross-validation and feature selection

use crossfold_platform::PlatformError;
use thiserror::Error;

use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum CrossfoldError {
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("cannot aggregate evaluations: {0}")]
    Aggregation(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl CrossfoldError {
    /// Stable code of a validation failure, `None` for other errors.
    pub fn validation_code(&self) -> Option<&'static str> {
        match self {
            CrossfoldError::Validation(err) => Some(err.code()),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for CrossfoldError {
    fn from(err: toml::de::Error) -> Self {
        CrossfoldError::Config(err.to_string())
    }
}

impl From<std::io::Error> for CrossfoldError {
    fn from(err: std::io::Error) -> Self {
        CrossfoldError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CrossfoldError>;
