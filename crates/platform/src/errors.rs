//! Platform error types

use thiserror::Error;

/// Failures reported by a [`crate::ModelingPlatform`] implementation.
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("platform returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("resource {id} is faulty: {message}")]
    Faulty { id: String, message: String },

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("malformed document: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for PlatformError {
    fn from(err: serde_json::Error) -> Self {
        PlatformError::Malformed(err.to_string())
    }
}

impl From<reqwest::Error> for PlatformError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PlatformError::Timeout(err.to_string())
        } else {
            PlatformError::Request(err.to_string())
        }
    }
}

impl From<url::ParseError> for PlatformError {
    fn from(err: url::ParseError) -> Self {
        PlatformError::Request(format!("invalid url: {err}"))
    }
}

/// Rejections produced while parsing a resource identifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceIdError {
    #[error("not a resource id: {0:?}")]
    NotAResourceId(String),

    #[error("expected a {expected} id, got {found}")]
    WrongResourceType { expected: String, found: String },
}
