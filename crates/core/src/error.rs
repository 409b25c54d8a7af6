//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("invalid image path: {0}")]
    InvalidImagePath(String),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("invalid capability: {0}")]
    InvalidCapability(String),

    #[error("invalid resource: {0}")]
    InvalidResource(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
