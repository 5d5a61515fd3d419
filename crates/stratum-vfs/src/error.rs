//! Error types for the virtual filesystem

use std::io;
use stratum_pack::PackError;
use thiserror::Error;

/// Errors raised by search-path management and lookups
#[derive(Debug, Error)]
pub enum VfsError {
    /// No mount provides the requested name
    #[error("File not found: {0}")]
    NotFound(String),

    /// A mount target is malformed and was rejected
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// I/O error on a loose file or directory
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Error from a pack archive
    #[error("Pack error: {0}")]
    Pack(PackError),
}

impl VfsError {
    /// Check whether this error is a plain lookup miss
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<PackError> for VfsError {
    fn from(err: PackError) -> Self {
        match err {
            PackError::NotFound(name) => Self::NotFound(name),
            PackError::InvalidLevel(reason) => Self::InvalidFormat(reason),
            other if other.is_format_error() => Self::InvalidFormat(other.to_string()),
            other => Self::Pack(other),
        }
    }
}

/// Result type for filesystem operations
pub type Result<T> = std::result::Result<T, VfsError>;
