//! Error types for pack archive operations

use std::io;
use thiserror::Error;

/// Errors raised while parsing or reading pack archives
#[derive(Debug, Error)]
pub enum PackError {
    /// I/O error on the native archive handle
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Binary record could not be decoded
    #[error("Binary format error: {0}")]
    Binary(#[from] binrw::Error),

    /// Entry does not exist in the archive
    #[error("Entry not found: {0}")]
    NotFound(String),

    /// Archive structure is malformed
    #[error("Invalid pack format: {0}")]
    InvalidFormat(String),

    /// An entry uses a compression method this reader cannot decode
    #[error("Unsupported compression method: {0}")]
    UnsupportedCompression(u16),

    /// LZMA stream setup or decoding failed
    #[error("Decompression error: {0}")]
    Decompression(String),

    /// Level file header is malformed or out of the supported version range
    #[error("Invalid level file: {0}")]
    InvalidLevel(String),
}

impl PackError {
    /// Check whether this error is a plain lookup miss
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check whether this error means the archive itself is unusable
    pub const fn is_format_error(&self) -> bool {
        matches!(
            self,
            Self::Binary(_)
                | Self::InvalidFormat(_)
                | Self::UnsupportedCompression(_)
                | Self::InvalidLevel(_)
        )
    }
}

impl From<xz2::stream::Error> for PackError {
    fn from(err: xz2::stream::Error) -> Self {
        Self::Decompression(err.to_string())
    }
}

/// Result type for pack operations
pub type Result<T> = std::result::Result<T, PackError>;
