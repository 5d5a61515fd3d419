//! Error types for the queued loader

use stratum_vfs::VfsError;
use thiserror::Error;

/// Errors returned by loader operations
///
/// Per-file failures during a load never surface here; they are reported to
/// the job's callback as a [`JobStatus`](crate::JobStatus).
#[derive(Debug, Error)]
pub enum LoaderError {
    /// `begin_load` called while a load is in progress
    #[error("A level load is already active")]
    AlreadyActive,

    /// Operation needs an active load
    #[error("No level load is active")]
    NotActive,

    /// The level's resource manifest could not be read
    #[error("Failed to read resource manifest {0}")]
    Manifest(String),

    /// The level file could not be mounted
    #[error("Failed to mount level {0}")]
    LevelMount(String),

    /// A caller broke the job or claim protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A resource plugin failed to create a resource
    #[error("Resource plugin error: {0}")]
    Plugin(String),

    /// The worker pool could not be started
    #[error("Worker pool error: {0}")]
    Runtime(#[from] std::io::Error),

    /// Filesystem error
    #[error("Filesystem error: {0}")]
    Vfs(#[from] VfsError),
}

/// Result type for loader operations
pub type Result<T> = std::result::Result<T, LoaderError>;
