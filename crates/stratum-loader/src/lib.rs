//! Priority-batched asynchronous level loader
//!
//! A [`QueuedLoader`] reads a level's resource manifest, hands each entry to
//! the [`ResourcePreload`] plugin installed for its [`ResourceKind`], and
//! issues the reads the plugins submit as one batch sorted for the medium.
//! Reads go through a [`stratum_vfs::FileSystem`] on a [`WorkerPool`];
//! completions run the submitting plugin's callback on the pool.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stratum_loader::{LoadOptions, LoaderConfig, QueuedLoader};
//! use stratum_vfs::{FileSystem, FsConfig, SearchPathAdd};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let fs = Arc::new(FileSystem::new(FsConfig::default()));
//! fs.add_search_path("/games/hl2/hl2", "GAME", SearchPathAdd::Tail)?;
//!
//! let loader = QueuedLoader::new(fs, LoaderConfig::default().with_anonymous_extension("nav"))?;
//! loader.begin_load("d1_trainstation_01", LoadOptions::default())?;
//! let nav = loader.queue().claim_sync("maps/d1_trainstation_01.nav");
//! loader.end_load(false)?;
//! # let _ = nav;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

// Configuration
pub mod config;

// Error types
pub mod error;

// Jobs and ordering
pub mod job;
pub mod layout;

// Loader core
pub mod loader;
pub mod queue;
pub mod resource;

// Execution
pub mod io;
pub mod pool;
pub mod throttle;

// Reporting
pub mod progress;
pub mod stats;

pub use config::{LoaderConfig, available_memory};
pub use error::{LoaderError, Result};
pub use io::{AsyncIo, FileSystemIo, IoCallback, IoHandle, IoPriority, IoRequest};
pub use job::{Claimed, Completion, JobCallback, JobStatus, LoaderJob, Priority};
pub use layout::{LayoutOrder, LayoutRule};
pub use loader::{LoadOptions, QueuedLoader};
pub use pool::WorkerPool;
pub use progress::{LoaderProgress, NullProgress};
pub use queue::JobQueue;
pub use resource::{AnonymousPreload, Classifier, ResourceKind, ResourcePreload, ResourceTable};
pub use stats::{JobReport, LoaderStats};
pub use throttle::Throttle;
