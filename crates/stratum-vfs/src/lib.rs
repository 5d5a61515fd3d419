//! Layered virtual filesystem over loose directories and pack archives
//!
//! A [`FileSystem`] keeps an ordered list of search paths. Each search path
//! is a loose directory, a pack, the pack embedded in the current level file
//! or an external packed store, tagged with a path ID such as `GAME`.
//! Lookups walk the list in order and the first mount providing a name wins.
//!
//! # Example
//!
//! ```rust,no_run
//! use stratum_vfs::{FileSystem, FsConfig, SearchPathAdd};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let fs = FileSystem::new(FsConfig::default());
//! fs.add_search_path("/games/hl2/hl2", "GAME", SearchPathAdd::Tail)?;
//! fs.add_search_path("/games/hl2/mymod", "GAME", SearchPathAdd::Head)?;
//!
//! let script = fs.read_file("scripts/game.txt", Some("GAME"))?;
//! for found in fs.find("materials/*.vmt", None) {
//!     println!("{}", found.name);
//! }
//! # let _ = script;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

// Configuration
pub mod config;

// Error types
pub mod error;

// Core filesystem
pub mod filesystem;
pub mod find;
pub mod handle;
pub mod mount;

// Collaborator traits
pub mod store;

pub use config::FsConfig;
pub use error::{Result, VfsError};
pub use filesystem::{FileSystem, Resolved};
pub use find::{Find, FoundEntry};
pub use handle::FileHandle;
pub use mount::{MountKind, PathFilter, PathType, SearchPath, SearchPathAdd, StoreId};
pub use store::{PackedStore, PackedStoreOpener, ReadSeek, TrustPolicy};
