//! Collaborator traits: packed stores and the trust policy

use std::fmt::Debug;
use std::io::{Read, Seek};
use std::path::Path;
use std::sync::Arc;

/// A readable, seekable byte stream that can move between threads
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// An externally implemented packed store (for example a VPK directory)
pub trait PackedStore: Send + Sync + Debug {
    /// Path the store was opened from
    fn full_path(&self) -> &str;

    /// Check whether the store holds `name`
    fn contains(&self, name: &str) -> bool;

    /// Open `name` for reading
    fn open(&self, name: &str) -> Option<Box<dyn ReadSeek>>;

    /// Size of `name` in bytes
    fn size(&self, name: &str) -> Option<u64>;

    /// List `(directories, files)` matching a FindFirst-style wildcard
    fn file_and_dir_lists(&self, wildcard: &str) -> (Vec<String>, Vec<String>);

    /// Whether content from this store is trusted
    fn is_trusted(&self) -> bool {
        false
    }
}

/// Opens packed stores for `.vpk` search paths
pub trait PackedStoreOpener: Send + Sync {
    /// Open the store at `path`; `None` when there is nothing to mount
    fn open(&self, path: &Path) -> Option<Arc<dyn PackedStore>>;
}

/// Decides which files must come from trusted mounts
pub trait TrustPolicy: Send + Sync {
    /// Check whether `name` may only be served by a trusted mount
    fn requires_trust(&self, name: &str) -> bool;
}
