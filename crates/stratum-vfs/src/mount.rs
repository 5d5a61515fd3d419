//! Search-path entries and the enums describing them

use crate::store::PackedStore;
use std::fmt;
use std::sync::Arc;
use stratum_pack::{Archive, Symbol};

/// Identity of a physical store
///
/// Mounts wrapping the same directory or archive share one id, so a lookup
/// visits each store once no matter how many path IDs mount it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreId(u32);

impl StoreId {
    /// Id reported for absolute names resolved outside the mount list
    pub const UNMOUNTED: Self = Self(0);

    /// Flag bit set on every map-pack store id
    pub const MAP_PACK_FLAG: u32 = 0x8000_0000;

    /// Wrap a raw id
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw id value
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Id of the map pack stored in the level file at `full_path`
    pub fn for_map_pack(full_path: &str) -> Self {
        let mut crc = flate2::Crc::new();
        crc.update(full_path.as_bytes());
        Self(crc.sum() | Self::MAP_PACK_FLAG)
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Where a new search path goes in the list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchPathAdd {
    /// Searched before every existing mount
    Head,
    /// Searched after every existing mount
    #[default]
    Tail,
}

/// Restricts which mount kinds a lookup consults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathFilter {
    /// Consult every mount
    #[default]
    None,
    /// Skip pack archives
    CullPack,
    /// Skip everything except pack archives
    CullNonPack,
}

/// Kind of mount that satisfied a lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathType {
    /// Loose file on disk
    Loose,
    /// Entry of a standalone pack
    Pack,
    /// Entry of the pack embedded in the current level
    MapPack,
    /// File of an external packed store
    PackedStore,
}

/// What a search path is backed by
#[derive(Debug, Clone)]
pub enum MountKind {
    /// Loose directory
    Loose,
    /// Pack archive, standalone or embedded in a level file
    Archive(Arc<Archive>),
    /// External packed store
    PackedStore(Arc<dyn PackedStore>),
}

/// One entry of the search-path list
#[derive(Debug, Clone)]
pub struct SearchPath {
    pub(crate) path: Symbol,
    pub(crate) path_id: Symbol,
    pub(crate) store_id: StoreId,
    pub(crate) trusted: bool,
    pub(crate) map_pack: bool,
    pub(crate) kind: MountKind,
}

impl SearchPath {
    /// Interned normalized path (with trailing `/`)
    pub const fn path(&self) -> Symbol {
        self.path
    }

    /// Interned path ID
    pub const fn path_id(&self) -> Symbol {
        self.path_id
    }

    /// Identity of the backing store
    pub const fn store_id(&self) -> StoreId {
        self.store_id
    }

    /// Whether content from this mount is trusted
    pub const fn is_trusted(&self) -> bool {
        self.trusted
    }

    /// Whether this mount is the pack of the current level
    pub const fn is_map_pack(&self) -> bool {
        self.map_pack
    }

    /// Backing store
    pub const fn kind(&self) -> &MountKind {
        &self.kind
    }

    /// Whether the mount is a pack archive
    pub const fn is_pack(&self) -> bool {
        matches!(self.kind, MountKind::Archive(_))
    }

    /// Lookup classification for hits on this mount
    pub const fn path_type(&self) -> PathType {
        match self.kind {
            MountKind::Loose => PathType::Loose,
            MountKind::Archive(_) if self.map_pack => PathType::MapPack,
            MountKind::Archive(_) => PathType::Pack,
            MountKind::PackedStore(_) => PathType::PackedStore,
        }
    }

    pub(crate) const fn passes(&self, filter: PathFilter) -> bool {
        match filter {
            PathFilter::None => true,
            PathFilter::CullPack => !self.is_pack(),
            PathFilter::CullNonPack => self.is_pack(),
        }
    }
}
