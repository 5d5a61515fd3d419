//! Archive entry table
//!
//! Entries are kept sorted by their caseless name hash so a lookup is a
//! binary search followed by a name comparison on the (rare) hash collision.

use crate::error::{PackError, Result};
use crate::names::{NameRegistry, Symbol};
use crate::path::caseless_hash;

/// Compression method of a pack entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionMethod {
    /// Data is stored as-is (ZIP method 0)
    Stored,
    /// Data is a raw LZMA stream behind the ZIP LZMA header (ZIP method 14)
    Lzma,
}

impl CompressionMethod {
    /// ZIP method id
    pub const fn id(self) -> u16 {
        match self {
            Self::Stored => 0,
            Self::Lzma => 14,
        }
    }

    /// Map a ZIP method id, rejecting anything this reader cannot decode
    pub const fn from_id(id: u16) -> Result<Self> {
        match id {
            0 => Ok(Self::Stored),
            14 => Ok(Self::Lzma),
            other => Err(PackError::UnsupportedCompression(other)),
        }
    }
}

/// One file inside a pack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackEntry {
    /// Interned name as stored in the central directory (slashes fixed)
    pub name: Symbol,
    /// Caseless hash of the name
    pub hash: u64,
    /// Offset of the entry data, relative to the archive's base offset
    pub offset: u64,
    /// Size of the decoded data
    pub original_size: u64,
    /// Size of the data as stored, including the LZMA header for method 14
    pub compressed_size: u64,
    /// How the data is stored
    pub method: CompressionMethod,
    /// CRC-32 of the decoded data
    pub crc32: u32,
    /// Index into the preload directory, when the entry has preload bytes
    pub preload_index: Option<u16>,
}

/// Sorted lookup table of pack entries
#[derive(Debug, Default)]
pub struct EntryTable {
    entries: Vec<PackEntry>,
}

impl EntryTable {
    /// Build a table from parsed entries
    pub fn new(mut entries: Vec<PackEntry>) -> Self {
        entries.sort_by_key(|entry| entry.hash);
        Self { entries }
    }

    /// Find an entry by name, folding case and separators
    pub fn find(&self, name: &str, names: &NameRegistry) -> Option<(usize, &PackEntry)> {
        let hash = caseless_hash(name);
        let start = self.entries.partition_point(|entry| entry.hash < hash);

        self.entries[start..]
            .iter()
            .take_while(|entry| entry.hash == hash)
            .enumerate()
            .find(|(_, entry)| {
                names
                    .resolve(entry.name)
                    .is_some_and(|stored| names_match(&stored, name))
            })
            .map(|(offset, entry)| (start + offset, entry))
    }

    /// Entry at a table index
    pub fn get(&self, index: usize) -> Option<&PackEntry> {
        self.entries.get(index)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in hash order
    pub fn iter(&self) -> impl Iterator<Item = &PackEntry> {
        self.entries.iter()
    }
}

fn names_match(stored: &str, requested: &str) -> bool {
    stored.len() == requested.len()
        && stored.bytes().zip(requested.bytes()).all(|(a, b)| {
            let a = if a == b'\\' { b'/' } else { a };
            let b = if b == b'\\' { b'/' } else { b };
            a.eq_ignore_ascii_case(&b)
        })
}
