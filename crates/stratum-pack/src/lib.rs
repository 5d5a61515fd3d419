//! Pack archive reader and builder for the stratum virtual filesystem
//!
#![allow(clippy::cast_possible_truncation)] // Intentional for binary format parsing
#![allow(clippy::cast_possible_wrap)] // Level lump offsets are signed on disk
#![allow(clippy::cast_lossless)] // Sometimes clearer than From
#![allow(clippy::uninlined_format_args)]
//! Packs are ZIP files restricted to two entry encodings, stored and LZMA,
//! with two additions used by the engine:
//!
//! - A **preload section**: the first entry, named `__preload_section.pre`,
//!   holds the leading bytes of other entries so small reads are answered
//!   from memory without touching the file.
//! - **Seekable LZMA entries**: compressed entries decode incrementally and
//!   keep a window of recent output, so short backward seeks do not restart
//!   the decoder.
//!
//! A pack can also live inside a level file (`.bsp`), in lump 40 of the
//! `VBSP` header; [`Archive::open_embedded`] opens it in place.
//!
//! # Example
//!
//! ```rust,no_run
//! use stratum_pack::{Archive, NameRegistry, PackConfig};
//! use std::io::Read;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let names = Arc::new(NameRegistry::new());
//! let archive = Archive::open("pak01.zip", names, PackConfig::default())?;
//!
//! let mut file = archive.open_file("scripts/game.txt")?;
//! let mut text = String::new();
//! file.read_to_string(&mut text)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

/// Opened archives, native handle sharing and preload-aware reads
pub mod archive;
/// Level file header and the pack lump inside it
pub mod bsp;
/// Pack writer
pub mod builder;
/// Archive tuning
pub mod config;
/// Entry metadata and the sorted lookup table
pub mod entry;
/// Error types
pub mod error;
/// On-disk records
pub mod format;
/// Readable handles to entries
pub mod handle;
/// LZMA coding
pub mod lzma;
/// Name interning
pub mod names;
/// Name normalization and hashing
pub mod path;
/// Preload section parsing and writing
pub mod preload;
/// FindFirst-style wildcards
pub mod wildcard;

pub use archive::{Archive, OpenGuard};
pub use bsp::{BspHeader, BspLump, LUMP_PAKFILE, read_pack_lump, write_level_file};
pub use builder::PackBuilder;
pub use config::PackConfig;
pub use entry::{CompressionMethod, EntryTable, PackEntry};
pub use error::{PackError, Result};
pub use handle::{LzmaFile, PackFile, StoredFile};
pub use names::{NameRegistry, Symbol};
pub use wildcard::{Wildcard, WildcardMatch};
