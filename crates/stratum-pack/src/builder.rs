//! Builder for pack archives
//!
//! Writes ZIP files the reader understands: stored or LZMA entries, an
//! optional preload section as the first entry, and optionally Zip64 end
//! records or the packed central directory layout.

use crate::error::{PackError, Result};
use crate::format::{
    CENTRAL_HEADER_SIGNATURE, CentralDirectoryHeader, EndOfCentralDirectory,
    INVALID_PRELOAD_ENTRY, LOCAL_HEADER_SIGNATURE, LZMA_PROPS_SIZE, LocalFileHeader,
    PACKED_DIRECTORY_COMMENT, PRELOAD_SECTION_NAME, ZIP64_EXTRA_ID, ZIP64_LOCATOR_SIGNATURE,
    ZIP64_MARKER_16, ZIP64_MARKER_32, Zip64EndOfCentralDirectory, Zip64Locator,
};
use crate::entry::CompressionMethod;
use crate::lzma;
use crate::preload::{build_section, compress_blob};
use binrw::BinWriterExt;
use binrw::io::Cursor;
use flate2::Crc;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// DOS date for 1980-01-01
const DOS_EPOCH_DATE: u16 = 0x0021;
/// General purpose flag: LZMA stream ends with an end-of-stream marker
const FLAG_LZMA_EOS: u16 = 0x0002;
/// LZMA preset used for compressed entries
const LZMA_PRESET: u32 = 6;

#[derive(Debug, Clone)]
struct PendingEntry {
    name: String,
    data: Vec<u8>,
    method: CompressionMethod,
}

/// Entry as laid out in the output
struct WrittenEntry {
    name: String,
    method: CompressionMethod,
    crc32: u32,
    original_size: u64,
    compressed_size: u64,
    local_offset: u64,
    extra: Vec<u8>,
}

/// Builder for pack archives
///
/// # Example
///
/// ```rust,no_run
/// use stratum_pack::PackBuilder;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// PackBuilder::new()
///     .stored("scripts/game.txt", b"hello".to_vec())
///     .lzma("materials/brick.vmt", b"\"LightmappedGeneric\" {}".to_vec())
///     .with_preload(512)
///     .write_to_path("pak01.zip")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct PackBuilder {
    entries: Vec<PendingEntry>,
    preload_bytes: usize,
    compress_preload: bool,
    zip64: bool,
    packed_layout: bool,
}

impl PackBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry stored without compression
    #[must_use]
    pub fn stored(self, name: impl Into<String>, data: Vec<u8>) -> Self {
        self.add_file(name, data, CompressionMethod::Stored)
    }

    /// Add an LZMA-compressed entry
    #[must_use]
    pub fn lzma(self, name: impl Into<String>, data: Vec<u8>) -> Self {
        self.add_file(name, data, CompressionMethod::Lzma)
    }

    /// Add an entry with an explicit method
    #[must_use]
    pub fn add_file(
        mut self,
        name: impl Into<String>,
        data: Vec<u8>,
        method: CompressionMethod,
    ) -> Self {
        let name = name.into().replace('\\', "/");
        self.entries.push(PendingEntry { name, data, method });
        self
    }

    /// Add every file below `root`, named relative to it
    pub fn add_directory(mut self, root: impl AsRef<Path>, method: CompressionMethod) -> Result<Self> {
        let root = root.as_ref();
        let mut files = Vec::new();
        for item in WalkDir::new(root).sort_by_file_name() {
            let item = item.map_err(|e| PackError::Io(e.into()))?;
            if !item.file_type().is_file() {
                continue;
            }
            let relative = item
                .path()
                .strip_prefix(root)
                .map_err(|e| PackError::InvalidFormat(e.to_string()))?;
            files.push((
                relative.to_string_lossy().replace('\\', "/"),
                std::fs::read(item.path())?,
            ));
        }

        debug!("Collected {} files from {}", files.len(), root.display());
        for (name, data) in files {
            self = self.add_file(name, data, method);
        }
        Ok(self)
    }

    /// Copy up to `bytes` leading bytes of every stored entry into a preload section
    #[must_use]
    pub const fn with_preload(mut self, bytes: usize) -> Self {
        self.preload_bytes = bytes;
        self
    }

    /// Store preload chunks as `LZMA` blobs
    #[must_use]
    pub const fn with_compressed_preload(mut self, enable: bool) -> Self {
        self.compress_preload = enable;
        self
    }

    /// Always emit Zip64 end of central directory records
    #[must_use]
    pub const fn with_zip64(mut self, enable: bool) -> Self {
        self.zip64 = enable;
        self
    }

    /// Write the packed central directory layout (`XZP2` comment)
    #[must_use]
    pub const fn with_packed_layout(mut self, enable: bool) -> Self {
        self.packed_layout = enable;
        self
    }

    /// Number of entries added so far
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether no entries were added
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn preload_section(&self) -> Result<Option<Vec<u8>>> {
        if self.preload_bytes == 0 {
            return Ok(None);
        }

        // central index 0 is the section itself
        let mut remap = vec![INVALID_PRELOAD_ENTRY];
        let mut chunks = Vec::new();
        for entry in &self.entries {
            let take = entry.data.len().min(self.preload_bytes);
            if entry.method != CompressionMethod::Stored || take == 0 {
                remap.push(INVALID_PRELOAD_ENTRY);
                continue;
            }
            let chunk = &entry.data[..take];
            remap.push(chunks.len() as u16);
            chunks.push(if self.compress_preload {
                compress_blob(chunk)?
            } else {
                chunk.to_vec()
            });
        }

        Ok(Some(build_section(&remap, &chunks, 0)))
    }

    /// Serialize the archive
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        let mut written = Vec::with_capacity(self.entries.len() + 1);

        if let Some(section) = self.preload_section()? {
            written.push(write_entry(
                &mut out,
                PRELOAD_SECTION_NAME,
                &section,
                CompressionMethod::Stored,
            )?);
        }
        for entry in &self.entries {
            written.push(write_entry(&mut out, &entry.name, &entry.data, entry.method)?);
        }

        let directory_offset = out.position();
        for entry in &written {
            write_central_header(&mut out, entry, self.packed_layout)?;
        }
        let directory_size = out.position() - directory_offset;

        let count = written.len() as u64;
        let needs_zip64 = self.zip64
            || count >= u64::from(ZIP64_MARKER_16)
            || directory_offset >= u64::from(ZIP64_MARKER_32);

        let mut eocd = if needs_zip64 {
            let record_offset = out.position();
            out.write_le(&Zip64EndOfCentralDirectory::new(
                count,
                directory_size,
                directory_offset,
            ))?;
            out.write_le(&Zip64Locator {
                signature: ZIP64_LOCATOR_SIGNATURE,
                record_disk: 0,
                record_offset,
                total_disks: 1,
            })?;
            EndOfCentralDirectory::new(ZIP64_MARKER_16, ZIP64_MARKER_32, ZIP64_MARKER_32)
        } else {
            EndOfCentralDirectory::new(count as u16, directory_size as u32, directory_offset as u32)
        };

        if self.packed_layout {
            eocd.comment_length = PACKED_DIRECTORY_COMMENT.len() as u16;
        }
        out.write_le(&eocd)?;
        if self.packed_layout {
            out.get_mut().extend_from_slice(PACKED_DIRECTORY_COMMENT);
        }

        debug!(
            "Built pack: {} entries, {} byte directory",
            written.len(),
            directory_size
        );
        Ok(out.into_inner())
    }

    /// Serialize the archive to a file
    pub fn write_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }
}

fn checksum(data: &[u8]) -> u32 {
    let mut crc = Crc::new();
    crc.update(data);
    crc.sum()
}

/// Zip64 extra block carrying every 64-bit field, or nothing when all fit
fn zip64_extra_block(original: u64, compressed: u64, offset: u64) -> Vec<u8> {
    let limit = u64::from(ZIP64_MARKER_32);
    if original < limit && compressed < limit && offset < limit {
        return Vec::new();
    }
    let mut extra = Vec::with_capacity(28);
    extra.extend_from_slice(&ZIP64_EXTRA_ID.to_le_bytes());
    extra.extend_from_slice(&24u16.to_le_bytes());
    for value in [original, compressed, offset] {
        extra.extend_from_slice(&value.to_le_bytes());
    }
    extra
}

fn clamp_to_marker(value: u64, zip64: bool) -> u32 {
    if zip64 { ZIP64_MARKER_32 } else { value as u32 }
}

fn write_entry(
    out: &mut Cursor<Vec<u8>>,
    name: &str,
    data: &[u8],
    method: CompressionMethod,
) -> Result<WrittenEntry> {
    let payload = match method {
        CompressionMethod::Stored => data.to_vec(),
        CompressionMethod::Lzma => {
            let (properties, stream) = lzma::compress(data, LZMA_PRESET)?;
            let mut payload = Vec::with_capacity(9 + stream.len());
            payload.extend_from_slice(&[9, 20]);
            payload.extend_from_slice(&(LZMA_PROPS_SIZE as u16).to_le_bytes());
            payload.extend_from_slice(&properties);
            payload.extend_from_slice(&stream);
            payload
        }
    };

    let local_offset = out.position();
    let original_size = data.len() as u64;
    let compressed_size = payload.len() as u64;
    let extra = zip64_extra_block(original_size, compressed_size, local_offset);
    let zip64 = !extra.is_empty();
    let crc32 = checksum(data);

    let header = LocalFileHeader {
        signature: LOCAL_HEADER_SIGNATURE,
        version_needed: version_needed(method, zip64),
        flags: flags(method),
        compression_method: method.id(),
        modified_time: 0,
        modified_date: DOS_EPOCH_DATE,
        crc32,
        compressed_size: clamp_to_marker(compressed_size, zip64),
        uncompressed_size: clamp_to_marker(original_size, zip64),
        file_name_length: name_length(name)?,
        extra_field_length: extra.len() as u16,
    };
    out.write_le(&header)?;
    out.get_mut().extend_from_slice(name.as_bytes());
    out.get_mut().extend_from_slice(&extra);
    out.get_mut().extend_from_slice(&payload);
    out.set_position(out.get_ref().len() as u64);

    Ok(WrittenEntry {
        name: name.to_string(),
        method,
        crc32,
        original_size,
        compressed_size,
        local_offset,
        extra,
    })
}

fn write_central_header(
    out: &mut Cursor<Vec<u8>>,
    entry: &WrittenEntry,
    packed_layout: bool,
) -> Result<()> {
    let zip64 = !entry.extra.is_empty();
    let header = CentralDirectoryHeader {
        signature: CENTRAL_HEADER_SIGNATURE,
        version_made_by: version_needed(entry.method, zip64),
        version_needed: version_needed(entry.method, zip64),
        flags: flags(entry.method),
        compression_method: entry.method.id(),
        modified_time: 0,
        modified_date: DOS_EPOCH_DATE,
        crc32: entry.crc32,
        compressed_size: clamp_to_marker(entry.compressed_size, zip64),
        uncompressed_size: clamp_to_marker(entry.original_size, zip64),
        file_name_length: name_length(&entry.name)?,
        extra_field_length: entry.extra.len() as u16,
        file_comment_length: 0,
        disk_number_start: 0,
        internal_attributes: 0,
        external_attributes: 0,
        local_header_offset: clamp_to_marker(entry.local_offset, zip64),
    };
    out.write_le(&header)?;
    out.get_mut().extend_from_slice(entry.name.as_bytes());
    // the packed layout keeps extra lengths in the header but not the bytes
    if !packed_layout {
        out.get_mut().extend_from_slice(&entry.extra);
    }
    out.set_position(out.get_ref().len() as u64);
    Ok(())
}

const fn version_needed(method: CompressionMethod, zip64: bool) -> u16 {
    match (method, zip64) {
        (CompressionMethod::Lzma, _) => 63,
        (CompressionMethod::Stored, true) => 45,
        (CompressionMethod::Stored, false) => 10,
    }
}

const fn flags(method: CompressionMethod) -> u16 {
    match method {
        CompressionMethod::Lzma => FLAG_LZMA_EOS,
        CompressionMethod::Stored => 0,
    }
}

fn name_length(name: &str) -> Result<u16> {
    u16::try_from(name.len())
        .map_err(|_| PackError::InvalidFormat(format!("Entry name too long: {name}")))
}
