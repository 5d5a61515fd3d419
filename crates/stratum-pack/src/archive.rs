//! Opened pack archives
//!
//! An [`Archive`] is parsed once from its central directory and then shared
//! through an `Arc` by every mount that references the same physical file.
//! The native file handle is opened on demand and held for as long as at
//! least one [`OpenGuard`] is alive.

use crate::config::PackConfig;
use crate::entry::{CompressionMethod, EntryTable, PackEntry};
use crate::error::{PackError, Result};
use crate::format::{
    CENTRAL_HEADER_SIGNATURE, CENTRAL_HEADER_SIZE, CentralDirectoryHeader, EOCD_SIGNATURE,
    EOCD_SIZE, EndOfCentralDirectory, LOCAL_HEADER_SIZE, MAX_COMMENT_LENGTH,
    PACKED_DIRECTORY_COMMENT, PRELOAD_SECTION_NAME, ZIP64_LOCATOR_SIGNATURE, ZIP64_LOCATOR_SIZE,
    ZIP64_MARKER_32, Zip64EndOfCentralDirectory, Zip64Locator, zip64_extra,
};
use crate::handle::PackFile;
use crate::names::{NameRegistry, Symbol};
use crate::path::{caseless_hash, fix_slashes};
use crate::preload::PreloadSection;
use crate::wildcard::{Wildcard, WildcardMatch};
use binrw::BinReaderExt;
use binrw::io::Cursor;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace, warn};

#[derive(Debug, Default)]
struct NativeHandle {
    file: Option<File>,
    open_count: usize,
}

/// Location and totals of the central directory
#[derive(Debug, Clone, Copy)]
struct DirectoryLocation {
    entries: u64,
    size: u64,
    offset: u64,
    packed_layout: bool,
}

/// One opened pack archive
#[derive(Debug)]
pub struct Archive {
    path: PathBuf,
    symbol: Symbol,
    names: Arc<NameRegistry>,
    base_offset: u64,
    length: u64,
    config: PackConfig,
    handle: Mutex<NativeHandle>,
    preload: Option<PreloadSection>,
    entries: EntryTable,
}

/// Keeps the archive's native handle open while alive
///
/// Every open [`PackFile`] holds one guard. Because the guard owns an
/// `Arc<Archive>`, an archive can never be dropped with a nonzero open count.
#[derive(Debug)]
pub struct OpenGuard {
    archive: Arc<Archive>,
}

impl OpenGuard {
    /// Archive this guard keeps open
    pub fn archive(&self) -> &Arc<Archive> {
        &self.archive
    }
}

impl Drop for OpenGuard {
    fn drop(&mut self) {
        let mut handle = self.archive.handle.lock();
        handle.open_count = handle.open_count.saturating_sub(1);
        if handle.open_count == 0 && handle.file.take().is_some() {
            trace!("Closed native handle for {}", self.archive.path.display());
        }
    }
}

impl Archive {
    /// Open a standalone pack file
    pub fn open(
        path: impl AsRef<Path>,
        names: Arc<NameRegistry>,
        config: PackConfig,
    ) -> Result<Arc<Self>> {
        let path = path.as_ref();
        let length = std::fs::metadata(path)
            .map_err(|e| not_found_or_io(path, e))?
            .len();
        Self::open_embedded(path, 0, length, names, config)
    }

    /// Open a pack stored at `base_offset..base_offset + length` inside `path`
    pub fn open_embedded(
        path: impl AsRef<Path>,
        base_offset: u64,
        length: u64,
        names: Arc<NameRegistry>,
        config: PackConfig,
    ) -> Result<Arc<Self>> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).map_err(|e| not_found_or_io(&path, e))?;

        if length < EOCD_SIZE {
            return Err(PackError::InvalidFormat(format!(
                "{} is too small to be a pack ({length} bytes)",
                path.display()
            )));
        }

        let location = locate_directory(&mut file, base_offset, length)?;
        if location.offset.saturating_add(location.size) > length {
            return Err(PackError::InvalidFormat(format!(
                "Central directory at {} ({} bytes) lies outside the pack",
                location.offset, location.size
            )));
        }

        let mut directory = vec![0u8; location.size as usize];
        file.seek(SeekFrom::Start(base_offset + location.offset))?;
        file.read_exact(&mut directory)?;

        let symbol = names.intern(&fix_slashes(&path.to_string_lossy()));
        let parsed = parse_directory(&directory, location, &names)?;

        let preload = match parsed.preload {
            Some((offset, size)) if config.load_preload => {
                let mut raw = vec![0u8; size as usize];
                file.seek(SeekFrom::Start(base_offset + offset))?;
                file.read_exact(&mut raw)?;
                Some(PreloadSection::parse(Bytes::from(raw))?)
            }
            _ => None,
        };

        let entries = parsed
            .entries
            .into_iter()
            .map(|(central_index, mut entry)| {
                // preload bytes are only served for stored entries
                if entry.method == CompressionMethod::Stored {
                    entry.preload_index =
                        preload.as_ref().and_then(|p| p.preload_index(central_index));
                }
                entry
            })
            .collect();

        let archive = Self {
            path,
            symbol,
            names,
            base_offset,
            length,
            config,
            handle: Mutex::new(NativeHandle::default()),
            preload,
            entries: EntryTable::new(entries),
        };

        debug!(
            "Opened pack {} at base {:#x}: {} entries, preload {}",
            archive.path.display(),
            base_offset,
            archive.entries.len(),
            if archive.preload.is_some() { "yes" } else { "no" }
        );

        Ok(Arc::new(archive))
    }

    /// Path of the file holding the pack
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Interned path of the pack
    pub const fn symbol(&self) -> Symbol {
        self.symbol
    }

    /// Path of the pack as a `/`-separated string
    pub fn name(&self) -> Arc<str> {
        self.names
            .resolve(self.symbol)
            .unwrap_or_else(|| Arc::from(self.path.to_string_lossy().as_ref()))
    }

    /// Offset of the pack inside its file
    pub const fn base_offset(&self) -> u64 {
        self.base_offset
    }

    /// Length of the pack in bytes
    pub const fn length(&self) -> u64 {
        self.length
    }

    /// Configuration the archive was opened with
    pub const fn config(&self) -> &PackConfig {
        &self.config
    }

    /// Preload section, when the pack has one and it was loaded
    pub const fn preload(&self) -> Option<&PreloadSection> {
        self.preload.as_ref()
    }

    /// Number of entries, excluding the preload section
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the pack has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by name
    pub fn find(&self, name: &str) -> Option<&PackEntry> {
        self.entries
            .find(&fix_slashes(name), &self.names)
            .map(|(_, entry)| entry)
    }

    /// Check whether the pack contains `name`
    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Iterate entries together with their names
    pub fn entries(&self) -> impl Iterator<Item = (Arc<str>, &PackEntry)> {
        self.entries
            .iter()
            .filter_map(|entry| Some((self.names.resolve(entry.name)?, entry)))
    }

    /// Number of native handle users
    pub fn open_count(&self) -> usize {
        self.handle.lock().open_count
    }

    /// Open the native handle, keeping it open while the guard lives
    pub fn acquire(self: &Arc<Self>) -> Result<OpenGuard> {
        let mut handle = self.handle.lock();
        if handle.file.is_none() {
            handle.file = Some(File::open(&self.path).map_err(|e| not_found_or_io(&self.path, e))?);
            trace!("Opened native handle for {}", self.path.display());
        }
        handle.open_count += 1;
        drop(handle);

        Ok(OpenGuard {
            archive: Arc::clone(self),
        })
    }

    /// Open an entry for reading
    pub fn open_file(self: &Arc<Self>, name: &str) -> Result<PackFile> {
        let entry = self
            .find(name)
            .cloned()
            .ok_or_else(|| PackError::NotFound(name.to_string()))?;
        let guard = self.acquire()?;
        PackFile::open(guard, entry)
    }

    /// Read stored bytes of `entry` starting at `local_offset`
    ///
    /// For LZMA entries `local_offset` addresses the compressed stream. The
    /// preload section answers the request when it covers the whole range;
    /// everything else seeks the shared native handle under the archive lock.
    pub fn read_at(&self, entry: &PackEntry, local_offset: u64, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if let (Some(preload), Some(index)) = (&self.preload, entry.preload_index) {
            if let Some(read) = preload.read(index, local_offset, buf) {
                trace!("Preload read: {} bytes at {local_offset}", read);
                return Ok(read);
            }
        }

        let position = self.base_offset + entry.offset + local_offset;
        let mut handle = self.handle.lock();
        let keep_open = handle.open_count > 0;
        if handle.file.is_none() {
            handle.file = Some(File::open(&self.path)?);
        }
        let file = handle
            .file
            .as_mut()
            .ok_or_else(|| PackError::Io(ErrorKind::NotFound.into()))?;

        file.seek(SeekFrom::Start(position))?;
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(read) => filled += read,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }

        if !keep_open {
            handle.file = None;
        }
        drop(handle);

        if filled < buf.len() {
            warn!(
                "Short read from {}: wanted {} bytes at {position}, got {filled}",
                self.path.display(),
                buf.len()
            );
        }
        Ok(filled)
    }

    /// List entries and implied directories matching a FindFirst-style wildcard
    ///
    /// Returns `(directories, files)`, both sorted.
    pub fn file_and_dir_lists(&self, wildcard: &str) -> (Vec<String>, Vec<String>) {
        let wildcard = Wildcard::parse(wildcard);
        let mut directories = BTreeSet::new();
        let mut files = BTreeSet::new();

        for (name, _) in self.entries() {
            match wildcard.matches(&name) {
                Some(WildcardMatch::Directory(dir)) => {
                    directories.insert(dir);
                }
                Some(WildcardMatch::File(file)) => {
                    files.insert(file);
                }
                None => {}
            }
        }

        (
            directories.into_iter().collect(),
            files.into_iter().collect(),
        )
    }
}

fn not_found_or_io(path: &Path, err: std::io::Error) -> PackError {
    if err.kind() == ErrorKind::NotFound {
        PackError::NotFound(path.display().to_string())
    } else {
        PackError::Io(err)
    }
}

/// Find the end of central directory record and resolve Zip64 totals
fn locate_directory(file: &mut File, base_offset: u64, length: u64) -> Result<DirectoryLocation> {
    let tail_len = length.min(EOCD_SIZE + MAX_COMMENT_LENGTH);
    let tail_start = length - tail_len;
    let mut tail = vec![0u8; tail_len as usize];
    file.seek(SeekFrom::Start(base_offset + tail_start))?;
    file.read_exact(&mut tail)?;

    let signature = EOCD_SIGNATURE.to_le_bytes();
    let eocd_at = (0..=tail.len() - EOCD_SIZE as usize)
        .rev()
        .find(|&i| tail[i..i + 4] == signature)
        .ok_or_else(|| {
            PackError::InvalidFormat("End of central directory record not found".into())
        })?;

    let eocd: EndOfCentralDirectory = Cursor::new(&tail[eocd_at..]).read_le()?;
    let comment_start = eocd_at + EOCD_SIZE as usize;
    let comment_end = (comment_start + eocd.comment_length as usize).min(tail.len());
    let packed_layout = tail[comment_start..comment_end]
        .get(..PACKED_DIRECTORY_COMMENT.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(PACKED_DIRECTORY_COMMENT));

    let mut location = DirectoryLocation {
        entries: u64::from(eocd.entries_total),
        size: u64::from(eocd.directory_size),
        offset: u64::from(eocd.directory_offset),
        packed_layout,
    };

    let locator_at = (eocd_at as u64).checked_sub(ZIP64_LOCATOR_SIZE);
    let locator = locator_at
        .map(|at| at as usize)
        .filter(|&at| tail[at..at + 4] == ZIP64_LOCATOR_SIGNATURE.to_le_bytes());

    if let Some(at) = locator {
        let locator: Zip64Locator = Cursor::new(&tail[at..]).read_le()?;
        file.seek(SeekFrom::Start(base_offset + locator.record_offset))?;
        let record: Zip64EndOfCentralDirectory = file.read_le()?;
        location.entries = record.entries_total;
        location.size = record.directory_size;
        location.offset = record.directory_offset;
        trace!("Using Zip64 end of central directory at {}", locator.record_offset);
    } else if eocd.needs_zip64() {
        return Err(PackError::InvalidFormat(
            "End of central directory defers to a missing Zip64 record".into(),
        ));
    }

    Ok(location)
}

struct ParsedDirectory {
    /// (central directory index, entry)
    entries: Vec<(usize, PackEntry)>,
    /// (offset, size) of the preload section payload
    preload: Option<(u64, u64)>,
}

fn parse_directory(
    directory: &[u8],
    location: DirectoryLocation,
    names: &NameRegistry,
) -> Result<ParsedDirectory> {
    // every entry needs at least a fixed header inside the directory
    if location.entries > (directory.len() / CENTRAL_HEADER_SIZE) as u64 {
        return Err(PackError::InvalidFormat(format!(
            "Central directory of {} bytes cannot hold {} entries",
            directory.len(),
            location.entries
        )));
    }
    let mut parsed = ParsedDirectory {
        entries: Vec::with_capacity(location.entries as usize),
        preload: None,
    };
    let mut position = 0usize;

    for index in 0..location.entries as usize {
        let fixed = directory
            .get(position..position + CENTRAL_HEADER_SIZE)
            .ok_or_else(|| {
                PackError::InvalidFormat(format!("Central directory truncated at entry {index}"))
            })?;
        let header: CentralDirectoryHeader = Cursor::new(fixed).read_le()?;
        if header.signature != CENTRAL_HEADER_SIGNATURE {
            return Err(PackError::InvalidFormat(format!(
                "Invalid central directory signature {:#010x} at entry {index}",
                header.signature
            )));
        }
        position += CENTRAL_HEADER_SIZE;

        let name_len = header.file_name_length as usize;
        let extra_len = header.extra_field_length as usize;
        let raw_name = directory.get(position..position + name_len).ok_or_else(|| {
            PackError::InvalidFormat(format!("Entry {index} name runs past the directory"))
        })?;
        let name = fix_slashes(&String::from_utf8_lossy(raw_name));
        position += name_len;

        let mut compressed_size = u64::from(header.compressed_size);
        let mut original_size = u64::from(header.uncompressed_size);
        let mut local_offset = u64::from(header.local_header_offset);

        if !location.packed_layout {
            let extra = directory.get(position..position + extra_len).unwrap_or_default();
            apply_zip64_extra(
                extra,
                &mut original_size,
                &mut compressed_size,
                &mut local_offset,
            );
            position += extra_len + header.file_comment_length as usize;
        }

        let data_offset =
            local_offset + LOCAL_HEADER_SIZE + name_len as u64 + extra_len as u64;

        if index == 0 && name.eq_ignore_ascii_case(PRELOAD_SECTION_NAME) {
            parsed.preload = Some((data_offset, original_size));
            continue;
        }

        let method = CompressionMethod::from_id(header.compression_method)?;
        parsed.entries.push((
            index,
            PackEntry {
                name: names.intern(&name),
                hash: caseless_hash(&name),
                offset: data_offset,
                original_size,
                compressed_size,
                method,
                crc32: header.crc32,
                preload_index: None,
            },
        ));
    }

    Ok(parsed)
}

/// Replace 32-bit markers with their Zip64 extra values, in field order
fn apply_zip64_extra(extra: &[u8], original: &mut u64, compressed: &mut u64, offset: &mut u64) {
    let Some(mut body) = zip64_extra(extra) else {
        return;
    };

    for field in [original, compressed, offset] {
        if *field != u64::from(ZIP64_MARKER_32) {
            continue;
        }
        let Some((value, rest)) = body.split_first_chunk::<8>() else {
            return;
        };
        *field = u64::from_le_bytes(*value);
        body = rest;
    }
}
