//! Readable, seekable handles to pack entries

use crate::archive::OpenGuard;
use crate::entry::{CompressionMethod, PackEntry};
use crate::error::{PackError, Result};
use crate::format::{ZIP_LZMA_HEADER_SIZE, ZipLzmaHeader};
use crate::lzma::LzmaDecoder;
use binrw::BinReaderExt;
use binrw::io::Cursor;
use std::collections::VecDeque;
use std::io::{self, Read, Seek, SeekFrom};
use tracing::warn;

/// Largest chunk decoded and thrown away per step of a forward seek
const SEEK_DISCARD_CHUNK: usize = 1024;

/// Open entry of a pack archive
#[derive(Debug)]
pub enum PackFile {
    /// Entry stored without compression
    Stored(StoredFile),
    /// LZMA-compressed entry
    Lzma(LzmaFile),
}

impl PackFile {
    pub(crate) fn open(guard: OpenGuard, entry: PackEntry) -> Result<Self> {
        match entry.method {
            CompressionMethod::Stored => Ok(Self::Stored(StoredFile {
                guard,
                entry,
                position: 0,
            })),
            CompressionMethod::Lzma => LzmaFile::new(guard, entry).map(Self::Lzma),
        }
    }

    /// Decoded size of the entry
    pub fn size(&self) -> u64 {
        match self {
            Self::Stored(file) => file.entry.original_size,
            Self::Lzma(file) => file.entry.original_size,
        }
    }

    /// Current logical position
    pub fn position(&self) -> u64 {
        match self {
            Self::Stored(file) => file.position,
            Self::Lzma(file) => file.position,
        }
    }

    /// Entry this handle reads
    pub fn entry(&self) -> &PackEntry {
        match self {
            Self::Stored(file) => &file.entry,
            Self::Lzma(file) => &file.entry,
        }
    }

    /// Read the rest of the entry into a vector
    pub fn read_remaining(&mut self) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity((self.size() - self.position()) as usize);
        self.read_to_end(&mut data)?;
        Ok(data)
    }
}

impl Read for PackFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Stored(file) => file.read(buf),
            Self::Lzma(file) => file.read(buf),
        }
    }
}

impl Seek for PackFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Self::Stored(file) => file.seek(pos),
            Self::Lzma(file) => file.seek(pos),
        }
    }
}

/// Resolve a seek request against a size, clamping to `[0, size]`
fn target(pos: SeekFrom, current: u64, size: u64) -> u64 {
    let target = match pos {
        SeekFrom::Start(offset) => i128::from(offset),
        SeekFrom::Current(delta) => i128::from(current) + i128::from(delta),
        SeekFrom::End(delta) => i128::from(size) + i128::from(delta),
    };
    target.clamp(0, i128::from(size)) as u64
}

/// Handle to a stored entry
#[derive(Debug)]
pub struct StoredFile {
    guard: OpenGuard,
    entry: PackEntry,
    position: u64,
}

impl Read for StoredFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.entry.original_size - self.position;
        let wanted = (buf.len() as u64).min(remaining) as usize;
        let read = self
            .guard
            .archive()
            .read_at(&self.entry, self.position, &mut buf[..wanted])
            .map_err(io::Error::other)?;
        self.position += read as u64;
        Ok(read)
    }
}

impl Seek for StoredFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.position = target(pos, self.position, self.entry.original_size);
        Ok(self.position)
    }
}

/// Handle to an LZMA entry with a bounded backward-seek window
///
/// Decoded output is mirrored into a ring of the most recent bytes. Backward
/// seeks that stay inside the ring replay from it; longer ones restart the
/// decoder from the start of the entry.
pub struct LzmaFile {
    guard: OpenGuard,
    entry: PackEntry,
    properties: [u8; 5],
    decoder: LzmaDecoder,
    /// Logical position in the decoded entry
    position: u64,
    /// Position in the compressed stream, after the ZIP LZMA header
    stream_position: u64,
    /// Most recently decoded bytes, oldest first
    backseek: VecDeque<u8>,
    backseek_capacity: usize,
    /// Bytes at the end of `backseek` that lie after `position`
    backseek_pending: usize,
    read_buffer: Vec<u8>,
    read_start: usize,
    read_end: usize,
}

impl std::fmt::Debug for LzmaFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LzmaFile")
            .field("entry", &self.entry)
            .field("position", &self.position)
            .field("stream_position", &self.stream_position)
            .field("backseek", &self.backseek.len())
            .field("backseek_pending", &self.backseek_pending)
            .finish_non_exhaustive()
    }
}

impl LzmaFile {
    fn new(guard: OpenGuard, entry: PackEntry) -> Result<Self> {
        if entry.compressed_size < ZIP_LZMA_HEADER_SIZE {
            return Err(PackError::InvalidFormat(format!(
                "LZMA entry is smaller than its header ({} bytes)",
                entry.compressed_size
            )));
        }

        let mut raw = [0u8; ZIP_LZMA_HEADER_SIZE as usize];
        let read = guard.archive().read_at(&entry, 0, &mut raw)?;
        if read != raw.len() {
            return Err(PackError::InvalidFormat("Truncated ZIP LZMA header".into()));
        }
        let header: ZipLzmaHeader = Cursor::new(&raw[..]).read_le()?;

        let config = guard.archive().config();
        let backseek_capacity = config.backseek_buffer_size;
        let read_buffer = vec![0u8; config.read_buffer_size.max(1)];
        let decoder = LzmaDecoder::new(&header.properties, entry.original_size)?;

        Ok(Self {
            guard,
            properties: header.properties,
            decoder,
            position: 0,
            stream_position: 0,
            backseek: VecDeque::with_capacity(backseek_capacity),
            backseek_capacity,
            backseek_pending: 0,
            read_buffer,
            read_start: 0,
            read_end: 0,
            entry,
        })
    }

    /// Bytes of decoded history available for a backward seek
    pub fn backseek_available(&self) -> usize {
        self.backseek.len() - self.backseek_pending
    }

    fn stream_size(&self) -> u64 {
        self.entry.compressed_size - ZIP_LZMA_HEADER_SIZE
    }

    /// Restart decoding from the start of the entry
    fn reset(&mut self) -> Result<()> {
        self.decoder = LzmaDecoder::new(&self.properties, self.entry.original_size)?;
        self.position = 0;
        self.stream_position = 0;
        self.backseek.clear();
        self.backseek_pending = 0;
        self.read_start = 0;
        self.read_end = 0;
        Ok(())
    }

    /// Refill the read-ahead buffer once it is drained, returning bytes buffered
    fn fill_read_buffer(&mut self) -> Result<usize> {
        let buffered = self.read_end - self.read_start;
        let remaining = self.stream_size() - self.stream_position;
        if buffered > 0 || remaining == 0 {
            return Ok(buffered);
        }

        let refill = (self.read_buffer.len() as u64).min(remaining) as usize;
        let read = self.guard.archive().read_at(
            &self.entry,
            ZIP_LZMA_HEADER_SIZE + self.stream_position,
            &mut self.read_buffer[..refill],
        )?;
        self.stream_position += read as u64;
        self.read_start = 0;
        self.read_end = read;
        Ok(read)
    }

    fn remember(&mut self, decoded: &[u8]) {
        if self.backseek_capacity == 0 {
            return;
        }
        let keep = &decoded[decoded.len().saturating_sub(self.backseek_capacity)..];
        let overflow = (self.backseek.len() + keep.len()).saturating_sub(self.backseek_capacity);
        self.backseek.drain(..overflow);
        self.backseek.extend(keep);
    }

    fn read_decoded(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remaining = self.entry.original_size - self.position;
        let max_read = (buf.len() as u64).min(remaining) as usize;
        let mut filled = 0;

        // replay bytes rewound by an earlier backward seek
        if self.backseek_pending > 0 {
            let replay = self.backseek_pending.min(max_read);
            let start = self.backseek.len() - self.backseek_pending;
            for (slot, byte) in buf[..replay]
                .iter_mut()
                .zip(self.backseek.range(start..start + replay))
            {
                *slot = *byte;
            }
            self.backseek_pending -= replay;
            filled = replay;
        }

        let decode_from = filled;
        while filled < max_read {
            let buffered = self.fill_read_buffer()?;
            let input = &self.read_buffer[self.read_start..self.read_start + buffered];
            let (consumed, written) = self.decoder.decode(input, &mut buf[filled..max_read])?;
            self.read_start += consumed;
            filled += written;

            if consumed == 0 && written == 0 {
                warn!(
                    "LZMA stream stalled at {} of {} bytes",
                    self.position + filled as u64,
                    self.entry.original_size
                );
                break;
            }
        }

        let decoded = buf[decode_from..filled].to_vec();
        self.remember(&decoded);
        self.position += filled as u64;
        Ok(filled)
    }

    fn seek_to(&mut self, target: u64) -> Result<u64> {
        if target < self.position {
            let distance = (self.position - target) as usize;
            if distance <= self.backseek_available() {
                self.backseek_pending += distance;
                self.position = target;
                return Ok(self.position);
            }

            warn!(
                "LZMA seek back past the {} byte backseek window; replaying {} bytes",
                self.backseek_capacity, target
            );
            self.reset()?;
        }

        let mut discard = [0u8; SEEK_DISCARD_CHUNK];
        while self.position < target {
            let step = ((target - self.position) as usize).min(SEEK_DISCARD_CHUNK);
            if self.read_decoded(&mut discard[..step])? == 0 {
                warn!("LZMA seek could not reach position {target}");
                break;
            }
        }
        Ok(self.position)
    }
}

impl Read for LzmaFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.read_decoded(buf) {
            Ok(read) => Ok(read),
            Err(e) => {
                warn!("Reading from LZMA entry failed: {e}");
                Err(io::Error::other(e))
            }
        }
    }
}

impl Seek for LzmaFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = target(pos, self.position, self.entry.original_size);
        if target == self.position {
            return Ok(target);
        }
        self.seek_to(target).map_err(io::Error::other)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::archive::Archive;
    use crate::builder::PackBuilder;
    use crate::config::PackConfig;
    use crate::names::NameRegistry;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| ((i * 31 + i / 7) % 253) as u8).collect()
    }

    fn open(dir: &TempDir, data: &[u8], config: PackConfig) -> PackFile {
        let path = dir.path().join("lzma.zip");
        PackBuilder::new()
            .lzma("blob.bin", data.to_vec())
            .stored("plain.bin", data.to_vec())
            .write_to_path(&path)
            .unwrap();
        let archive = Archive::open(&path, Arc::new(NameRegistry::new()), config).unwrap();
        archive.open_file("blob.bin").unwrap()
    }

    #[test]
    fn test_lzma_read_all() {
        let dir = TempDir::new().unwrap();
        let data = sample(100_000);
        let mut file = open(&dir, &data, PackConfig::default());
        assert!(matches!(file, PackFile::Lzma(_)));
        assert_eq!(file.size(), data.len() as u64);
        assert_eq!(file.read_remaining().unwrap(), data);
        assert_eq!(file.position(), data.len() as u64);
    }

    #[test]
    fn test_lzma_backseek_within_window() {
        let dir = TempDir::new().unwrap();
        let data = sample(50_000);
        let mut file = open(&dir, &data, PackConfig::default().with_backseek_buffer_size(4096));

        let mut buf = vec![0u8; 10_000];
        file.read_exact(&mut buf).unwrap();
        file.seek(SeekFrom::Current(-3000)).unwrap();
        let mut again = vec![0u8; 5000];
        file.read_exact(&mut again).unwrap();
        assert_eq!(again, &data[7000..12_000]);
    }

    #[test]
    fn test_lzma_backseek_past_window_restarts() {
        let dir = TempDir::new().unwrap();
        let data = sample(50_000);
        let mut file = open(&dir, &data, PackConfig::default().with_backseek_buffer_size(1024));

        file.seek(SeekFrom::Start(40_000)).unwrap();
        file.seek(SeekFrom::Start(100)).unwrap();
        let mut buf = [0u8; 64];
        file.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..], &data[100..164]);
    }

    #[test]
    fn test_seek_clamps_to_bounds() {
        let dir = TempDir::new().unwrap();
        let data = sample(2000);
        let mut file = open(&dir, &data, PackConfig::default());
        assert_eq!(file.seek(SeekFrom::End(100)).unwrap(), 2000);
        assert_eq!(file.seek(SeekFrom::Current(-5000)).unwrap(), 0);

        let mut buf = [0u8; 16];
        assert_eq!(file.read(&mut buf).unwrap(), 16);
        assert_eq!(&buf[..], &data[..16]);
    }

    #[test]
    fn test_stored_seek_and_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stored.zip");
        PackBuilder::new()
            .stored("a.txt", b"0123456789".to_vec())
            .write_to_path(&path)
            .unwrap();
        let archive =
            Archive::open(&path, Arc::new(NameRegistry::new()), PackConfig::default()).unwrap();
        let mut file = archive.open_file("a.txt").unwrap();

        file.seek(SeekFrom::Start(6)).unwrap();
        let mut rest = String::new();
        file.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "6789");
        assert_eq!(file.seek(SeekFrom::End(5)).unwrap(), 10);
    }
}
