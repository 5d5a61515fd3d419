//! Preload section: small leading chunks of entries kept in memory
//!
//! The section is the payload of the first entry in the archive. Its layout:
//!
//! ```text
//! PreloadHeader                      16 bytes
//! PreloadDirectoryEntry × N           8 bytes each
//! remap u16 × directory_entries      central index -> preload index
//! preload data
//! ```

use crate::error::{PackError, Result};
use crate::format::{
    INVALID_PRELOAD_ENTRY, LZMA_BLOB_HEADER_SIZE, LzmaBlobHeader, PRELOAD_HEADER_VERSION,
    PreloadDirectoryEntry, PreloadHeader,
};
use crate::lzma;
use binrw::BinReaderExt;
use binrw::io::Cursor;
use bytes::Bytes;
use tracing::warn;

/// Parsed preload section
#[derive(Debug, Clone)]
pub struct PreloadSection {
    header: PreloadHeader,
    directory: Vec<PreloadDirectoryEntry>,
    remap: Vec<u16>,
    data: Bytes,
}

impl PreloadSection {
    /// Parse a section from its raw bytes
    pub fn parse(raw: Bytes) -> Result<Self> {
        let mut cursor = Cursor::new(raw.as_ref());
        let header: PreloadHeader = cursor.read_le()?;
        if header.version != PRELOAD_HEADER_VERSION {
            return Err(PackError::InvalidFormat(format!(
                "Unsupported preload section version {}",
                header.version
            )));
        }

        let directory_len = header.preload_directory_entries as usize;
        let remap_len = header.directory_entries as usize;
        let data_start = PreloadHeader::SIZE
            + directory_len * PreloadDirectoryEntry::SIZE
            + remap_len * 2;
        if data_start > raw.len() {
            return Err(PackError::InvalidFormat(format!(
                "Preload section truncated: tables need {data_start} bytes, have {}",
                raw.len()
            )));
        }

        let mut directory = Vec::with_capacity(directory_len);
        for _ in 0..directory_len {
            directory.push(cursor.read_le::<PreloadDirectoryEntry>()?);
        }
        let mut remap = Vec::with_capacity(remap_len);
        for _ in 0..remap_len {
            remap.push(cursor.read_le::<u16>()?);
        }

        let data = raw.slice(data_start..);
        for (index, entry) in directory.iter().enumerate() {
            let end = u64::from(entry.data_offset) + u64::from(entry.length);
            if end > data.len() as u64 {
                return Err(PackError::InvalidFormat(format!(
                    "Preload entry {index} extends past the section ({end} > {})",
                    data.len()
                )));
            }
        }

        Ok(Self {
            header,
            directory,
            remap,
            data,
        })
    }

    /// Section header
    pub const fn header(&self) -> &PreloadHeader {
        &self.header
    }

    /// Preload directory index of a central directory entry
    pub fn preload_index(&self, central_index: usize) -> Option<u16> {
        self.remap
            .get(central_index)
            .copied()
            .filter(|&index| index != INVALID_PRELOAD_ENTRY)
            .filter(|&index| (index as usize) < self.directory.len())
    }

    /// Stored bytes of a preload entry, possibly an `LZMA` blob
    pub fn raw(&self, index: u16) -> Option<&[u8]> {
        let entry = self.directory.get(index as usize)?;
        let start = entry.data_offset as usize;
        self.data.get(start..start + entry.length as usize)
    }

    /// Number of decoded bytes available for a preload entry
    pub fn decoded_len(&self, index: u16) -> usize {
        match self.raw(index) {
            Some(raw) if LzmaBlobHeader::is_blob(raw) => blob_header(raw)
                .map_or(0, |header| header.actual_size as usize),
            Some(raw) => raw.len(),
            None => 0,
        }
    }

    /// Copy preloaded bytes at `offset` into `buf`
    ///
    /// Returns `None` when the request does not lie fully inside the preload
    /// bytes, in which case the caller falls back to the archive handle.
    pub fn read(&self, index: u16, offset: u64, buf: &mut [u8]) -> Option<usize> {
        let raw = self.raw(index)?;
        let end = offset.checked_add(buf.len() as u64)?;

        if !LzmaBlobHeader::is_blob(raw) {
            if end > raw.len() as u64 {
                return None;
            }
            let start = offset as usize;
            buf.copy_from_slice(&raw[start..start + buf.len()]);
            return Some(buf.len());
        }

        let header = blob_header(raw)?;
        let actual = u64::from(header.actual_size);
        if end > actual {
            return None;
        }
        let stream_end = (LZMA_BLOB_HEADER_SIZE + header.lzma_size as usize).min(raw.len());
        let stream = &raw[LZMA_BLOB_HEADER_SIZE..stream_end];

        let decoded = if offset == 0 && end == actual {
            // whole blob requested: decode straight into the caller buffer
            lzma::decompress_into(&header.properties, stream, buf)
        } else {
            lzma::decompress(&header.properties, stream, actual as usize).map(|scratch| {
                let start = offset as usize;
                buf.copy_from_slice(&scratch[start..start + buf.len()]);
                buf.len()
            })
        };

        match decoded {
            Ok(read) if read == buf.len() => Some(read),
            Ok(read) => {
                warn!("Compressed preload entry {index} decoded short: {read} bytes");
                None
            }
            Err(e) => {
                warn!("Compressed preload entry {index} failed to decode: {e}");
                None
            }
        }
    }
}

fn blob_header(raw: &[u8]) -> Option<LzmaBlobHeader> {
    Cursor::new(raw).read_le::<LzmaBlobHeader>().ok()
}

/// Serialize a preload section
///
/// `remap` maps central directory indices to positions in `chunks`; each
/// chunk is written as-is (callers wrap compressed chunks in a blob header).
pub fn build_section(remap: &[u16], chunks: &[Vec<u8>], alignment: u32) -> Vec<u8> {
    let mut out = Vec::new();
    let header = [
        PRELOAD_HEADER_VERSION,
        remap.len() as u32,
        chunks.len() as u32,
        alignment,
    ];
    for field in header {
        out.extend_from_slice(&field.to_le_bytes());
    }

    let mut offset = 0u32;
    for chunk in chunks {
        out.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
        out.extend_from_slice(&offset.to_le_bytes());
        offset += chunk.len() as u32;
    }
    for index in remap {
        out.extend_from_slice(&index.to_le_bytes());
    }
    for chunk in chunks {
        out.extend_from_slice(chunk);
    }
    out
}

/// Wrap `data` in an `LZMA` blob
pub fn compress_blob(data: &[u8]) -> Result<Vec<u8>> {
    let (properties, stream) = lzma::compress(data, 6)?;
    let mut out = Vec::with_capacity(LZMA_BLOB_HEADER_SIZE + stream.len());
    out.extend_from_slice(b"LZMA");
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(&(stream.len() as u32).to_le_bytes());
    out.extend_from_slice(&properties);
    out.extend_from_slice(&stream);
    Ok(out)
}
