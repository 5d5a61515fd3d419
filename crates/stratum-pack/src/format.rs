//! On-disk records of the pack archive format
//!
//! Packs are ZIP files. Only the records the reader and builder need are
//! modelled here:
//!
//! - Local file header (`PK\x03\x04`), 30 bytes plus name and extra field
//! - Central directory header (`PK\x01\x02`), 46 bytes plus name, extra, comment
//! - End of central directory (`PK\x05\x06`), 22 bytes plus comment
//! - Zip64 end of central directory record and locator
//! - The preload section header and directory stored in the first entry
//! - The ZIP LZMA properties header and the standalone `LZMA` blob header
//!
//! All multi-byte fields are little-endian regardless of host order.

use binrw::{BinRead, BinWrite};

/// Local file header signature `PK\x03\x04`
pub const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;
/// Central directory header signature `PK\x01\x02`
pub const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4b50;
/// End of central directory signature `PK\x05\x06`
pub const EOCD_SIGNATURE: u32 = 0x0605_4b50;
/// Zip64 end of central directory record signature `PK\x06\x06`
pub const ZIP64_EOCD_SIGNATURE: u32 = 0x0606_4b50;
/// Zip64 end of central directory locator signature `PK\x06\x07`
pub const ZIP64_LOCATOR_SIGNATURE: u32 = 0x0706_4b50;

/// Fixed part of a local file header
pub const LOCAL_HEADER_SIZE: u64 = 30;
/// Fixed part of a central directory header
pub const CENTRAL_HEADER_SIZE: usize = 46;
/// Fixed part of the end of central directory record
pub const EOCD_SIZE: u64 = 22;
/// Size of the Zip64 end of central directory locator
pub const ZIP64_LOCATOR_SIZE: u64 = 20;
/// Longest comment an end of central directory record can carry
pub const MAX_COMMENT_LENGTH: u64 = 0xFFFF;

/// Extra field id of the Zip64 extended information block
pub const ZIP64_EXTRA_ID: u16 = 0x0001;
/// Marker stored in 32-bit fields whose real value lives in the Zip64 extra
pub const ZIP64_MARKER_32: u32 = 0xFFFF_FFFF;
/// Marker stored in 16-bit counts whose real value lives in the Zip64 record
pub const ZIP64_MARKER_16: u16 = 0xFFFF;

/// Comment prefix selecting the packed central directory layout
pub const PACKED_DIRECTORY_COMMENT: &[u8; 4] = b"XZP2";

/// Reserved name of the entry holding the preload section
pub const PRELOAD_SECTION_NAME: &str = "__preload_section.pre";
/// Preload section format version
pub const PRELOAD_HEADER_VERSION: u32 = 3;
/// Remap table value for entries without preload bytes
pub const INVALID_PRELOAD_ENTRY: u16 = 0xFFFF;

/// Identifier of the standalone LZMA blob header
pub const LZMA_BLOB_ID: [u8; 4] = *b"LZMA";
/// Size of the standalone LZMA blob header
pub const LZMA_BLOB_HEADER_SIZE: usize = 17;
/// Number of LZMA property bytes (lc/lp/pb byte and dictionary size)
pub const LZMA_PROPS_SIZE: usize = 5;
/// Size of the ZIP LZMA header: version (2), properties size (2), properties (5)
pub const ZIP_LZMA_HEADER_SIZE: u64 = 9;

/// End of central directory record
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct EndOfCentralDirectory {
    /// Signature, always `PK\x05\x06`
    #[br(assert(signature == EOCD_SIGNATURE, "Invalid EOCD signature: {:#010x}", signature))]
    pub signature: u32,
    /// Number of this disk
    pub disk_number: u16,
    /// Disk where the central directory starts
    pub directory_disk: u16,
    /// Central directory entries on this disk
    pub entries_on_disk: u16,
    /// Central directory entries in total
    pub entries_total: u16,
    /// Size of the central directory in bytes
    pub directory_size: u32,
    /// Offset of the central directory from the start of the archive
    pub directory_offset: u32,
    /// Length of the trailing comment
    pub comment_length: u16,
}

impl EndOfCentralDirectory {
    /// Create a record for a single-disk archive
    pub fn new(entries: u16, directory_size: u32, directory_offset: u32) -> Self {
        Self {
            signature: EOCD_SIGNATURE,
            disk_number: 0,
            directory_disk: 0,
            entries_on_disk: entries,
            entries_total: entries,
            directory_size,
            directory_offset,
            comment_length: 0,
        }
    }

    /// Check whether any field defers to a Zip64 record
    pub const fn needs_zip64(&self) -> bool {
        self.entries_total == ZIP64_MARKER_16
            || self.directory_size == ZIP64_MARKER_32
            || self.directory_offset == ZIP64_MARKER_32
    }
}

/// Zip64 end of central directory locator, stored right before the EOCD
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct Zip64Locator {
    /// Signature, always `PK\x06\x07`
    #[br(assert(signature == ZIP64_LOCATOR_SIGNATURE, "Invalid Zip64 locator signature"))]
    pub signature: u32,
    /// Disk holding the Zip64 end of central directory record
    pub record_disk: u32,
    /// Offset of the Zip64 end of central directory record
    pub record_offset: u64,
    /// Total number of disks
    pub total_disks: u32,
}

/// Zip64 end of central directory record
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct Zip64EndOfCentralDirectory {
    /// Signature, always `PK\x06\x06`
    #[br(assert(signature == ZIP64_EOCD_SIGNATURE, "Invalid Zip64 EOCD signature"))]
    pub signature: u32,
    /// Size of the remaining record
    pub record_size: u64,
    /// Version made by
    pub version_made_by: u16,
    /// Version needed to extract
    pub version_needed: u16,
    /// Number of this disk
    pub disk_number: u32,
    /// Disk where the central directory starts
    pub directory_disk: u32,
    /// Central directory entries on this disk
    pub entries_on_disk: u64,
    /// Central directory entries in total
    pub entries_total: u64,
    /// Size of the central directory in bytes
    pub directory_size: u64,
    /// Offset of the central directory
    pub directory_offset: u64,
}

impl Zip64EndOfCentralDirectory {
    /// Create a record for a single-disk archive
    pub fn new(entries: u64, directory_size: u64, directory_offset: u64) -> Self {
        Self {
            signature: ZIP64_EOCD_SIGNATURE,
            record_size: 44,
            version_made_by: 45,
            version_needed: 45,
            disk_number: 0,
            directory_disk: 0,
            entries_on_disk: entries,
            entries_total: entries,
            directory_size,
            directory_offset,
        }
    }
}

/// Central directory file header (fixed part)
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct CentralDirectoryHeader {
    /// Signature, `PK\x01\x02` for a valid header
    pub signature: u32,
    /// Version made by
    pub version_made_by: u16,
    /// Version needed to extract
    pub version_needed: u16,
    /// General purpose flags
    pub flags: u16,
    /// Compression method (0 stored, 14 LZMA)
    pub compression_method: u16,
    /// DOS modification time
    pub modified_time: u16,
    /// DOS modification date
    pub modified_date: u16,
    /// CRC-32 of the uncompressed data
    pub crc32: u32,
    /// Compressed size, or the Zip64 marker
    pub compressed_size: u32,
    /// Uncompressed size, or the Zip64 marker
    pub uncompressed_size: u32,
    /// Length of the file name
    pub file_name_length: u16,
    /// Length of the extra field
    pub extra_field_length: u16,
    /// Length of the file comment
    pub file_comment_length: u16,
    /// Disk where the file starts
    pub disk_number_start: u16,
    /// Internal file attributes
    pub internal_attributes: u16,
    /// External file attributes
    pub external_attributes: u32,
    /// Offset of the local header, or the Zip64 marker
    pub local_header_offset: u32,
}

/// Local file header (fixed part)
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct LocalFileHeader {
    /// Signature, always `PK\x03\x04`
    #[br(assert(signature == LOCAL_HEADER_SIGNATURE, "Invalid local header signature"))]
    pub signature: u32,
    /// Version needed to extract
    pub version_needed: u16,
    /// General purpose flags
    pub flags: u16,
    /// Compression method
    pub compression_method: u16,
    /// DOS modification time
    pub modified_time: u16,
    /// DOS modification date
    pub modified_date: u16,
    /// CRC-32 of the uncompressed data
    pub crc32: u32,
    /// Compressed size
    pub compressed_size: u32,
    /// Uncompressed size
    pub uncompressed_size: u32,
    /// Length of the file name
    pub file_name_length: u16,
    /// Length of the extra field
    pub extra_field_length: u16,
}

/// Header at the start of the preload section
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct PreloadHeader {
    /// Format version, [`PRELOAD_HEADER_VERSION`]
    pub version: u32,
    /// Number of central directory entries covered by the remap table
    pub directory_entries: u32,
    /// Number of preload directory entries
    pub preload_directory_entries: u32,
    /// Alignment the section was written with
    pub alignment: u32,
}

impl PreloadHeader {
    /// Serialized size of the header
    pub const SIZE: usize = 16;
}

/// One preload directory entry: where an entry's preloaded bytes live
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct PreloadDirectoryEntry {
    /// Number of preloaded bytes (compressed size for `LZMA` blobs)
    pub length: u32,
    /// Offset from the start of the preload data
    pub data_offset: u32,
}

impl PreloadDirectoryEntry {
    /// Serialized size of an entry
    pub const SIZE: usize = 8;
}

/// Header of a standalone LZMA blob, used for compressed preload bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct LzmaBlobHeader {
    /// Identifier, always `LZMA`
    #[br(assert(id == LZMA_BLOB_ID, "Invalid LZMA blob id: {:?}", id))]
    pub id: [u8; 4],
    /// Size of the decoded data
    pub actual_size: u32,
    /// Size of the encoded stream after this header
    pub lzma_size: u32,
    /// LZMA properties
    pub properties: [u8; LZMA_PROPS_SIZE],
}

impl LzmaBlobHeader {
    /// Check whether `data` starts with a blob header
    pub fn is_blob(data: &[u8]) -> bool {
        data.len() >= LZMA_BLOB_HEADER_SIZE && data[..4] == LZMA_BLOB_ID
    }
}

/// Header preceding the raw stream of a method 14 entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct ZipLzmaHeader {
    /// Major version of the encoder
    pub major_version: u8,
    /// Minor version of the encoder
    pub minor_version: u8,
    /// Size of the properties that follow
    #[br(assert(properties_size as usize == LZMA_PROPS_SIZE, "Unexpected LZMA properties size: {}", properties_size))]
    pub properties_size: u16,
    /// LZMA properties
    pub properties: [u8; LZMA_PROPS_SIZE],
}

/// Walk an extra field and return the Zip64 block payload, if any
pub fn zip64_extra(extra: &[u8]) -> Option<&[u8]> {
    let mut rest = extra;
    while rest.len() >= 4 {
        let id = u16::from_le_bytes([rest[0], rest[1]]);
        let size = u16::from_le_bytes([rest[2], rest[3]]) as usize;
        let body = rest.get(4..4 + size)?;
        if id == ZIP64_EXTRA_ID {
            return Some(body);
        }
        rest = &rest[4 + size..];
    }
    None
}
