//! Level (BSP) file header and the pack embedded in it

use crate::error::{PackError, Result};
use binrw::{BinRead, BinReaderExt, BinWrite, BinWriterExt};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::ops::RangeInclusive;
use std::path::Path;

/// Level file identifier
pub const BSP_IDENT: [u8; 4] = *b"VBSP";
/// Level file versions that may carry an embedded pack
pub const SUPPORTED_BSP_VERSIONS: RangeInclusive<i32> = 19..=21;
/// Number of lumps in the header
pub const LUMP_COUNT: usize = 64;
/// Lump holding the embedded pack
pub const LUMP_PAKFILE: usize = 40;
/// Serialized size of [`BspHeader`]
pub const BSP_HEADER_SIZE: u64 = 4 + 4 + LUMP_COUNT as u64 * 16 + 4;

/// One lump directory entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct BspLump {
    /// Offset of the lump from the start of the file
    pub offset: i32,
    /// Length of the lump in bytes
    pub length: i32,
    /// Lump format version
    pub version: i32,
    /// Lump identifier, usually zero
    pub four_cc: [u8; 4],
}

/// Level file header
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct BspHeader {
    /// Always `VBSP`
    #[br(assert(ident == BSP_IDENT, "Invalid level file ident: {:?}", ident))]
    pub ident: [u8; 4],
    /// Format version
    pub version: i32,
    /// Lump directory
    pub lumps: [BspLump; LUMP_COUNT],
    /// Revision number of the map
    pub map_revision: i32,
}

impl BspHeader {
    /// Create a header with empty lumps
    pub fn new(version: i32, map_revision: i32) -> Self {
        Self {
            ident: BSP_IDENT,
            version,
            lumps: [BspLump::default(); LUMP_COUNT],
            map_revision,
        }
    }

    /// Read and validate the header at the start of a level file
    pub fn read_from_path(path: &Path) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let header: Self = reader
            .read_le()
            .map_err(|e| PackError::InvalidLevel(format!("{}: {e}", path.display())))?;
        if !SUPPORTED_BSP_VERSIONS.contains(&header.version) {
            return Err(PackError::InvalidLevel(format!(
                "{}: unsupported version {}",
                path.display(),
                header.version
            )));
        }
        Ok(header)
    }

    /// Location of the embedded pack as `(offset, length)`
    ///
    /// Returns `None` when the lump is too small to hold any entries.
    pub fn pack_lump(&self) -> Result<Option<(u64, u64)>> {
        let lump = &self.lumps[LUMP_PAKFILE];
        let (Ok(offset), Ok(length)) = (u64::try_from(lump.offset), u64::try_from(lump.length))
        else {
            return Err(PackError::InvalidLevel(format!(
                "Negative pack lump bounds: offset {}, length {}",
                lump.offset, lump.length
            )));
        };

        // a lump no larger than its own directory entry holds no files
        if length <= 16 {
            return Ok(None);
        }
        Ok(Some((offset, length)))
    }
}

/// Read the embedded pack location of a level file
pub fn read_pack_lump(path: &Path) -> Result<Option<(u64, u64)>> {
    BspHeader::read_from_path(path)?.pack_lump()
}

/// Write a minimal level file whose pack lump holds `pack`
pub fn write_level_file(path: &Path, version: i32, pack: &[u8]) -> Result<()> {
    let mut header = BspHeader::new(version, 1);
    if !pack.is_empty() {
        header.lumps[LUMP_PAKFILE] = BspLump {
            offset: i32::try_from(BSP_HEADER_SIZE)
                .map_err(|_| PackError::InvalidLevel("Header offset overflow".into()))?,
            length: i32::try_from(pack.len())
                .map_err(|_| PackError::InvalidLevel("Pack lump exceeds 2 GiB".into()))?,
            version: 0,
            four_cc: [0; 4],
        };
    }

    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_le(&header)?;
    writer.write_all(pack)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_header_size() {
        let mut cursor = binrw::io::Cursor::new(Vec::new());
        cursor.write_le(&BspHeader::new(20, 7)).unwrap();
        assert_eq!(cursor.into_inner().len() as u64, BSP_HEADER_SIZE);
    }

    #[test]
    fn test_pack_lump_location() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("level.bsp");
        write_level_file(&path, 20, &[7u8; 64]).unwrap();

        let lump = read_pack_lump(&path).unwrap();
        assert_eq!(lump, Some((BSP_HEADER_SIZE, 64)));
    }

    #[test]
    fn test_tiny_lump_means_no_pack() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("level.bsp");
        write_level_file(&path, 19, &[0u8; 16]).unwrap();
        assert_eq!(read_pack_lump(&path).unwrap(), None);
    }

    #[test]
    fn test_rejects_bad_ident_and_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("old.bsp");
        write_level_file(&path, 17, &[]).unwrap();
        assert!(matches!(
            read_pack_lump(&path),
            Err(PackError::InvalidLevel(_))
        ));

        let junk = dir.path().join("junk.bsp");
        std::fs::write(&junk, vec![0u8; 2048]).unwrap();
        assert!(matches!(
            read_pack_lump(&junk),
            Err(PackError::InvalidLevel(_))
        ));
    }
}
