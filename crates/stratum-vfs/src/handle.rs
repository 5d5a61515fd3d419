//! Readable handles returned by the filesystem

use crate::store::ReadSeek;
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use stratum_pack::PackFile;

/// An open file from any mount kind
pub enum FileHandle {
    /// Loose file on disk
    Loose(File),
    /// Entry of a pack archive
    Pack(PackFile),
    /// File served by an external packed store
    Packed(Box<dyn ReadSeek>),
}

impl FileHandle {
    /// Size of the file in bytes
    pub fn size(&mut self) -> io::Result<u64> {
        match self {
            Self::Loose(file) => Ok(file.metadata()?.len()),
            Self::Pack(file) => Ok(file.size()),
            Self::Packed(stream) => {
                let position = stream.stream_position()?;
                let end = stream.seek(SeekFrom::End(0))?;
                stream.seek(SeekFrom::Start(position))?;
                Ok(end)
            }
        }
    }

    /// Read from the current position to the end
    pub fn read_remaining(&mut self) -> io::Result<Vec<u8>> {
        let mut data = Vec::new();
        self.read_to_end(&mut data)?;
        Ok(data)
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loose(file) => f.debug_tuple("Loose").field(file).finish(),
            Self::Pack(file) => f.debug_tuple("Pack").field(file).finish(),
            Self::Packed(_) => f.debug_tuple("Packed").finish_non_exhaustive(),
        }
    }
}

impl Read for FileHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Loose(file) => file.read(buf),
            Self::Pack(file) => file.read(buf),
            Self::Packed(stream) => stream.read(buf),
        }
    }
}

impl Seek for FileHandle {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Self::Loose(file) => file.seek(pos),
            Self::Pack(file) => file.seek(pos),
            Self::Packed(stream) => stream.seek(pos),
        }
    }
}
