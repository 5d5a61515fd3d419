//! LZMA stream coding on top of liblzma
//!
//! Pack entries store raw LZMA1 streams: five property bytes followed by the
//! encoded data, without the 13-byte `.lzma` container header. The decoder
//! below rebuilds that header (properties plus the known uncompressed size)
//! and feeds it to liblzma ahead of the first real input byte, which lets the
//! same incremental decoder serve both ZIP method 14 entries and preload
//! blobs.

use crate::error::{PackError, Result};
use crate::format::LZMA_PROPS_SIZE;
use xz2::stream::{Action, LzmaOptions, Status, Stream};

/// Size of the `.lzma` container header: properties plus u64 size
const ALONE_HEADER_SIZE: usize = LZMA_PROPS_SIZE + 8;

/// Memory limit handed to liblzma; dictionaries in packs stay far below this
const DECODER_MEMORY_LIMIT: u64 = 256 * 1024 * 1024;

/// Incremental decoder for one raw LZMA stream
pub struct LzmaDecoder {
    stream: Stream,
    header: Vec<u8>,
    output_size: u64,
    produced: u64,
    finished: bool,
}

impl LzmaDecoder {
    /// Create a decoder for a stream that decodes to `output_size` bytes
    pub fn new(properties: &[u8; LZMA_PROPS_SIZE], output_size: u64) -> Result<Self> {
        let stream = Stream::new_lzma_decoder(DECODER_MEMORY_LIMIT)?;

        let mut header = Vec::with_capacity(ALONE_HEADER_SIZE);
        header.extend_from_slice(properties);
        header.extend_from_slice(&output_size.to_le_bytes());

        Ok(Self {
            stream,
            header,
            output_size,
            produced: 0,
            finished: output_size == 0,
        })
    }

    /// Number of bytes decoded so far
    pub const fn produced(&self) -> u64 {
        self.produced
    }

    /// Check whether the full output has been produced
    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    /// Decode from `input` into `output`
    ///
    /// Returns `(consumed, written)`: how many bytes of `input` were used and
    /// how many bytes of `output` were filled. Both are zero once the stream
    /// has produced its full size.
    pub fn decode(&mut self, input: &[u8], output: &mut [u8]) -> Result<(usize, usize)> {
        if self.finished {
            return Ok((0, 0));
        }

        let remaining = (self.output_size - self.produced).min(output.len() as u64) as usize;
        let output = &mut output[..remaining];

        let in_before = self.stream.total_in();
        let out_before = self.stream.total_out();

        let status = if self.header.is_empty() {
            self.stream.process(input, output, Action::Run)?
        } else {
            // The container header has not been fully consumed yet
            let mut combined = Vec::with_capacity(self.header.len() + input.len());
            combined.extend_from_slice(&self.header);
            combined.extend_from_slice(input);
            self.stream.process(&combined, output, Action::Run)?
        };

        let mut consumed = (self.stream.total_in() - in_before) as usize;
        let written = (self.stream.total_out() - out_before) as usize;

        if !self.header.is_empty() {
            let header_used = consumed.min(self.header.len());
            self.header.drain(..header_used);
            consumed -= header_used;
        }

        self.produced += written as u64;
        if self.produced >= self.output_size || matches!(status, Status::StreamEnd) {
            self.finished = true;
        }

        Ok((consumed, written))
    }
}

/// Decode a complete in-memory stream
pub fn decompress(properties: &[u8; LZMA_PROPS_SIZE], input: &[u8], size: usize) -> Result<Vec<u8>> {
    let mut output = vec![0u8; size];
    let written = decompress_into(properties, input, &mut output)?;
    if written != size {
        return Err(PackError::Decompression(format!(
            "LZMA stream ended early: expected {size} bytes, got {written}"
        )));
    }
    Ok(output)
}

/// Decode a complete in-memory stream into `output`, returning bytes written
pub fn decompress_into(
    properties: &[u8; LZMA_PROPS_SIZE],
    input: &[u8],
    output: &mut [u8],
) -> Result<usize> {
    let mut decoder = LzmaDecoder::new(properties, output.len() as u64)?;
    let mut read = 0;
    let mut written = 0;

    while !decoder.is_finished() {
        let (consumed, produced) = decoder.decode(&input[read..], &mut output[written..])?;
        read += consumed;
        written += produced;
        if consumed == 0 && produced == 0 {
            break;
        }
    }

    Ok(written)
}

/// Encode `data` as a raw LZMA stream at the given preset (0-9)
///
/// Returns the property bytes and the encoded stream, which carries an
/// end-of-stream marker.
pub fn compress(data: &[u8], preset: u32) -> Result<([u8; LZMA_PROPS_SIZE], Vec<u8>)> {
    let options = LzmaOptions::new_preset(preset)?;
    let mut stream = Stream::new_lzma_encoder(&options)?;
    let mut encoded = Vec::with_capacity(data.len() / 2 + 64);
    let mut consumed = 0usize;

    loop {
        if encoded.capacity() - encoded.len() < 4096 {
            encoded.reserve(64 * 1024);
        }
        let before = stream.total_in();
        let status = stream.process_vec(&data[consumed..], &mut encoded, Action::Finish)?;
        consumed += (stream.total_in() - before) as usize;
        if matches!(status, Status::StreamEnd) {
            break;
        }
    }

    if encoded.len() < ALONE_HEADER_SIZE {
        return Err(PackError::Decompression(
            "LZMA encoder produced a truncated header".into(),
        ));
    }

    let mut properties = [0u8; LZMA_PROPS_SIZE];
    properties.copy_from_slice(&encoded[..LZMA_PROPS_SIZE]);
    encoded.drain(..ALONE_HEADER_SIZE);
    Ok((properties, encoded))
}
