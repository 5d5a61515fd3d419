//! Configuration for pack archives

use serde::{Deserialize, Serialize};

/// Tuning knobs for opened archives and their LZMA handles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackConfig {
    /// Bytes of decoded output an LZMA handle keeps for cheap backward seeks
    pub backseek_buffer_size: usize,

    /// Bytes of compressed input an LZMA handle reads ahead per refill
    pub read_buffer_size: usize,

    /// Load the preload section into memory when the archive is opened
    pub load_preload: bool,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            backseek_buffer_size: 64 * 1024, // 64 KiB
            read_buffer_size: 16 * 1024,     // 16 KiB
            load_preload: true,
        }
    }
}

impl PackConfig {
    /// Set the backseek span of LZMA handles
    #[must_use]
    pub const fn with_backseek_buffer_size(mut self, size: usize) -> Self {
        self.backseek_buffer_size = size;
        self
    }

    /// Set the read-ahead size of LZMA handles
    #[must_use]
    pub const fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Enable or disable loading of the preload section
    #[must_use]
    pub const fn with_preload(mut self, enable: bool) -> Self {
        self.load_preload = enable;
        self
    }
}
