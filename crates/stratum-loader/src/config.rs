//! Loader configuration

use crate::layout::LayoutOrder;
use serde::{Deserialize, Serialize};

const MIB: u64 = 1024 * 1024;

/// Queued loader configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// In-flight bytes that suspend I/O when memory is ample
    pub high_watermark: u64,
    /// In-flight bytes at which suspended I/O resumes when memory is ample
    pub low_watermark: u64,
    /// High watermark used when free memory is short
    pub constrained_high_watermark: u64,
    /// Low watermark used when free memory is short
    pub constrained_low_watermark: u64,
    /// Free memory at or above which the ample watermarks apply
    pub ample_memory: u64,
    /// Worker threads in the pool (0 uses the number of CPUs)
    pub worker_threads: usize,
    /// Reads allowed in flight at once
    pub io_concurrency: usize,
    /// Locale whose manifest supplement is appended, if any
    pub locale: Option<String>,
    /// Directory holding `<level>.lst` manifests
    pub manifest_dir: String,
    /// Directory holding `<level>.bsp` level files
    pub level_dir: String,
    /// Path ID for manifests, level files and anonymous jobs
    pub path_id: String,
    /// Extensions whose manifest entries become anonymous jobs
    pub anonymous_extensions: Vec<String>,
    /// Disc layout ranking used to order submissions
    pub layout_order: LayoutOrder,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            high_watermark: 10 * MIB,
            low_watermark: 2 * MIB,
            constrained_high_watermark: 5 * MIB,
            constrained_low_watermark: MIB,
            ample_memory: 64 * MIB,
            worker_threads: 0,
            io_concurrency: 4,
            locale: None,
            manifest_dir: "reslists".to_string(),
            level_dir: "maps".to_string(),
            path_id: "GAME".to_string(),
            anonymous_extensions: Vec::new(),
            layout_order: LayoutOrder::default(),
        }
    }
}

impl LoaderConfig {
    /// Set both ample-memory watermarks
    #[must_use]
    pub const fn with_watermarks(mut self, high: u64, low: u64) -> Self {
        self.high_watermark = high;
        self.low_watermark = low;
        self
    }

    /// Set the worker thread count
    #[must_use]
    pub const fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Set the number of concurrent reads
    #[must_use]
    pub const fn with_io_concurrency(mut self, reads: usize) -> Self {
        self.io_concurrency = reads;
        self
    }

    /// Set the manifest locale
    #[must_use]
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    /// Route manifest entries with `extension` to the anonymous bucket
    #[must_use]
    pub fn with_anonymous_extension(mut self, extension: impl Into<String>) -> Self {
        self.anonymous_extensions.push(extension.into());
        self
    }

    /// Set the layout ranking
    #[must_use]
    pub fn with_layout_order(mut self, order: LayoutOrder) -> Self {
        self.layout_order = order;
        self
    }

    /// `(high, low)` watermarks for the given free memory
    ///
    /// Unknown free memory is treated as ample.
    pub const fn watermarks(&self, free_memory: Option<u64>) -> (u64, u64) {
        match free_memory {
            Some(free) if free < self.ample_memory => (
                self.constrained_high_watermark,
                self.constrained_low_watermark,
            ),
            _ => (self.high_watermark, self.low_watermark),
        }
    }
}

/// Available system memory in bytes, where the platform reports it
pub fn available_memory() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    meminfo.lines().find_map(|line| {
        let kib = line.strip_prefix("MemAvailable:")?.trim().strip_suffix("kB")?;
        kib.trim().parse::<u64>().ok().map(|kib| kib * 1024)
    })
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_watermarks_follow_free_memory() {
        let config = LoaderConfig::default();
        assert_eq!(config.watermarks(Some(128 * MIB)), (10 * MIB, 2 * MIB));
        assert_eq!(config.watermarks(Some(64 * MIB)), (10 * MIB, 2 * MIB));
        assert_eq!(config.watermarks(Some(32 * MIB)), (5 * MIB, MIB));
        assert_eq!(config.watermarks(None), (10 * MIB, 2 * MIB));
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: LoaderConfig =
            serde_json::from_str(r#"{ "locale": "french", "io_concurrency": 2 }"#).unwrap();
        assert_eq!(config.locale.as_deref(), Some("french"));
        assert_eq!(config.io_concurrency, 2);
        assert_eq!(config.manifest_dir, "reslists");
    }
}
