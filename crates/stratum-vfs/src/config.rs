//! Configuration for the virtual filesystem

use serde::{Deserialize, Serialize};
use stratum_pack::PackConfig;

/// Filesystem configuration
///
/// The packed-store opener and trust policy are runtime objects and are
/// installed on the [`FileSystem`](crate::FileSystem) directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    /// Path ID whose map-pack mounts the reserved BSP ID selects
    pub game_path_id: String,

    /// Reserved path ID restricting lookups to the current map pack
    pub bsp_path_id: String,

    /// Prefix of packs discovered inside loose directories (`zip0.zip`, ...)
    pub auto_pack_prefix: String,

    /// Upper bound on auto-discovered packs per directory
    pub max_auto_packs: usize,

    /// Settings for every archive the filesystem opens
    pub pack: PackConfig,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            game_path_id: "GAME".to_string(),
            bsp_path_id: "BSP".to_string(),
            auto_pack_prefix: "zip".to_string(),
            max_auto_packs: 256,
            pack: PackConfig::default(),
        }
    }
}

impl FsConfig {
    /// Set the pack settings
    #[must_use]
    pub fn with_pack_config(mut self, pack: PackConfig) -> Self {
        self.pack = pack;
        self
    }

    /// Set the prefix of auto-discovered packs
    #[must_use]
    pub fn with_auto_pack_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.auto_pack_prefix = prefix.into();
        self
    }

    /// Set the limit on auto-discovered packs per directory
    #[must_use]
    pub const fn with_max_auto_packs(mut self, limit: usize) -> Self {
        self.max_auto_packs = limit;
        self
    }

    /// Name of the `index`th auto-discovered pack
    pub fn auto_pack_name(&self, index: usize) -> String {
        format!("{}{index}.zip", self.auto_pack_prefix)
    }
}
