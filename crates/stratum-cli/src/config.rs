//! Optional JSON configuration file

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use stratum_loader::LoaderConfig;
use stratum_vfs::FsConfig;

/// Settings for every library the CLI drives
///
/// Every field is optional in the file; missing ones take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Filesystem settings, including the pack settings
    pub filesystem: FsConfig,
    /// Queued loader settings
    pub loader: LoaderConfig,
}

impl CliConfig {
    /// Read the file at `path`, or use the defaults when there is none
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }
}
