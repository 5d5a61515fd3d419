//! Command handlers

pub mod load;
pub mod pack;
pub mod vfs;

use crate::config::CliConfig;
use anyhow::Context;
use std::path::PathBuf;
use stratum_vfs::{FileSystem, SearchPathAdd};

/// Build a filesystem with `mounts` added in order under `path_id`
pub(crate) fn mount_all(
    mounts: &[PathBuf],
    path_id: &str,
    config: &CliConfig,
) -> anyhow::Result<FileSystem> {
    let fs = FileSystem::new(config.filesystem.clone());
    for mount in mounts {
        fs.add_search_path(mount, path_id, SearchPathAdd::Tail)
            .with_context(|| format!("Failed to mount {}", mount.display()))?;
    }
    fs.log_search_paths();
    Ok(fs)
}
