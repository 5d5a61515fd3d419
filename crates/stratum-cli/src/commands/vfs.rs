//! `resolve` and `find`

use super::mount_all;
use crate::config::CliConfig;
use crate::output::{OutputFormat, format_bytes, print_json};
use anyhow::Context;
use serde::Serialize;
use std::path::PathBuf;
use stratum_vfs::PathFilter;

#[derive(Debug, Serialize)]
struct Resolution {
    name: String,
    full_path: String,
    path_type: String,
    store_id: String,
    size: u64,
}

/// Show which of `mounts` provides `name`
pub fn resolve(
    mounts: &[PathBuf],
    path_id: &str,
    name: &str,
    config: &CliConfig,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let fs = mount_all(mounts, path_id, config)?;
    let resolved = fs
        .resolve(name, Some(path_id), PathFilter::None)
        .with_context(|| format!("Failed to resolve {name}"))?;
    let resolution = Resolution {
        name: name.to_string(),
        full_path: resolved.full_path().to_string(),
        path_type: format!("{:?}", resolved.path_type()),
        store_id: resolved.store_id().to_string(),
        size: resolved.size()?,
    };

    match format {
        OutputFormat::Json => print_json(&resolution)?,
        OutputFormat::Text => println!(
            "{} -> {} ({}, store {}, {})",
            resolution.name,
            resolution.full_path,
            resolution.path_type,
            resolution.store_id,
            format_bytes(resolution.size)
        ),
    }
    Ok(())
}

/// Enumerate names matching `wildcard`
pub fn find(
    mounts: &[PathBuf],
    path_id: &str,
    search_id: Option<&str>,
    wildcard: &str,
    config: &CliConfig,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let fs = mount_all(mounts, path_id, config)?;
    let names: Vec<String> = fs
        .find(wildcard, search_id)
        .map(|found| {
            if found.is_directory {
                format!("{}/", found.name)
            } else {
                found.name
            }
        })
        .collect();

    match format {
        OutputFormat::Json => print_json(&names)?,
        OutputFormat::Text => {
            for name in &names {
                println!("{name}");
            }
        }
    }
    Ok(())
}
