//! `list`, `cat` and `build`

use crate::config::CliConfig;
use crate::output::{OutputFormat, format_bytes, print_json};
use anyhow::{Context, bail};
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use stratum_pack::{Archive, CompressionMethod, NameRegistry, PackBuilder, PackEntry};
use tracing::info;

#[derive(Debug, Serialize)]
struct EntryInfo {
    name: String,
    size: u64,
    compressed_size: u64,
    method: &'static str,
    crc32: String,
    preload: bool,
}

impl EntryInfo {
    fn new(name: &str, entry: &PackEntry) -> Self {
        Self {
            name: name.to_string(),
            size: entry.original_size,
            compressed_size: entry.compressed_size,
            method: match entry.method {
                CompressionMethod::Stored => "stored",
                CompressionMethod::Lzma => "lzma",
            },
            crc32: format!("{:08x}", entry.crc32),
            preload: entry.preload_index.is_some(),
        }
    }
}

fn open(pack: &Path, config: &CliConfig) -> anyhow::Result<Arc<Archive>> {
    Archive::open(
        pack,
        Arc::new(NameRegistry::caseless()),
        config.filesystem.pack.clone(),
    )
    .with_context(|| format!("Failed to open pack {}", pack.display()))
}

/// List the entries of `pack`
pub fn list(
    pack: &Path,
    wildcard: Option<&str>,
    config: &CliConfig,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let archive = open(pack, config)?;

    if let Some(wildcard) = wildcard {
        let (directories, files) = archive.file_and_dir_lists(wildcard);
        match format {
            OutputFormat::Json => print_json(&serde_json::json!({
                "directories": directories,
                "files": files,
            }))?,
            OutputFormat::Text => {
                for dir in directories {
                    println!("{dir}/");
                }
                for file in files {
                    println!("{file}");
                }
            }
        }
        return Ok(());
    }

    let mut entries: Vec<EntryInfo> = archive
        .entries()
        .map(|(name, entry)| EntryInfo::new(&name, entry))
        .collect();
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    match format {
        OutputFormat::Json => print_json(&entries)?,
        OutputFormat::Text => {
            for entry in &entries {
                println!(
                    "{:<6} {:>10} {:>10} {} {}{}",
                    entry.method,
                    format_bytes(entry.size),
                    format_bytes(entry.compressed_size),
                    entry.crc32,
                    entry.name,
                    if entry.preload { " [preload]" } else { "" }
                );
            }
            let total: u64 = entries.iter().map(|entry| entry.size).sum();
            println!("{} entries, {}", entries.len(), format_bytes(total));
        }
    }
    Ok(())
}

/// Write the entry `name` of `pack` to `output` or stdout
pub fn cat(
    pack: &Path,
    name: &str,
    output: Option<&Path>,
    config: &CliConfig,
) -> anyhow::Result<()> {
    let archive = open(pack, config)?;
    let data = archive
        .open_file(name)
        .and_then(|mut file| file.read_remaining())
        .with_context(|| format!("Failed to read {name} from {}", pack.display()))?;

    match output {
        Some(path) => std::fs::write(path, &data)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => std::io::stdout().lock().write_all(&data)?,
    }
    Ok(())
}

/// Options of the `build` command
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Compress entries with LZMA
    pub lzma: bool,
    /// Preload bytes per stored entry
    pub preload: Option<usize>,
    /// Compress the preload chunks
    pub compress_preload: bool,
    /// Always write Zip64 end records
    pub zip64: bool,
}

/// Pack every file below `dir` into `out`
pub fn build(
    dir: &Path,
    out: &Path,
    options: &BuildOptions,
    format: OutputFormat,
) -> anyhow::Result<()> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    let method = if options.lzma {
        CompressionMethod::Lzma
    } else {
        CompressionMethod::Stored
    };

    let mut builder = PackBuilder::new()
        .add_directory(dir, method)
        .with_context(|| format!("Failed to collect {}", dir.display()))?
        .with_zip64(options.zip64);
    if let Some(bytes) = options.preload {
        builder = builder
            .with_preload(bytes)
            .with_compressed_preload(options.compress_preload);
    }
    builder
        .write_to_path(out)
        .with_context(|| format!("Failed to write {}", out.display()))?;

    let size = std::fs::metadata(out)?.len();
    info!("Wrote {} entries to {}", builder.len(), out.display());
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "pack": out.display().to_string(),
            "entries": builder.len(),
            "size": size,
        }))?,
        OutputFormat::Text => println!(
            "{}: {} entries, {}",
            out.display(),
            builder.len(),
            format_bytes(size)
        ),
    }
    Ok(())
}
