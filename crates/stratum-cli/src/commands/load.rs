//! `load`: a dry-run queued level load

use crate::config::CliConfig;
use crate::output::{OutputFormat, format_bytes, print_json};
use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use stratum_loader::{
    JobQueue, LoadOptions, LoaderJob, LoaderProgress, Priority, QueuedLoader, ResourceKind,
    ResourcePreload,
};
use stratum_vfs::{FileSystem, SearchPathAdd};
use tracing::debug;

/// Options of the `load` command
#[derive(Debug, Clone, Default)]
pub struct LoadArgs {
    /// Load HDR resources
    pub hdr: bool,
    /// Manifest locale
    pub locale: Option<String>,
    /// Extra anonymous extensions
    pub anonymous_extensions: Vec<String>,
    /// Log every job after the load
    pub verbose_stats: bool,
}

/// Reads every resource of one kind and drops the data
#[derive(Debug)]
struct LoggingPreload {
    kind: ResourceKind,
    prefix: String,
    files: Arc<AtomicUsize>,
    bytes: Arc<AtomicU64>,
}

impl LoggingPreload {
    fn new(kind: ResourceKind, prefix: String) -> Self {
        Self {
            kind,
            prefix,
            files: Arc::new(AtomicUsize::new(0)),
            bytes: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl ResourcePreload for LoggingPreload {
    fn create_resource(&self, name: &str, queue: &JobQueue) -> stratum_loader::Result<()> {
        let kind = self.kind;
        let files = Arc::clone(&self.files);
        let bytes = Arc::clone(&self.bytes);
        queue.submit(
            LoaderJob::new(format!("{}{name}", self.prefix))
                .with_priority(Priority::BeforePlay)
                .with_callback(move |completion| {
                    if completion.is_ok() {
                        files.fetch_add(1, Ordering::Relaxed);
                        bytes.fetch_add(completion.data.len() as u64, Ordering::Relaxed);
                    }
                    debug!(
                        "{} {} {:?} ({} bytes)",
                        kind.name(),
                        completion.name,
                        completion.status,
                        completion.data.len()
                    );
                }),
        )
    }

    fn on_end_load(&self, _abort: bool) {
        debug!(
            "{}: {} files, {} bytes",
            self.kind.name(),
            self.files.load(Ordering::Relaxed),
            self.bytes.load(Ordering::Relaxed)
        );
    }
}

struct LogProgress;

impl LoaderProgress for LogProgress {
    fn update(&self, fraction: f32) {
        debug!("Load progress {:.0}%", fraction * 100.0);
    }
}

/// Load `level` from `game_dir`, reading every resource without using it
pub fn run(
    game_dir: &Path,
    level: &str,
    args: &LoadArgs,
    config: &CliConfig,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let mut loader_config = config.loader.clone();
    if let Some(locale) = &args.locale {
        loader_config = loader_config.with_locale(locale.clone());
    }
    for extension in &args.anonymous_extensions {
        loader_config = loader_config.with_anonymous_extension(extension.clone());
    }

    let fs = Arc::new(FileSystem::new(config.filesystem.clone()));
    fs.add_search_path(game_dir, &loader_config.path_id, SearchPathAdd::Tail)
        .with_context(|| format!("Failed to mount {}", game_dir.display()))?;

    let stem = Path::new(level)
        .file_stem()
        .map_or_else(|| level.to_string(), |stem| stem.to_string_lossy().into_owned());
    let prop_lighting_dir = format!("{}/{stem}/", loader_config.level_dir);
    let loader = QueuedLoader::new(Arc::clone(&fs), loader_config)
        .context("Failed to start the loader")?;

    let plugins = [
        (ResourceKind::Sound, "sound/".to_string()),
        (ResourceKind::Material, "materials/".to_string()),
        (ResourceKind::Cubemap, "materials/".to_string()),
        (ResourceKind::Model, "models/".to_string()),
        (ResourceKind::StaticPropLighting, prop_lighting_dir),
    ];
    for (kind, prefix) in plugins {
        loader.install_loader(kind, Arc::new(LoggingPreload::new(kind, prefix)));
    }
    loader.install_progress(Arc::new(LogProgress));

    let options = LoadOptions {
        hdr: args.hdr,
        ..LoadOptions::default()
    };
    loader
        .begin_load(level, options)
        .with_context(|| format!("Failed to load {level}"))?;
    // background reads are part of the dry run too
    loader.queue().wait_idle();
    loader.end_load(false)?;

    let stats = loader.stats();
    if args.verbose_stats {
        stats.spew(true);
    }
    match format {
        OutputFormat::Json => print_json(&stats)?,
        OutputFormat::Text => {
            println!(
                "{}: {} jobs, {} missing, {} failed, {} in {:.2}s",
                stats.level,
                stats.jobs_submitted,
                stats.not_found,
                stats.read_failed,
                format_bytes(stats.bytes_read),
                stats.load_time.as_secs_f64()
            );
            println!(
                "peak memory {} (callbacks) / {} (anonymous), {} unclaimed buffers freed",
                format_bytes(stats.peak_io_memory),
                format_bytes(stats.peak_anonymous_memory),
                stats.unclaimed_freed
            );
        }
    }
    Ok(())
}
