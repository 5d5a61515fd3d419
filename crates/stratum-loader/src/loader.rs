//! The queued level loader

use crate::config::{LoaderConfig, available_memory};
use crate::error::{LoaderError, Result};
use crate::io::{AsyncIo, FileSystemIo};
use crate::pool::WorkerPool;
use crate::progress::{LoaderProgress, NullProgress, stage};
use crate::queue::JobQueue;
use crate::resource::{AnonymousPreload, Classifier, ResourceKind, ResourcePreload, ResourceTable};
use crate::stats::LoaderStats;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use stratum_pack::path::{file_name, fix_slashes};
use stratum_vfs::{FileSystem, PathFilter, SearchPathAdd};
use tracing::{debug, info, warn};

/// Options for one [`QueuedLoader::begin_load`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Load HDR variants of cubemaps and prop lighting
    pub hdr: bool,
    /// Skip purging when the level is the one loaded last
    pub optimize_reload: bool,
    /// Free memory to size the watermarks by; read from the system if unset
    pub free_memory: Option<u64>,
}

#[derive(Debug, Default)]
struct LoadState {
    level: String,
    last_level: Option<String>,
    same_level: bool,
    started: Option<Instant>,
}

/// Reads a level's resources in one sorted batch
///
/// `begin_load` reads the level's resource manifest, lets the installed
/// plugins turn its entries into read jobs, issues them and returns once the
/// jobs that gate the load are done. `end_load` waits for the rest of the
/// work needed before play and releases what the load held.
pub struct QueuedLoader {
    fs: Arc<FileSystem>,
    config: LoaderConfig,
    pool: Arc<WorkerPool>,
    queue: JobQueue,
    plugins: Mutex<HashMap<ResourceKind, Arc<dyn ResourcePreload>>>,
    progress: Mutex<Arc<dyn LoaderProgress>>,
    additional: Mutex<Vec<String>>,
    state: Mutex<LoadState>,
    stats: Mutex<LoaderStats>,
}

impl QueuedLoader {
    /// Create a loader reading through `fs` on its own worker pool
    pub fn new(fs: Arc<FileSystem>, config: LoaderConfig) -> Result<Self> {
        let pool = WorkerPool::new(config.worker_threads)?;
        let io = Arc::new(FileSystemIo::new(
            Arc::clone(&fs),
            &pool,
            config.io_concurrency,
        ));
        Ok(Self::with_io(fs, config, pool, io))
    }

    /// Create a loader with a custom read backend
    pub fn with_io(
        fs: Arc<FileSystem>,
        config: LoaderConfig,
        pool: Arc<WorkerPool>,
        io: Arc<dyn AsyncIo>,
    ) -> Self {
        let queue = JobQueue::new(Arc::clone(&fs), &config, Arc::clone(&pool), io);
        let mut plugins: HashMap<ResourceKind, Arc<dyn ResourcePreload>> = HashMap::new();
        plugins.insert(
            ResourceKind::Anonymous,
            Arc::new(AnonymousPreload::new(config.path_id.clone())),
        );
        Self {
            fs,
            config,
            pool,
            queue,
            plugins: Mutex::new(plugins),
            progress: Mutex::new(Arc::new(NullProgress)),
            additional: Mutex::new(Vec::new()),
            state: Mutex::new(LoadState::default()),
            stats: Mutex::new(LoaderStats::default()),
        }
    }

    /// Install the plugin for one resource kind, replacing any previous one
    pub fn install_loader(&self, kind: ResourceKind, plugin: Arc<dyn ResourcePreload>) {
        self.plugins.lock().insert(kind, plugin);
    }

    /// Install the progress reporter
    pub fn install_progress(&self, progress: Arc<dyn LoaderProgress>) {
        *self.progress.lock() = progress;
    }

    /// Queue an extra manifest entry for the next load
    pub fn add_map_resource(&self, name: impl Into<String>) {
        self.additional.lock().push(name.into());
    }

    /// The job queue plugins submit to
    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// The filesystem reads go through
    pub fn filesystem(&self) -> &Arc<FileSystem> {
        &self.fs
    }

    /// The worker pool running callbacks
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Loader configuration
    pub const fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Whether a load is in progress
    pub fn is_active(&self) -> bool {
        self.queue.is_active()
    }

    /// Whether plugins are creating the initial batch
    pub fn is_batching(&self) -> bool {
        self.queue.is_batching()
    }

    /// Whether no load is active and every job has finished
    pub fn is_finished(&self) -> bool {
        !self.queue.is_active() && self.queue.is_idle()
    }

    /// Whether the current load reloads the previous level
    pub fn is_same_level_loading(&self) -> bool {
        self.state.lock().same_level
    }

    /// `(high, low)` throttle watermarks in effect
    pub fn watermarks(&self) -> (u64, u64) {
        self.queue.watermarks()
    }

    /// Statistics of the last finished load
    pub fn stats(&self) -> LoaderStats {
        self.stats.lock().clone()
    }

    /// Ask every plugin to drop all of its resources
    pub fn purge_all(&self) {
        let plugins = self.plugins.lock().clone();
        for kind in ResourceKind::PURGE_ORDER {
            if let Some(plugin) = plugins.get(&kind) {
                debug!("Purging all {}", kind.name());
                plugin.purge_all();
            }
        }
    }

    /// Start loading `level`
    ///
    /// Returns once every job that must finish before the load proceeds is
    /// done. A missing manifest or level file fails the load and leaves the
    /// loader idle.
    pub fn begin_load(&self, level: &str, options: LoadOptions) -> Result<()> {
        if self.queue.is_active() {
            return Err(LoaderError::AlreadyActive);
        }
        let level = level_stem(level);
        info!("Loading level {level}");

        let (high, low) = self
            .config
            .watermarks(options.free_memory.or_else(available_memory));
        self.queue.set_watermarks(high, low);
        debug!("Throttle watermarks {high}/{low} bytes");

        self.fs.begin_map_access();
        self.queue.begin();
        {
            let mut state = self.state.lock();
            state.same_level = options.optimize_reload
                && state
                    .last_level
                    .as_deref()
                    .is_some_and(|last| last.eq_ignore_ascii_case(&level));
            state.level.clone_from(&level);
            state.started = Some(Instant::now());
        }

        let progress = Arc::clone(&*self.progress.lock());
        progress.begin();
        progress.update(stage::START);

        let manifest = match self.read_manifest(&level) {
            Ok(manifest) => manifest,
            Err(e) => {
                self.abandon(progress.as_ref());
                return Err(e);
            }
        };
        progress.update(stage::GOT_RESLIST);

        if let Err(e) = self.mount_level(&level) {
            self.abandon(progress.as_ref());
            return Err(e);
        }

        let classifier = Classifier::new(options.hdr, &self.config.anonymous_extensions);
        let mut table = ResourceTable::new();
        table.parse(&manifest, &classifier);
        for name in self.additional.lock().iter() {
            table.add(name, &classifier);
        }
        progress.update(stage::PARSED_RESLIST);

        self.queue.set_batching(true);
        self.create_resources(&mut table);
        progress.update(stage::CREATED_RESOURCES);

        if self.is_same_level_loading() {
            debug!("Reloading {level}; keeping resources");
        } else {
            self.purge_unreferenced();
        }
        progress.update(stage::PRE_PURGE);

        self.queue.flush_batched_and_wait(progress.as_ref());
        progress.end();
        info!("Level {level} preloaded");
        Ok(())
    }

    /// Finish the current load
    ///
    /// Waits for every job needed before play, then frees anonymous data
    /// nobody claimed. Loads cannot be cancelled; `abort` only changes what
    /// is logged.
    pub fn end_load(&self, abort: bool) -> Result<()> {
        if !self.queue.is_active() {
            return Err(LoaderError::NotActive);
        }
        if abort {
            debug!("Abort requested; finishing the load normally");
        }

        self.queue.wait_for_play();
        self.queue.set_inactive();

        let plugins = self.plugins.lock().clone();
        for kind in ResourceKind::BUILD_ORDER {
            if let Some(plugin) = plugins.get(&kind) {
                plugin.on_end_load(false);
            }
        }

        let freed = self.queue.free_unclaimed();
        if freed > 0 {
            debug!("Freed {freed} unclaimed anonymous buffers");
        }
        self.queue.check_memory();
        self.additional.lock().clear();
        self.fs.end_map_access();

        let (level, started) = {
            let mut state = self.state.lock();
            state.last_level = Some(state.level.clone());
            (state.level.clone(), state.started.take())
        };
        let load_time = started.map(|started| started.elapsed()).unwrap_or_default();
        let stats = self.queue.stats(&level, load_time, freed);
        stats.spew(false);
        *self.stats.lock() = stats;
        Ok(())
    }

    fn read_manifest(&self, level: &str) -> Result<String> {
        let path_id = Some(self.config.path_id.as_str());
        let name = format!("{}/{level}.lst", self.config.manifest_dir);
        let data = self
            .fs
            .read_file(&name, path_id)
            .map_err(|e| LoaderError::Manifest(format!("{name}: {e}")))?;
        let mut manifest = String::from_utf8_lossy(&data).into_owned();

        if let Some(locale) = &self.config.locale {
            let localized = format!("{}/{level}_{locale}.lst", self.config.manifest_dir);
            match self.fs.read_file(&localized, path_id) {
                Ok(extra) => {
                    manifest.push('\n');
                    manifest.push_str(&String::from_utf8_lossy(&extra));
                }
                Err(e) => debug!("No localized manifest {localized}: {e}"),
            }
        }
        Ok(manifest)
    }

    fn mount_level(&self, level: &str) -> Result<()> {
        let name = format!("{}/{level}.bsp", self.config.level_dir);
        let path_id = self.config.path_id.as_str();
        let resolved = self
            .fs
            .resolve(&name, Some(path_id), PathFilter::CullPack)
            .map_err(|e| LoaderError::LevelMount(format!("{name}: {e}")))?;
        self.fs
            .add_search_path(resolved.full_path(), path_id, SearchPathAdd::Head)
            .map_err(|e| LoaderError::LevelMount(format!("{name}: {e}")))
    }

    fn create_resources(&self, table: &mut ResourceTable) {
        let plugins = self.plugins.lock().clone();
        for kind in ResourceKind::BUILD_ORDER {
            let names = table.take(kind);
            if names.is_empty() {
                continue;
            }
            let Some(plugin) = plugins.get(&kind) else {
                debug!("No loader for {} {}", names.len(), kind.name());
                continue;
            };
            debug!("Creating {} {}", names.len(), kind.name());
            for name in &names {
                if let Err(e) = plugin.create_resource(name, &self.queue) {
                    warn!("Failed to create {} {name}: {e}", kind.name());
                }
            }
        }
    }

    fn purge_unreferenced(&self) {
        let plugins = self.plugins.lock().clone();
        for kind in ResourceKind::PURGE_ORDER {
            if let Some(plugin) = plugins.get(&kind) {
                plugin.purge_unreferenced();
            }
        }
    }

    fn abandon(&self, progress: &dyn LoaderProgress) {
        self.queue.reset();
        self.fs.end_map_access();
        self.state.lock().started = None;
        progress.end();
    }
}

impl fmt::Debug for QueuedLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedLoader")
            .field("queue", &self.queue)
            .field("level", &self.state.lock().level)
            .finish_non_exhaustive()
    }
}

impl Drop for QueuedLoader {
    fn drop(&mut self) {
        if self.queue.is_active() {
            warn!("Loader dropped during a load; ending it");
            if let Err(e) = self.end_load(true) {
                warn!("Failed to end load: {e}");
            }
        }
    }
}

/// Level name without directories or the `.bsp` extension
fn level_stem(level: &str) -> String {
    let fixed = fix_slashes(level);
    let name = file_name(&fixed);
    // `get` keeps a split inside a multibyte character from panicking
    let split = name.len().saturating_sub(4);
    match name.get(split..) {
        Some(extension) if split > 0 && extension.eq_ignore_ascii_case(".bsp") => {
            name[..split].to_string()
        }
        _ => name.to_string(),
    }
}
