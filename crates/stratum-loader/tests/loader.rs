//! Level loads against a real game directory with a level pack

#![allow(clippy::expect_used, clippy::unwrap_used)]

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use stratum_loader::{
    JobQueue, JobStatus, LoadOptions, LoaderConfig, LoaderError, LoaderJob, LoaderProgress,
    Priority, QueuedLoader, ResourceKind, ResourcePreload,
};
use stratum_pack::{PackBuilder, write_level_file};
use stratum_vfs::{FileSystem, FsConfig, SearchPathAdd};
use tempfile::TempDir;

const MANIFEST: &str = "\
    sound/ambient/wind.wav
    sound/ambient/missing.wav
    materials/brick/wall.vmt
    materials/maps/test/brick/wall_1_2_3.vmt
    materials/maps/test/c0_0_0.vtf
    materials/maps/test/c0_0_0.hdr.vtf
    scripts/level.dat
";

fn write(root: &Path, name: &str, data: &[u8]) {
    let path = root.join(name);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, data).unwrap();
}

fn game(manifest: Option<&str>, with_level: bool) -> (TempDir, Arc<FileSystem>) {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("game");
    write(&root, "sound/ambient/wind.wav", b"wind");
    write(&root, "materials/brick/wall.vmt", b"wall");
    write(&root, "sound/extra.wav", b"extra");
    write(&root, "scripts/level.dat", b"level data");
    if let Some(manifest) = manifest {
        write(&root, "reslists/test.lst", manifest.as_bytes());
    }
    if with_level {
        std::fs::create_dir_all(root.join("maps")).unwrap();
        let pack = PackBuilder::new()
            .stored("materials/maps/test/c0_0_0.vtf", b"cube".to_vec())
            .stored("materials/maps/test/brick/wall_1_2_3.vmt", b"patch".to_vec())
            .to_bytes()
            .unwrap();
        write_level_file(&root.join("maps/test.bsp"), 20, &pack).unwrap();
    }

    let fs = Arc::new(FileSystem::new(FsConfig::default()));
    fs.add_search_path(&root, "GAME", SearchPathAdd::Tail).unwrap();
    (temp, fs)
}

fn loader(fs: &Arc<FileSystem>) -> QueuedLoader {
    let config = LoaderConfig::default()
        .with_worker_threads(2)
        .with_anonymous_extension("dat");
    QueuedLoader::new(Arc::clone(fs), config).unwrap()
}

/// Submits one read per resource and records what happened
struct Recorder {
    prefix: &'static str,
    priority: Priority,
    created: Mutex<Vec<String>>,
    completed: Arc<Mutex<Vec<(String, JobStatus, Vec<u8>)>>>,
    purges: AtomicUsize,
    ends: AtomicUsize,
}

impl Recorder {
    fn new(prefix: &'static str, priority: Priority) -> Arc<Self> {
        Arc::new(Self {
            prefix,
            priority,
            created: Mutex::new(Vec::new()),
            completed: Arc::new(Mutex::new(Vec::new())),
            purges: AtomicUsize::new(0),
            ends: AtomicUsize::new(0),
        })
    }

    fn completed(&self) -> Vec<(String, JobStatus, Vec<u8>)> {
        let mut completed = self.completed.lock().clone();
        completed.sort_by(|a, b| a.0.cmp(&b.0));
        completed
    }
}

impl ResourcePreload for Recorder {
    fn create_resource(&self, name: &str, queue: &JobQueue) -> stratum_loader::Result<()> {
        self.created.lock().push(name.to_string());
        let completed = Arc::clone(&self.completed);
        queue.submit(
            LoaderJob::new(format!("{}{name}", self.prefix))
                .with_priority(self.priority)
                .with_callback(move |completion| {
                    completed
                        .lock()
                        .push((completion.name, completion.status, completion.data));
                }),
        )
    }

    fn purge_unreferenced(&self) {
        self.purges.fetch_add(1, Ordering::SeqCst);
    }

    fn on_end_load(&self, abort: bool) {
        assert!(!abort);
        self.ends.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct RecordingProgress {
    updates: Mutex<Vec<f32>>,
    begins: AtomicUsize,
    ends: AtomicUsize,
}

impl LoaderProgress for RecordingProgress {
    fn begin(&self) {
        self.begins.fetch_add(1, Ordering::SeqCst);
    }

    fn update(&self, fraction: f32) {
        self.updates.lock().push(fraction);
    }

    fn end(&self) {
        self.ends.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_level_pack_reads_finish_before_begin_load_returns() {
    let (_temp, fs) = game(Some(MANIFEST), true);
    let loader = loader(&fs);
    let cubemaps = Recorder::new("materials/", Priority::AnyTime);
    loader.install_loader(ResourceKind::Cubemap, Arc::clone(&cubemaps) as Arc<dyn ResourcePreload>);

    loader.begin_load("test", LoadOptions::default()).unwrap();
    assert!(loader.is_active());
    assert!(!loader.is_batching());

    // only the LDR cubemap is created, and it is read from the level pack
    assert_eq!(*cubemaps.created.lock(), vec!["maps/test/c0_0_0.vtf".to_string()]);
    assert_eq!(
        cubemaps.completed(),
        vec![(
            "materials/maps/test/c0_0_0.vtf".to_string(),
            JobStatus::Ok,
            b"cube".to_vec()
        )]
    );

    loader.end_load(false).unwrap();
    assert!(!loader.is_active());
    assert_eq!(cubemaps.ends.load(Ordering::SeqCst), 1);
    assert_eq!(fs.map_access_depth(), 0);
}

#[test]
fn test_before_play_reads_finish_by_end_load() {
    let (_temp, fs) = game(Some(MANIFEST), true);
    let loader = loader(&fs);
    let sounds = Recorder::new("sound/", Priority::BeforePlay);
    loader.install_loader(ResourceKind::Sound, Arc::clone(&sounds) as Arc<dyn ResourcePreload>);

    loader.begin_load("maps/test.bsp", LoadOptions::default()).unwrap();
    loader.end_load(false).unwrap();

    assert_eq!(
        sounds.completed(),
        vec![
            (
                "sound/ambient/missing.wav".to_string(),
                JobStatus::NotFound,
                Vec::new()
            ),
            (
                "sound/ambient/wind.wav".to_string(),
                JobStatus::Ok,
                b"wind".to_vec()
            ),
        ]
    );

    let stats = loader.stats();
    assert_eq!(stats.level, "test");
    assert_eq!(stats.not_found, 1);
    assert!(stats.bytes_read >= 4);
}

#[test]
fn test_patched_materials_replace_their_base() {
    let (_temp, fs) = game(Some(MANIFEST), true);
    let loader = loader(&fs);
    let materials = Recorder::new("materials/", Priority::BeforePlay);
    loader.install_loader(ResourceKind::Material, Arc::clone(&materials) as Arc<dyn ResourcePreload>);

    loader.begin_load("test", LoadOptions::default()).unwrap();
    loader.end_load(false).unwrap();

    assert_eq!(
        *materials.created.lock(),
        vec!["maps/test/brick/wall_1_2_3.vmt".to_string()]
    );
    let completed = materials.completed();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].2, b"patch");
}

#[test]
fn test_anonymous_resources_are_claimed_once() {
    let (_temp, fs) = game(Some(MANIFEST), true);
    let loader = loader(&fs);

    loader.begin_load("test", LoadOptions::default()).unwrap();
    loader.queue().wait_idle();

    let claimed = loader.queue().claim_sync("scripts/level.dat").unwrap();
    assert_eq!(claimed.status, JobStatus::Ok);
    assert_eq!(claimed.data, b"level data");
    assert!(matches!(
        loader.queue().claim_sync("scripts/level.dat"),
        Err(LoaderError::Protocol(_))
    ));

    loader.end_load(false).unwrap();
    assert_eq!(loader.stats().unclaimed_freed, 0);
    assert!(loader.is_finished());
}

#[test]
fn test_unclaimed_anonymous_data_is_freed_at_end_load() {
    let (_temp, fs) = game(Some(MANIFEST), true);
    let loader = loader(&fs);

    loader.begin_load("test", LoadOptions::default()).unwrap();
    loader.queue().wait_idle();
    assert_eq!(loader.queue().anonymous_memory(), 10);

    loader.end_load(false).unwrap();
    assert_eq!(loader.stats().unclaimed_freed, 1);
    assert_eq!(loader.queue().anonymous_memory(), 0);
}

#[test]
fn test_claim_async_runs_on_the_pool() {
    let (_temp, fs) = game(Some(MANIFEST), true);
    let loader = loader(&fs);
    loader.begin_load("test", LoadOptions::default()).unwrap();
    loader.queue().wait_idle();

    let (tx, rx) = std::sync::mpsc::channel();
    loader
        .queue()
        .claim_async("scripts/level.dat", move |claimed| {
            tx.send(claimed.data).unwrap();
        })
        .unwrap();
    let data = rx
        .recv_timeout(std::time::Duration::from_secs(5))
        .unwrap();
    assert_eq!(data, b"level data");
    loader.end_load(false).unwrap();
}

#[test]
fn test_missing_manifest_leaves_loader_idle() {
    let (_temp, fs) = game(None, true);
    let loader = loader(&fs);
    let progress = Arc::new(RecordingProgress::default());
    loader.install_progress(Arc::clone(&progress) as Arc<dyn LoaderProgress>);

    assert!(matches!(
        loader.begin_load("test", LoadOptions::default()),
        Err(LoaderError::Manifest(_))
    ));
    assert!(!loader.is_active());
    assert_eq!(fs.map_access_depth(), 0);
    assert_eq!(progress.begins.load(Ordering::SeqCst), 1);
    assert_eq!(progress.ends.load(Ordering::SeqCst), 1);
    assert!(matches!(loader.end_load(false), Err(LoaderError::NotActive)));
}

#[test]
fn test_missing_level_file_fails_the_mount() {
    let (_temp, fs) = game(Some(MANIFEST), false);
    let loader = loader(&fs);
    assert!(matches!(
        loader.begin_load("test", LoadOptions::default()),
        Err(LoaderError::LevelMount(_))
    ));
    assert!(!loader.is_active());
    assert!(matches!(
        loader.queue().submit(LoaderJob::new("scripts/level.dat")),
        Err(LoaderError::NotActive)
    ));
}

#[test]
fn test_second_begin_load_is_rejected() {
    let (_temp, fs) = game(Some(MANIFEST), true);
    let loader = loader(&fs);
    loader.begin_load("test", LoadOptions::default()).unwrap();
    assert!(matches!(
        loader.begin_load("test", LoadOptions::default()),
        Err(LoaderError::AlreadyActive)
    ));
    loader.end_load(true).unwrap();
}

#[test]
fn test_same_level_reload_skips_purge() {
    let (_temp, fs) = game(Some(MANIFEST), true);
    let loader = loader(&fs);
    let sounds = Recorder::new("sound/", Priority::BeforePlay);
    loader.install_loader(ResourceKind::Sound, Arc::clone(&sounds) as Arc<dyn ResourcePreload>);
    let options = LoadOptions {
        optimize_reload: true,
        ..LoadOptions::default()
    };

    loader.begin_load("test", options).unwrap();
    assert!(!loader.is_same_level_loading());
    loader.end_load(false).unwrap();
    assert_eq!(sounds.purges.load(Ordering::SeqCst), 1);

    loader.begin_load("TEST", options).unwrap();
    assert!(loader.is_same_level_loading());
    loader.end_load(false).unwrap();
    assert_eq!(sounds.purges.load(Ordering::SeqCst), 1);

    loader.begin_load("test", LoadOptions::default()).unwrap();
    loader.end_load(false).unwrap();
    assert_eq!(sounds.purges.load(Ordering::SeqCst), 2);
}

#[test]
fn test_progress_stages_are_reported_in_order() {
    let (_temp, fs) = game(Some(MANIFEST), true);
    let loader = loader(&fs);
    let progress = Arc::new(RecordingProgress::default());
    loader.install_progress(Arc::clone(&progress) as Arc<dyn LoaderProgress>);

    loader.begin_load("test", LoadOptions::default()).unwrap();
    loader.end_load(false).unwrap();

    let updates = progress.updates.lock().clone();
    assert!(updates.len() >= 6);
    assert!(updates.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!((updates[0] - 0.10).abs() < f32::EPSILON);
    assert!((updates[updates.len() - 1] - 1.0).abs() < f32::EPSILON);
    assert_eq!(progress.ends.load(Ordering::SeqCst), 1);
}

#[test]
fn test_additional_resources_join_the_manifest() {
    let (_temp, fs) = game(Some("materials/brick/wall.vmt"), true);
    let loader = loader(&fs);
    let sounds = Recorder::new("sound/", Priority::BeforePlay);
    loader.install_loader(ResourceKind::Sound, Arc::clone(&sounds) as Arc<dyn ResourcePreload>);

    loader.add_map_resource("sound/extra.wav");
    loader.begin_load("test", LoadOptions::default()).unwrap();
    loader.end_load(false).unwrap();
    assert_eq!(*sounds.created.lock(), vec!["extra.wav".to_string()]);

    // the extra entries last for one load
    loader.begin_load("test", LoadOptions::default()).unwrap();
    loader.end_load(false).unwrap();
    assert_eq!(sounds.created.lock().len(), 1);
}

#[test]
fn test_constrained_memory_uses_small_watermarks() {
    let (_temp, fs) = game(Some(MANIFEST), true);
    let loader = loader(&fs);
    let options = LoadOptions {
        free_memory: Some(16 * 1024 * 1024),
        ..LoadOptions::default()
    };
    loader.begin_load("test", options).unwrap();
    assert_eq!(loader.watermarks(), (5 * 1024 * 1024, 1024 * 1024));
    loader.end_load(false).unwrap();
}

#[test]
fn test_throttle_bounds_memory_held_by_slow_callbacks() {
    const CHUNK: u64 = 8;
    const HIGH: u64 = 3 * CHUNK;

    let (temp, fs) = game(Some(MANIFEST), true);
    let root = temp.path().join("game");
    for i in 0..20 {
        write(&root, &format!("chunks/{i:02}.bin"), &[i as u8; CHUNK as usize]);
    }
    let config = LoaderConfig::default()
        .with_worker_threads(4)
        .with_io_concurrency(1)
        .with_watermarks(HIGH, CHUNK);
    let loader = QueuedLoader::new(Arc::clone(&fs), config).unwrap();
    let options = LoadOptions {
        free_memory: Some(u64::MAX),
        ..LoadOptions::default()
    };
    loader.begin_load("test", options).unwrap();

    let done = Arc::new(AtomicUsize::new(0));
    for i in 0..20 {
        let done = Arc::clone(&done);
        loader
            .queue()
            .submit(
                LoaderJob::new(format!("chunks/{i:02}.bin")).with_callback(move |completion| {
                    std::thread::sleep(std::time::Duration::from_millis(20));
                    if completion.is_ok() {
                        done.fetch_add(1, Ordering::SeqCst);
                    }
                }),
            )
            .unwrap();
    }
    loader.queue().wait_idle();
    loader.end_load(false).unwrap();

    assert_eq!(done.load(Ordering::SeqCst), 20);
    let peak = loader.stats().peak_io_memory;
    assert!(peak <= HIGH + CHUNK, "peak {peak} above {}", HIGH + CHUNK);
    assert!(!loader.queue().is_throttled());
}

struct Failing;

impl ResourcePreload for Failing {
    fn create_resource(&self, name: &str, _queue: &JobQueue) -> stratum_loader::Result<()> {
        Err(LoaderError::Plugin(format!("cannot create {name}")))
    }
}

#[test]
fn test_plugin_failure_does_not_abort_the_load() {
    let (_temp, fs) = game(Some(MANIFEST), true);
    let loader = loader(&fs);
    let sounds = Recorder::new("sound/", Priority::BeforePlay);
    loader.install_loader(ResourceKind::Material, Arc::new(Failing));
    loader.install_loader(ResourceKind::Sound, Arc::clone(&sounds) as Arc<dyn ResourcePreload>);

    loader.begin_load("test", LoadOptions::default()).unwrap();
    loader.end_load(false).unwrap();
    assert_eq!(sounds.completed().len(), 2);
    assert!(!loader.is_active());
}
