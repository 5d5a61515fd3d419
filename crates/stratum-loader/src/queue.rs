//! The job queue
//!
//! Jobs submitted while the loader is batching are held until the level's
//! resources are all created, then sorted and handed to the backend as one
//! batch. Later jobs go through a pending list that is drained whenever the
//! backend has nothing in flight, so every batch is issued in layout order.
//!
//! Completions run on the worker pool: jobs with a callback get their data
//! there, anonymous jobs park it until claimed by name.

use crate::config::LoaderConfig;
use crate::error::{LoaderError, Result};
use crate::io::{AsyncIo, IoRequest};
use crate::job::{Claimed, Completion, FileJob, JobStatus, LoaderJob, Priority};
use crate::layout::LayoutOrder;
use crate::pool::WorkerPool;
use crate::progress::{LoaderProgress, io_fraction, stage};
use crate::stats::{JobReport, LoaderStats};
use crate::throttle::Throttle;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use stratum_pack::path::fix_slashes;
use stratum_vfs::{FileSystem, PathFilter, PathType};
use tracing::{debug, trace, warn};

#[derive(Debug, Default)]
struct QueueState {
    pending: Vec<Arc<FileJob>>,
    /// Jobs handed to the backend and not yet completed
    active_jobs: usize,
    /// Jobs submitted and not yet finished
    queued: usize,
    /// Issued `DuringPreload` jobs not yet finished
    high_priority: usize,
    /// Issued `BeforePlay` jobs not yet finished
    before_play: usize,
    submit_count: u32,
}

impl QueueState {
    fn blocks_preload(&self) -> bool {
        self.high_priority > 0
            || self
                .pending
                .iter()
                .any(|job| job.priority == Priority::DuringPreload)
    }

    fn blocks_play(&self) -> bool {
        self.high_priority > 0
            || self.before_play > 0
            || self
                .pending
                .iter()
                .any(|job| job.priority != Priority::AnyTime)
    }
}

struct Shared {
    fs: Arc<FileSystem>,
    layout: LayoutOrder,
    pool: Arc<WorkerPool>,
    io: Arc<dyn AsyncIo>,
    throttle: Throttle,
    state: Mutex<QueueState>,
    changed: Condvar,
    batched: Mutex<Vec<Arc<FileJob>>>,
    anonymous: Mutex<HashMap<String, Arc<FileJob>>>,
    submitted: Mutex<Vec<Arc<FileJob>>>,
    active: AtomicBool,
    batching: AtomicBool,
    io_memory: AtomicU64,
    anonymous_memory: AtomicU64,
    peak_io_memory: AtomicU64,
    peak_anonymous_memory: AtomicU64,
}

/// Accepts read jobs and delivers their data
///
/// Cheap to clone; clones share one queue. Resource plugins receive it in
/// `create_resource` and callbacks may keep a clone to submit follow-up
/// reads.
#[derive(Clone)]
pub struct JobQueue {
    shared: Arc<Shared>,
}

impl JobQueue {
    pub(crate) fn new(
        fs: Arc<FileSystem>,
        config: &LoaderConfig,
        pool: Arc<WorkerPool>,
        io: Arc<dyn AsyncIo>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                fs,
                layout: config.layout_order.clone(),
                pool,
                io,
                throttle: Throttle::new(config.high_watermark, config.low_watermark),
                state: Mutex::new(QueueState::default()),
                changed: Condvar::new(),
                batched: Mutex::new(Vec::new()),
                anonymous: Mutex::new(HashMap::new()),
                submitted: Mutex::new(Vec::new()),
                active: AtomicBool::new(false),
                batching: AtomicBool::new(false),
                io_memory: AtomicU64::new(0),
                anonymous_memory: AtomicU64::new(0),
                peak_io_memory: AtomicU64::new(0),
                peak_anonymous_memory: AtomicU64::new(0),
            }),
        }
    }

    /// Submit a read
    ///
    /// Names resolve through the filesystem under the job's path ID; a name
    /// that does not resolve still completes, with [`JobStatus::NotFound`].
    /// Files served by the level pack are promoted to
    /// [`Priority::DuringPreload`]. Jobs without a callback must be
    /// [`Priority::AnyTime`] and their names unique until claimed.
    pub fn submit(&self, job: LoaderJob) -> Result<()> {
        let shared = &self.shared;
        if !shared.active.load(Ordering::Acquire) {
            return Err(LoaderError::NotActive);
        }
        if job.is_anonymous() && job.priority != Priority::AnyTime {
            return Err(LoaderError::Protocol(format!(
                "{} has no callback but priority {:?}",
                job.name, job.priority
            )));
        }

        let name = fix_slashes(&job.name);
        let (path, exists, from_level) = if is_absolute_name(&name) {
            let from_level = name.to_ascii_lowercase().contains(".bsp");
            (name, true, from_level)
        } else {
            match shared
                .fs
                .resolve(&name, job.path_id.as_deref(), PathFilter::None)
            {
                Ok(resolved) => (
                    resolved.full_path().to_string(),
                    true,
                    resolved.path_type() == PathType::MapPack,
                ),
                Err(e) => {
                    debug!("{name} not found: {e}");
                    (name, false, false)
                }
            }
        };
        let priority = if from_level {
            Priority::DuringPreload
        } else {
            job.priority
        };

        let anonymous = job.is_anonymous();
        let job = Arc::new(FileJob::new(job, path, exists, priority));
        if anonymous {
            match shared.anonymous.lock().entry(anonymous_key(&job.requested)) {
                Entry::Occupied(_) => {
                    return Err(LoaderError::Protocol(format!(
                        "{} is already queued",
                        job.requested
                    )));
                }
                Entry::Vacant(slot) => {
                    slot.insert(Arc::clone(&job));
                }
            }
        }

        {
            let mut batched = shared.batched.lock();
            if shared.batching.load(Ordering::Acquire) {
                shared.state.lock().queued += 1;
                batched.push(job);
                return Ok(());
            }
        }

        trace!("Late submission of {}", job.requested);
        {
            let mut state = shared.state.lock();
            state.queued += 1;
            state.pending.push(job);
        }
        shared.drain_pending();
        Ok(())
    }

    /// Take the data of a finished anonymous job
    ///
    /// Each job can be claimed once. Claiming while batching, or claiming a
    /// name that is unknown or still in flight, is a protocol error.
    pub fn claim_sync(&self, name: &str) -> Result<Claimed> {
        let shared = &self.shared;
        if self.is_batching() {
            warn!("Claim of {name} while batching");
            return Err(LoaderError::Protocol(format!(
                "{name} claimed while batching"
            )));
        }

        let key = anonymous_key(name);
        let job = {
            let mut table = shared.anonymous.lock();
            let finished = match table.get(&key) {
                Some(job) => job.is_finished(),
                None => {
                    warn!("Claim of unknown job {name}");
                    return Err(LoaderError::Protocol(format!("{name} was not queued")));
                }
            };
            if !finished {
                warn!("Claim of unfinished job {name}");
                return Err(LoaderError::Protocol(format!("{name} has not finished")));
            }
            table
                .remove(&key)
                .ok_or_else(|| LoaderError::Protocol(format!("{name} was not queued")))?
        };

        let data = job.buffer.lock().take().unwrap_or_default();
        let status = {
            let mut record = job.record.lock();
            record.claimed = true;
            record.status.unwrap_or(JobStatus::NotFound)
        };
        saturating_sub(&shared.anonymous_memory, data.len() as u64);
        trace!("Claimed {}", job.requested);
        Ok(Claimed { data, status })
    }

    /// Claim like [`Self::claim_sync`] and deliver the data on the pool
    pub fn claim_async(
        &self,
        name: &str,
        callback: impl FnOnce(Claimed) + Send + 'static,
    ) -> Result<()> {
        let claimed = self.claim_sync(name)?;
        self.shared.pool.queue_computation(move || callback(claimed));
        Ok(())
    }

    /// Block until every submitted job has finished
    ///
    /// Returns at once while batching, as batched jobs only start when the
    /// batch is flushed.
    pub fn wait_idle(&self) {
        if self.is_batching() {
            return;
        }
        let shared = &self.shared;
        shared.drain_pending();
        let mut state = shared.state.lock();
        while state.queued > 0 {
            shared.changed.wait(&mut state);
        }
    }

    /// Whether a load is in progress
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Whether submissions are being held for the initial batch
    pub fn is_batching(&self) -> bool {
        self.shared.batching.load(Ordering::Acquire)
    }

    /// Jobs submitted and not yet finished
    pub fn queued_jobs(&self) -> usize {
        self.shared.state.lock().queued
    }

    /// Jobs currently with the backend
    pub fn active_jobs(&self) -> usize {
        self.shared.state.lock().active_jobs
    }

    /// Bytes read and awaiting their callbacks
    pub fn io_memory(&self) -> u64 {
        self.shared.io_memory.load(Ordering::Acquire)
    }

    /// Bytes held by unclaimed anonymous jobs
    pub fn anonymous_memory(&self) -> u64 {
        self.shared.anonymous_memory.load(Ordering::Acquire)
    }

    /// Whether the throttle has suspended reads
    pub fn is_throttled(&self) -> bool {
        self.shared.throttle.is_suspended()
    }

    pub(crate) fn is_idle(&self) -> bool {
        let state = self.shared.state.lock();
        state.active_jobs == 0 && state.queued == 0
    }

    pub(crate) fn set_watermarks(&self, high: u64, low: u64) {
        self.shared.throttle.set_watermarks(high, low);
    }

    pub(crate) fn watermarks(&self) -> (u64, u64) {
        self.shared.throttle.watermarks()
    }

    /// Start a load: forget finished jobs and reset the counters
    pub(crate) fn begin(&self) {
        let shared = &self.shared;
        shared
            .submitted
            .lock()
            .retain(|job| !job.is_finished());
        shared.state.lock().submit_count = 0;
        shared.peak_io_memory.store(
            shared.io_memory.load(Ordering::Acquire),
            Ordering::Release,
        );
        shared.peak_anonymous_memory.store(
            shared.anonymous_memory.load(Ordering::Acquire),
            Ordering::Release,
        );
        shared.active.store(true, Ordering::Release);
    }

    pub(crate) fn set_batching(&self, batching: bool) {
        let _batched = self.shared.batched.lock();
        self.shared.batching.store(batching, Ordering::Release);
    }

    /// Return to idle after a failed start
    pub(crate) fn reset(&self) {
        let shared = &self.shared;
        let dropped = {
            let mut batched = shared.batched.lock();
            shared.batching.store(false, Ordering::Release);
            std::mem::take(&mut *batched)
        };
        if !dropped.is_empty() {
            let mut state = shared.state.lock();
            state.queued = state.queued.saturating_sub(dropped.len());
        }
        shared.active.store(false, Ordering::Release);
        shared.throttle.release(shared.io.as_ref());
    }

    pub(crate) fn set_inactive(&self) {
        self.shared.active.store(false, Ordering::Release);
    }

    /// Issue the batch and block until every `DuringPreload` job is done
    pub(crate) fn flush_batched_and_wait(&self, progress: &dyn LoaderProgress) {
        let shared = &self.shared;
        {
            // late jobs issued during creation finish first so the batch
            // sorts as a whole
            let mut state = shared.state.lock();
            while state.active_jobs != 0 {
                shared.changed.wait(&mut state);
            }
        }

        let batch = {
            let mut batched = shared.batched.lock();
            shared.batching.store(false, Ordering::Release);
            std::mem::take(&mut *batched)
        };
        debug!("Issuing batch of {} jobs", batch.len());
        shared.state.lock().pending.extend(batch);
        shared.drain_pending();

        progress.update(stage::IO);
        let mut state = shared.state.lock();
        let mut total = state.high_priority;
        let mut reported = stage::IO;
        while state.blocks_preload() {
            shared.changed.wait(&mut state);
            total = total.max(state.high_priority);
            let fraction = io_fraction(total - state.high_priority, total);
            if fraction > reported {
                reported = fraction;
                MutexGuard::unlocked(&mut state, || progress.update(fraction));
            }
        }
        drop(state);
        progress.update(1.0);
    }

    /// Block until nothing needed before play remains
    pub(crate) fn wait_for_play(&self) {
        let shared = &self.shared;
        shared.drain_pending();
        let mut state = shared.state.lock();
        while state.blocks_play() {
            shared.changed.wait(&mut state);
        }
    }

    /// Free finished anonymous buffers nobody claimed
    pub(crate) fn free_unclaimed(&self) -> usize {
        let shared = &self.shared;
        let mut freed = 0;
        shared.anonymous.lock().retain(|_, job| {
            if !job.is_finished() {
                return true;
            }
            if let Some(data) = job.buffer.lock().take() {
                saturating_sub(&shared.anonymous_memory, data.len() as u64);
            }
            debug!("Freeing unclaimed {}", job.requested);
            freed += 1;
            false
        });
        freed
    }

    /// Warn about and clear memory still accounted with nothing queued
    pub(crate) fn check_memory(&self) {
        let shared = &self.shared;
        if shared.state.lock().queued != 0 {
            return;
        }
        let io_memory = shared.io_memory.swap(0, Ordering::AcqRel);
        let anonymous_memory = shared.anonymous_memory.swap(0, Ordering::AcqRel);
        if io_memory != 0 || anonymous_memory != 0 {
            warn!(
                "Memory still accounted after load: {io_memory} bytes in callbacks, {anonymous_memory} bytes anonymous"
            );
        }
        shared.throttle.release(shared.io.as_ref());
    }

    pub(crate) fn stats(&self, level: &str, load_time: Duration, unclaimed_freed: usize) -> LoaderStats {
        let shared = &self.shared;
        let mut jobs: Vec<JobReport> = shared
            .submitted
            .lock()
            .iter()
            .map(|job| {
                let record = job.record.lock();
                JobReport {
                    name: job.requested.clone(),
                    path: job.path.clone(),
                    priority: job.priority,
                    submit_tag: record.submit_tag,
                    bytes: record.bytes_read,
                    status: record.status,
                    elapsed: record
                        .submitted_at
                        .zip(record.finished_at)
                        .map(|(submitted, finished)| finished.duration_since(submitted)),
                    anonymous: job.anonymous,
                }
            })
            .collect();
        jobs.sort_by_key(|job| job.submit_tag);

        let count = |status: JobStatus| jobs.iter().filter(|job| job.status == Some(status)).count();
        LoaderStats {
            level: level.to_string(),
            load_time,
            jobs_submitted: jobs.len(),
            jobs_finished: jobs.iter().filter(|job| job.status.is_some()).count(),
            not_found: count(JobStatus::NotFound),
            read_failed: count(JobStatus::ReadFailed),
            bytes_read: jobs.iter().map(|job| job.bytes).sum(),
            peak_io_memory: shared.peak_io_memory.load(Ordering::Acquire),
            peak_anonymous_memory: shared.peak_anonymous_memory.load(Ordering::Acquire),
            unclaimed_freed,
            jobs,
        }
    }
}

impl fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("JobQueue")
            .field("active", &self.is_active())
            .field("batching", &self.is_batching())
            .field("queued", &state.queued)
            .field("active_jobs", &state.active_jobs)
            .field("pending", &state.pending.len())
            .finish_non_exhaustive()
    }
}

impl Shared {
    /// Sort the pending list into a batch and count it as issued
    fn take_batch(&self, state: &mut QueueState) -> Vec<Arc<FileJob>> {
        let mut batch = std::mem::take(&mut state.pending);
        batch.sort_by(|a, b| self.layout.compare(a, b));
        let now = Instant::now();
        for job in &batch {
            state.submit_count += 1;
            {
                let mut record = job.record.lock();
                record.submit_tag = state.submit_count;
                record.submitted_at = Some(now);
            }
            match job.priority {
                Priority::DuringPreload => state.high_priority += 1,
                Priority::BeforePlay => state.before_play += 1,
                Priority::AnyTime => {}
            }
            if job.exists {
                state.active_jobs += 1;
            }
        }
        batch
    }

    /// Issue the pending list if the backend is idle
    fn drain_pending(self: &Arc<Self>) {
        let batch = {
            let mut state = self.state.lock();
            if state.active_jobs != 0 || state.pending.is_empty() {
                return;
            }
            self.take_batch(&mut state)
        };
        self.dispatch(batch);
    }

    fn dispatch(self: &Arc<Self>, batch: Vec<Arc<FileJob>>) {
        if batch.is_empty() {
            return;
        }
        self.submitted.lock().extend(batch.iter().cloned());
        for job in batch {
            if job.exists {
                let request = IoRequest {
                    path: job.path.clone(),
                    offset: job.offset,
                    length: job.length,
                    target: job.buffer.lock().take(),
                    priority: job.priority.into(),
                };
                let shared = Arc::clone(self);
                let completed = Arc::clone(&job);
                let handle = self.io.submit(
                    request,
                    Box::new(move |data, status| shared.on_io_complete(completed, data, status)),
                );
                trace!("Issued {} as request {}", job.path, handle.id());
            } else {
                let shared = Arc::clone(self);
                self.pool.queue_computation(move || {
                    shared.finish_job(&job, Vec::new(), JobStatus::NotFound);
                });
            }
        }
    }

    fn on_io_complete(self: &Arc<Self>, job: Arc<FileJob>, data: Vec<u8>, status: JobStatus) {
        let bytes = data.len() as u64;
        if job.anonymous {
            add_with_peak(&self.anonymous_memory, &self.peak_anonymous_memory, bytes);
        } else {
            add_with_peak(&self.io_memory, &self.peak_io_memory, bytes);
        }

        let shared = Arc::clone(self);
        self.pool
            .queue_computation(move || shared.finish_job(&job, data, status));

        // the decrement and the next drain share one lock so a job pushed
        // to pending in between is never stranded
        let (batch, active_jobs) = {
            let mut state = self.state.lock();
            state.active_jobs = state.active_jobs.saturating_sub(1);
            let batch = if state.active_jobs == 0 {
                self.changed.notify_all();
                self.take_batch(&mut state)
            } else {
                Vec::new()
            };
            (batch, state.active_jobs)
        };
        self.throttle
            .adjust(self.io.as_ref(), &self.io_memory, active_jobs);
        self.dispatch(batch);
    }

    fn finish_job(&self, job: &FileJob, data: Vec<u8>, status: JobStatus) {
        let bytes = data.len() as u64;
        if status != JobStatus::Ok && job.exists {
            warn!("Failed to load {}: {status:?}", job.path);
        }

        let callback = job.callback.lock().take();
        if let Some(callback) = callback {
            callback(Completion {
                name: job.requested.clone(),
                data,
                status,
            });
            saturating_sub(&self.io_memory, bytes);
        } else {
            *job.buffer.lock() = Some(data);
        }

        {
            let mut record = job.record.lock();
            record.finished_at = Some(Instant::now());
            record.bytes_read = bytes;
            record.status = Some(status);
            record.finished = true;
        }

        let active_jobs = {
            let mut state = self.state.lock();
            match job.priority {
                Priority::DuringPreload => {
                    state.high_priority = state.high_priority.saturating_sub(1);
                }
                Priority::BeforePlay => state.before_play = state.before_play.saturating_sub(1),
                Priority::AnyTime => {}
            }
            state.queued = state.queued.saturating_sub(1);
            self.changed.notify_all();
            state.active_jobs
        };
        self.throttle
            .adjust(self.io.as_ref(), &self.io_memory, active_jobs);
    }
}

fn anonymous_key(name: &str) -> String {
    fix_slashes(name).to_ascii_lowercase()
}

fn is_absolute_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    name.starts_with('/') || (bytes.len() > 2 && bytes[1] == b':' && bytes[2] == b'/')
}

fn add_with_peak(value: &AtomicU64, peak: &AtomicU64, bytes: u64) {
    let now = value.fetch_add(bytes, Ordering::AcqRel) + bytes;
    peak.fetch_max(now, Ordering::AcqRel);
}

fn saturating_sub(value: &AtomicU64, bytes: u64) {
    let _ = value.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
        Some(current.saturating_sub(bytes))
    });
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::io::{IoCallback, IoHandle};
    use crate::progress::NullProgress;
    use pretty_assertions::assert_eq;
    use std::sync::mpsc;
    use stratum_vfs::FsConfig;

    /// Serves reads from memory, completing each one inline
    #[derive(Default)]
    struct MemoryIo {
        files: HashMap<String, Vec<u8>>,
        order: Mutex<Vec<String>>,
    }

    impl AsyncIo for MemoryIo {
        fn submit(&self, request: IoRequest, callback: IoCallback) -> IoHandle {
            self.order.lock().push(request.path.clone());
            match self.files.get(&request.path) {
                Some(data) => callback(data.clone(), JobStatus::Ok),
                None => callback(Vec::new(), JobStatus::NotFound),
            }
            IoHandle::new(0)
        }

        fn suspend(&self) {}

        fn resume(&self) {}
    }

    fn queue_with(files: &[(&str, &[u8])]) -> (JobQueue, Arc<MemoryIo>) {
        let io = Arc::new(MemoryIo {
            files: files
                .iter()
                .map(|(path, data)| ((*path).to_string(), data.to_vec()))
                .collect(),
            order: Mutex::new(Vec::new()),
        });
        let queue = JobQueue::new(
            Arc::new(FileSystem::new(FsConfig::default())),
            &LoaderConfig::default().with_layout_order(LayoutOrder::flat()),
            WorkerPool::new(2).unwrap(),
            Arc::clone(&io) as Arc<dyn AsyncIo>,
        );
        (queue, io)
    }

    #[test]
    fn test_submit_requires_active_load() {
        let (queue, _io) = queue_with(&[]);
        assert!(matches!(
            queue.submit(LoaderJob::new("/data/a.bin")),
            Err(LoaderError::NotActive)
        ));
    }

    #[test]
    fn test_anonymous_job_must_be_any_time() {
        let (queue, _io) = queue_with(&[]);
        queue.begin();
        let job = LoaderJob::new("/data/a.bin").with_priority(Priority::BeforePlay);
        assert!(matches!(queue.submit(job), Err(LoaderError::Protocol(_))));
        assert_eq!(queue.queued_jobs(), 0);
    }

    #[test]
    fn test_callback_receives_data() {
        let (queue, _io) = queue_with(&[("/data/a.bin", b"abc")]);
        queue.begin();
        let (tx, rx) = mpsc::channel();
        queue
            .submit(
                LoaderJob::new("/data/a.bin")
                    .with_priority(Priority::BeforePlay)
                    .with_callback(move |completion| tx.send(completion).unwrap()),
            )
            .unwrap();
        let completion = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(completion.is_ok());
        assert_eq!(completion.data, b"abc");

        queue.wait_idle();
        assert!(queue.is_idle());
        assert_eq!(queue.io_memory(), 0);
    }

    #[test]
    fn test_unresolved_name_completes_as_not_found() {
        let (queue, io) = queue_with(&[]);
        queue.begin();
        let (tx, rx) = mpsc::channel();
        queue
            .submit(
                LoaderJob::new("sound/missing.wav")
                    .with_callback(move |completion| tx.send(completion.status).unwrap()),
            )
            .unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            JobStatus::NotFound
        );
        assert!(io.order.lock().is_empty());
    }

    #[test]
    fn test_anonymous_claim_transfers_once() {
        let (queue, _io) = queue_with(&[("/data/level.dat", b"payload")]);
        queue.begin();
        queue.submit(LoaderJob::new("/data/level.dat")).unwrap();
        queue.wait_idle();
        assert_eq!(queue.anonymous_memory(), 7);

        let claimed = queue.claim_sync("\\data\\LEVEL.dat").unwrap();
        assert_eq!(claimed.data, b"payload");
        assert_eq!(claimed.status, JobStatus::Ok);
        assert_eq!(queue.anonymous_memory(), 0);
        assert!(matches!(
            queue.claim_sync("/data/level.dat"),
            Err(LoaderError::Protocol(_))
        ));
    }

    #[test]
    fn test_duplicate_anonymous_name_is_rejected() {
        let (queue, _io) = queue_with(&[]);
        queue.begin();
        queue.set_batching(true);
        queue.submit(LoaderJob::new("/data/a.dat")).unwrap();
        assert!(matches!(
            queue.submit(LoaderJob::new("/DATA/a.dat")),
            Err(LoaderError::Protocol(_))
        ));
    }

    #[test]
    fn test_claim_while_batching_is_rejected() {
        let (queue, _io) = queue_with(&[]);
        queue.begin();
        queue.set_batching(true);
        queue.submit(LoaderJob::new("/data/a.dat")).unwrap();
        assert!(matches!(
            queue.claim_sync("/data/a.dat"),
            Err(LoaderError::Protocol(_))
        ));
    }

    #[test]
    fn test_batch_is_issued_in_priority_order() {
        let files: &[(&str, &[u8])] = &[("/d/a", b"1"), ("/d/b", b"2"), ("/d/c", b"3")];
        let (queue, io) = queue_with(files);
        queue.begin();
        queue.set_batching(true);

        let submit = |path: &str, priority| {
            queue
                .submit(
                    LoaderJob::new(path)
                        .with_priority(priority)
                        .with_callback(|_| {}),
                )
                .unwrap();
        };
        submit("/d/a", Priority::AnyTime);
        submit("/d/b", Priority::DuringPreload);
        submit("/d/c", Priority::BeforePlay);
        assert!(io.order.lock().is_empty());
        assert_eq!(queue.queued_jobs(), 3);

        queue.flush_batched_and_wait(&NullProgress);
        queue.wait_idle();
        assert_eq!(*io.order.lock(), vec!["/d/b", "/d/c", "/d/a"]);

        let stats = queue.stats("test", Duration::from_secs(1), 0);
        assert_eq!(stats.jobs_submitted, 3);
        assert_eq!(stats.jobs_finished, 3);
        assert_eq!(stats.bytes_read, 3);
        let tags: Vec<u32> = stats.jobs.iter().map(|job| job.submit_tag).collect();
        assert_eq!(tags, vec![1, 2, 3]);
    }

    #[test]
    fn test_free_unclaimed() {
        let (queue, _io) = queue_with(&[("/d/a", b"1234")]);
        queue.begin();
        queue.submit(LoaderJob::new("/d/a")).unwrap();
        queue.wait_idle();
        assert_eq!(queue.free_unclaimed(), 1);
        assert_eq!(queue.anonymous_memory(), 0);
        assert!(queue.claim_sync("/d/a").is_err());
    }

    #[test]
    fn test_absolute_names() {
        assert!(is_absolute_name("/game/a.txt"));
        assert!(is_absolute_name("C:/game/a.txt"));
        assert!(!is_absolute_name("a.txt"));
    }
}
