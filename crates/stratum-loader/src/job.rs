//! Jobs submitted to the queue and the state tracked for each

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::time::Instant;

/// When a job must be complete
///
/// Ordered so that more urgent priorities compare greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
pub enum Priority {
    /// May finish during gameplay
    #[default]
    AnyTime,
    /// Must finish before gameplay starts
    BeforePlay,
    /// Must finish before `begin_load` returns
    DuringPreload,
}

/// Outcome of one job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum JobStatus {
    /// All requested bytes were read
    Ok,
    /// The file could not be found or opened
    NotFound,
    /// The file opened but reading failed
    ReadFailed,
}

/// Data delivered to a job's callback or to a claimant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Name the job was submitted with
    pub name: String,
    /// Bytes read; empty on failure
    pub data: Vec<u8>,
    /// How the read went
    pub status: JobStatus,
}

impl Completion {
    /// Whether the read succeeded
    pub fn is_ok(&self) -> bool {
        self.status == JobStatus::Ok
    }
}

/// Data of an anonymous job, taken by claiming it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claimed {
    /// Bytes read; empty on failure
    pub data: Vec<u8>,
    /// How the read went
    pub status: JobStatus,
}

/// Callback invoked on a worker thread when a job completes
pub type JobCallback = Box<dyn FnOnce(Completion) + Send + 'static>;

/// A read request submitted to the [`JobQueue`](crate::JobQueue)
///
/// Jobs without a callback are anonymous: their data is held until claimed
/// by name or freed at the end of the load.
pub struct LoaderJob {
    pub(crate) name: String,
    pub(crate) path_id: Option<String>,
    pub(crate) offset: u64,
    pub(crate) length: Option<u64>,
    pub(crate) target: Option<Vec<u8>>,
    pub(crate) priority: Priority,
    pub(crate) callback: Option<JobCallback>,
}

impl LoaderJob {
    /// Read the whole of `name` at [`Priority::AnyTime`]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path_id: None,
            offset: 0,
            length: None,
            target: None,
            priority: Priority::AnyTime,
            callback: None,
        }
    }

    /// Resolve the name under `path_id`
    #[must_use]
    pub fn with_path_id(mut self, path_id: impl Into<String>) -> Self {
        self.path_id = Some(path_id.into());
        self
    }

    /// Read `length` bytes from `offset` (`None` reads to the end)
    #[must_use]
    pub const fn with_range(mut self, offset: u64, length: Option<u64>) -> Self {
        self.offset = offset;
        self.length = length;
        self
    }

    /// Read into a caller-provided buffer
    #[must_use]
    pub fn with_target(mut self, target: Vec<u8>) -> Self {
        self.target = Some(target);
        self
    }

    /// Set the priority
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the completion callback
    #[must_use]
    pub fn with_callback(mut self, callback: impl FnOnce(Completion) + Send + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Name to read
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Requested priority
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    /// Whether the job has no callback
    pub const fn is_anonymous(&self) -> bool {
        self.callback.is_none()
    }
}

impl fmt::Debug for LoaderJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderJob")
            .field("name", &self.name)
            .field("path_id", &self.path_id)
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("priority", &self.priority)
            .field("anonymous", &self.is_anonymous())
            .finish_non_exhaustive()
    }
}

/// Bookkeeping that changes while a job runs
#[derive(Debug, Clone, Default)]
pub(crate) struct JobRecord {
    pub(crate) submit_tag: u32,
    pub(crate) submitted_at: Option<Instant>,
    pub(crate) finished_at: Option<Instant>,
    pub(crate) bytes_read: u64,
    pub(crate) status: Option<JobStatus>,
    pub(crate) finished: bool,
    pub(crate) claimed: bool,
}

/// A submitted job as tracked by the queue
pub(crate) struct FileJob {
    /// Full path when the name resolved, the requested name otherwise
    pub(crate) path: String,
    pub(crate) requested: String,
    pub(crate) exists: bool,
    pub(crate) offset: u64,
    pub(crate) length: Option<u64>,
    pub(crate) priority: Priority,
    pub(crate) anonymous: bool,
    pub(crate) callback: Mutex<Option<JobCallback>>,
    /// Target before the read, the unclaimed data of an anonymous job after
    pub(crate) buffer: Mutex<Option<Vec<u8>>>,
    pub(crate) record: Mutex<JobRecord>,
}

impl FileJob {
    pub(crate) fn new(job: LoaderJob, path: String, exists: bool, priority: Priority) -> Self {
        let anonymous = job.is_anonymous();
        Self {
            path,
            requested: job.name,
            exists,
            offset: job.offset,
            length: job.length,
            priority,
            anonymous,
            callback: Mutex::new(job.callback),
            buffer: Mutex::new(job.target),
            record: Mutex::new(JobRecord::default()),
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.record.lock().finished
    }
}

impl fmt::Debug for FileJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileJob")
            .field("path", &self.path)
            .field("priority", &self.priority)
            .field("anonymous", &self.anonymous)
            .field("record", &*self.record.lock())
            .finish_non_exhaustive()
    }
}
