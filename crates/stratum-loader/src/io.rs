//! Asynchronous read backends
//!
//! The queue hands every read to an [`AsyncIo`] implementation. The default
//! [`FileSystemIo`] reads through the virtual filesystem on the worker pool,
//! with a concurrency cap and a suspend gate driven by the throttle.

use crate::job::{JobStatus, Priority};
use crate::pool::WorkerPool;
use std::fmt;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use stratum_vfs::FileSystem;
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, watch};
use tracing::{debug, trace, warn};

/// Scheduling hint passed to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IoPriority {
    /// Background reads
    Low,
    /// Reads needed before gameplay
    Normal,
    /// Reads blocking the load
    High,
}

impl From<Priority> for IoPriority {
    fn from(priority: Priority) -> Self {
        match priority {
            Priority::AnyTime => Self::Low,
            Priority::BeforePlay => Self::Normal,
            Priority::DuringPreload => Self::High,
        }
    }
}

/// One read handed to a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoRequest {
    /// Full path of the file
    pub path: String,
    /// Offset of the first byte to read
    pub offset: u64,
    /// Bytes to read; `None` reads to the end of the file
    pub length: Option<u64>,
    /// Buffer to read into
    pub target: Option<Vec<u8>>,
    /// Scheduling hint
    pub priority: IoPriority,
}

/// Called once per request with the bytes read and the outcome
pub type IoCallback = Box<dyn FnOnce(Vec<u8>, JobStatus) + Send + 'static>;

/// Identifies a submitted request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IoHandle(u64);

impl IoHandle {
    /// Create a handle from a backend-specific id
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Backend-specific id
    pub const fn id(self) -> u64 {
        self.0
    }
}

/// A backend that performs reads and reports them through callbacks
///
/// Callbacks may run on any thread and may submit further requests.
pub trait AsyncIo: Send + Sync {
    /// Start a read
    fn submit(&self, request: IoRequest, callback: IoCallback) -> IoHandle;

    /// Stop starting new reads; reads in progress still complete
    fn suspend(&self);

    /// Start reads again after [`Self::suspend`]
    fn resume(&self);
}

/// Reads through a [`FileSystem`] on the worker pool
pub struct FileSystemIo {
    fs: Arc<FileSystem>,
    handle: Handle,
    permits: Arc<Semaphore>,
    suspended: watch::Sender<bool>,
    next_handle: AtomicU64,
}

impl FileSystemIo {
    /// Create a backend allowing `concurrency` reads at once
    pub fn new(fs: Arc<FileSystem>, pool: &WorkerPool, concurrency: usize) -> Self {
        let (suspended, _) = watch::channel(false);
        Self {
            fs,
            handle: pool.handle().clone(),
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            suspended,
            next_handle: AtomicU64::new(1),
        }
    }

    /// Whether new reads are held back
    pub fn is_suspended(&self) -> bool {
        *self.suspended.borrow()
    }
}

impl fmt::Debug for FileSystemIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSystemIo")
            .field("available_permits", &self.permits.available_permits())
            .field("suspended", &self.is_suspended())
            .finish_non_exhaustive()
    }
}

impl AsyncIo for FileSystemIo {
    fn submit(&self, request: IoRequest, callback: IoCallback) -> IoHandle {
        let handle = IoHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let fs = Arc::clone(&self.fs);
        let permits = Arc::clone(&self.permits);
        let mut gate = self.suspended.subscribe();

        self.handle.spawn(async move {
            // the gate is checked while holding a permit, so a suspend issued
            // by a completion stops every read queued behind it
            let permit = permits.acquire_owned().await.ok();
            if gate.wait_for(|suspended| !suspended).await.is_err() {
                debug!("I/O backend dropped while request {} waited", handle.id());
            }
            let outcome = tokio::task::spawn_blocking(move || {
                let (data, status) = read_request(&fs, request);
                callback(data, status);
                drop(permit);
            })
            .await;
            if let Err(e) = outcome {
                warn!("I/O request {} did not complete: {e}", handle.id());
            }
        });
        handle
    }

    fn suspend(&self) {
        self.suspended.send_replace(true);
    }

    fn resume(&self) {
        self.suspended.send_replace(false);
    }
}

fn read_request(fs: &FileSystem, request: IoRequest) -> (Vec<u8>, JobStatus) {
    let IoRequest {
        path,
        offset,
        length,
        target,
        ..
    } = request;
    let mut data = target.unwrap_or_default();
    data.clear();

    let mut file = match fs.open(&path, None) {
        Ok(file) => file,
        Err(e) if e.is_not_found() => {
            debug!("Read of missing file {path}");
            return (data, JobStatus::NotFound);
        }
        Err(e) => {
            warn!("Could not open {path}: {e}");
            return (data, JobStatus::ReadFailed);
        }
    };

    let read = file.seek(SeekFrom::Start(offset)).and_then(|_| match length {
        Some(length) => file.by_ref().take(length).read_to_end(&mut data),
        None => file.read_to_end(&mut data),
    });
    match read {
        Ok(n) if length.is_none_or(|length| n as u64 == length) => {
            trace!("Read {n} bytes from {path}");
            (data, JobStatus::Ok)
        }
        Ok(n) => {
            warn!(
                "Short read of {path}: {n} of {} bytes",
                length.unwrap_or_default()
            );
            (data, JobStatus::ReadFailed)
        }
        Err(e) => {
            warn!("Could not read {path}: {e}");
            (data, JobStatus::ReadFailed)
        }
    }
}
