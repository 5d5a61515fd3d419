//! Worker pool running completion callbacks and blocking reads

use std::fmt;
use std::sync::Arc;
use tokio::runtime::{Builder, Handle, Runtime};

/// Threads that run job callbacks and file reads off the control thread
pub struct WorkerPool {
    runtime: Option<Runtime>,
    handle: Handle,
}

impl WorkerPool {
    /// Start a pool with `threads` workers (0 uses the number of CPUs)
    pub fn new(threads: usize) -> std::io::Result<Arc<Self>> {
        let mut builder = Builder::new_multi_thread();
        builder.enable_all().thread_name("stratum-worker");
        if threads > 0 {
            builder.worker_threads(threads).max_blocking_threads(threads.max(4));
        }
        let runtime = builder.build()?;
        let handle = runtime.handle().clone();
        Ok(Arc::new(Self {
            runtime: Some(runtime),
            handle,
        }))
    }

    /// Runtime handle for spawning async work on the pool
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Run `work` on a pool thread
    pub fn queue_computation(&self, work: impl FnOnce() + Send + 'static) {
        drop(self.handle.spawn_blocking(work));
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.handle.metrics().num_workers())
            .finish()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // the last reference may be dropped from a worker thread
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
