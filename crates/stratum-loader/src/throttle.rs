//! Memory-pressure throttling of the I/O backend

use crate::io::AsyncIo;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::info;

/// Suspends reads while too much completed data awaits consumption
///
/// Reads stop at the high watermark and restart once consumption brings the
/// total down to the low watermark. Decisions are serialized and read the
/// counter under the lock, so the last adjustment after any change always
/// sees the current total.
#[derive(Debug)]
pub struct Throttle {
    high: AtomicU64,
    low: AtomicU64,
    suspended: AtomicBool,
    decide: Mutex<()>,
}

impl Throttle {
    /// Create a throttle with the given watermarks
    pub const fn new(high: u64, low: u64) -> Self {
        Self {
            high: AtomicU64::new(high),
            low: AtomicU64::new(low),
            suspended: AtomicBool::new(false),
            decide: Mutex::new(()),
        }
    }

    /// Replace both watermarks
    pub fn set_watermarks(&self, high: u64, low: u64) {
        self.high.store(high, Ordering::Relaxed);
        self.low.store(low, Ordering::Relaxed);
    }

    /// `(high, low)` watermarks
    pub fn watermarks(&self) -> (u64, u64) {
        (
            self.high.load(Ordering::Relaxed),
            self.low.load(Ordering::Relaxed),
        )
    }

    /// Whether reads are currently suspended
    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    /// Suspend or resume `io` for the bytes in `memory` awaiting consumption
    ///
    /// Suspending needs reads in flight; with none, nothing would ever bring
    /// the total back down.
    pub fn adjust(&self, io: &dyn AsyncIo, memory: &AtomicU64, active_jobs: usize) {
        let _decide = self.decide.lock();
        let memory = memory.load(Ordering::Acquire);
        let (high, low) = self.watermarks();
        let suspended = self.suspended.load(Ordering::Acquire);
        if !suspended && memory >= high && active_jobs > 0 {
            info!("Suspending I/O at {memory} bytes pending");
            self.suspended.store(true, Ordering::Release);
            io.suspend();
        } else if suspended && memory <= low {
            info!("Resuming I/O at {memory} bytes pending");
            self.suspended.store(false, Ordering::Release);
            io.resume();
        }
    }

    /// Resume `io` if suspended
    pub fn release(&self, io: &dyn AsyncIo) {
        let _decide = self.decide.lock();
        if self.suspended.swap(false, Ordering::AcqRel) {
            io.resume();
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::io::{IoCallback, IoHandle, IoRequest};
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct RecordingIo {
        calls: Mutex<Vec<&'static str>>,
    }

    impl AsyncIo for RecordingIo {
        fn submit(&self, _request: IoRequest, _callback: IoCallback) -> IoHandle {
            IoHandle::new(0)
        }

        fn suspend(&self) {
            self.calls.lock().push("suspend");
        }

        fn resume(&self) {
            self.calls.lock().push("resume");
        }
    }

    #[test]
    fn test_hysteresis() {
        let io = RecordingIo::default();
        let throttle = Throttle::new(100, 20);

        throttle.adjust(&io, &AtomicU64::new(50), 3);
        assert!(!throttle.is_suspended());
        throttle.adjust(&io, &AtomicU64::new(100), 3);
        throttle.adjust(&io, &AtomicU64::new(150), 3);
        assert!(throttle.is_suspended());
        throttle.adjust(&io, &AtomicU64::new(60), 3);
        assert!(throttle.is_suspended());
        throttle.adjust(&io, &AtomicU64::new(20), 3);
        assert!(!throttle.is_suspended());
        throttle.adjust(&io, &AtomicU64::new(10), 3);

        assert_eq!(*io.calls.lock(), vec!["suspend", "resume"]);
    }

    #[test]
    fn test_no_suspend_without_active_jobs() {
        let io = RecordingIo::default();
        let throttle = Throttle::new(100, 20);
        throttle.adjust(&io, &AtomicU64::new(500), 0);
        assert!(!throttle.is_suspended());
        assert!(io.calls.lock().is_empty());
    }

    #[test]
    fn test_release() {
        let io = RecordingIo::default();
        let throttle = Throttle::new(10, 5);
        throttle.release(&io);
        throttle.adjust(&io, &AtomicU64::new(10), 1);
        throttle.release(&io);
        assert_eq!(*io.calls.lock(), vec!["suspend", "resume"]);
        assert_eq!(throttle.watermarks(), (10, 5));
    }
}
