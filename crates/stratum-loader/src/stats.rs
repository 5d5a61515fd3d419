//! Per-load statistics

#![allow(clippy::cast_precision_loss)]

use crate::job::{JobStatus, Priority};
use serde::Serialize;
use std::time::Duration;
use tracing::info;

/// One submitted job as seen at the end of a load
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    /// Name the job was submitted with
    pub name: String,
    /// Full path it was read from
    pub path: String,
    /// Effective priority
    pub priority: Priority,
    /// Position in the submission order
    pub submit_tag: u32,
    /// Bytes read
    pub bytes: u64,
    /// Outcome, if finished
    pub status: Option<JobStatus>,
    /// Time from submission to completion
    pub elapsed: Option<Duration>,
    /// Whether the job had no callback
    pub anonymous: bool,
}

/// Summary of one level load
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoaderStats {
    /// Level that was loaded
    pub level: String,
    /// Wall time from `begin_load` to `end_load`
    pub load_time: Duration,
    /// Jobs submitted to the backend
    pub jobs_submitted: usize,
    /// Jobs finished
    pub jobs_finished: usize,
    /// Jobs whose file was missing
    pub not_found: usize,
    /// Jobs whose read failed
    pub read_failed: usize,
    /// Bytes read in total
    pub bytes_read: u64,
    /// Highest callback-bound bytes held at once
    pub peak_io_memory: u64,
    /// Highest anonymous bytes held at once
    pub peak_anonymous_memory: u64,
    /// Anonymous buffers freed unclaimed at the end of the load
    pub unclaimed_freed: usize,
    /// Every submitted job in submission order
    pub jobs: Vec<JobReport>,
}

impl LoaderStats {
    /// Read throughput over the whole load in bytes per second
    pub fn throughput(&self) -> f64 {
        let secs = self.load_time.as_secs_f64();
        if secs > 0.0 {
            self.bytes_read as f64 / secs
        } else {
            0.0
        }
    }

    /// Log a summary, and every job when `verbose`
    pub fn spew(&self, verbose: bool) {
        info!(
            "Loaded {} in {:.2}s: {} jobs, {} finished, {} missing, {} failed, {} bytes ({:.1} KiB/s)",
            self.level,
            self.load_time.as_secs_f64(),
            self.jobs_submitted,
            self.jobs_finished,
            self.not_found,
            self.read_failed,
            self.bytes_read,
            self.throughput() / 1024.0
        );
        info!(
            "Peak memory: {} bytes in callbacks, {} bytes anonymous; {} unclaimed buffers freed",
            self.peak_io_memory, self.peak_anonymous_memory, self.unclaimed_freed
        );
        if !verbose {
            return;
        }
        for job in &self.jobs {
            info!(
                "{:>5} {:?} {} bytes {:?} {:.1}ms {}",
                job.submit_tag,
                job.priority,
                job.bytes,
                job.status,
                job.elapsed.map_or(0.0, |elapsed| elapsed.as_secs_f64() * 1000.0),
                job.path
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_throughput() {
        let stats = LoaderStats {
            load_time: Duration::from_secs(2),
            bytes_read: 4096,
            ..LoaderStats::default()
        };
        assert!((stats.throughput() - 2048.0).abs() < f64::EPSILON);
        assert!(LoaderStats::default().throughput().abs() < f64::EPSILON);
    }

    #[test]
    fn test_serializes_job_reports() {
        let stats = LoaderStats {
            level: "test".to_string(),
            jobs: vec![JobReport {
                name: "a.dat".to_string(),
                path: "/game/a.dat".to_string(),
                priority: Priority::BeforePlay,
                submit_tag: 1,
                bytes: 3,
                status: Some(JobStatus::Ok),
                elapsed: None,
                anonymous: true,
            }],
            ..LoaderStats::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["jobs"][0]["priority"], "BeforePlay");
        assert_eq!(json["jobs"][0]["status"], "Ok");
    }
}
