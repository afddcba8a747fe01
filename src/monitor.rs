//! Capture counters and the periodic progress line
//!
//! The counters are owned by the session and shared by reference with the
//! producer callback, writer and retune loop. The monitor only reads them.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::tick;
use tracing::{info, warn};

use crate::queue::SampleQueue;

/// Statistics for a capture session (atomic for thread-safe access)
#[derive(Debug, Default)]
pub struct CaptureStats {
    pub samples_captured: AtomicU64,
    pub chunks_received: AtomicU64,
    pub bytes_written: AtomicU64,
    pub tunes_applied: AtomicU64,
    pub tune_failures: AtomicU64,
    pub commanded_freq: AtomicU32,
    pub pass_complete: AtomicBool,
}

impl CaptureStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_chunk(&self, bytes: usize) {
        self.chunks_received.fetch_add(1, Ordering::Relaxed);
        self.samples_captured
            .fetch_add((bytes / 2) as u64, Ordering::Relaxed);
    }

    pub fn record_written(&self, bytes: usize) {
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_tune(&self, freq_hz: u32) {
        self.tunes_applied.fetch_add(1, Ordering::Relaxed);
        self.commanded_freq.store(freq_hz, Ordering::Relaxed);
    }

    pub fn record_tune_failure(&self) {
        self.tune_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_pass_complete(&self) {
        self.pass_complete.store(true, Ordering::Relaxed);
    }

    pub fn get_samples(&self) -> u64 {
        self.samples_captured.load(Ordering::Relaxed)
    }

    pub fn get_bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    pub fn get_tunes_applied(&self) -> u64 {
        self.tunes_applied.load(Ordering::Relaxed)
    }

    pub fn get_tune_failures(&self) -> u64 {
        self.tune_failures.load(Ordering::Relaxed)
    }

    /// Last frequency sent to the device, 0 if none yet
    pub fn get_commanded_freq(&self) -> u32 {
        self.commanded_freq.load(Ordering::Relaxed)
    }

    pub fn is_pass_complete(&self) -> bool {
        self.pass_complete.load(Ordering::Relaxed)
    }
}

/// Point-in-time view used for one status line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub elapsed: Duration,
    pub samples: u64,
    pub expected_samples: u64,
    pub bytes_written: u64,
    pub queue_depth: usize,
    pub overflows: u64,
    pub commanded_freq: u32,
}

impl ProgressSnapshot {
    /// Human-readable progress line
    pub fn status_line(&self) -> String {
        let secs = self.elapsed.as_secs();
        let mb_written = self.bytes_written as f64 / 1e6;
        let rate = mb_written / self.elapsed.as_secs_f64().max(1.0);
        let percent = if self.expected_samples > 0 {
            self.samples as f64 / self.expected_samples as f64 * 100.0
        } else {
            0.0
        };

        let mut line = format!(
            "[{}s] {:.1}M samples ({:.0}%), {:.1} MB written ({:.1} MB/s), Queue: {}, Overflows: {}",
            secs,
            self.samples as f64 / 1e6,
            percent,
            mb_written,
            rate,
            self.queue_depth,
            self.overflows
        );
        if self.commanded_freq > 0 {
            line.push_str(&format!(
                ", Freq: {:.6} MHz",
                self.commanded_freq as f64 / 1e6
            ));
        }
        line
    }
}

/// Emits a status line once per interval while the session runs.
pub struct ProgressMonitor {
    interval: Duration,
    poll: Duration,
    expected_samples: u64,
}

impl ProgressMonitor {
    pub fn new(interval: Duration, sample_rate: u32, capture_duration: Duration) -> Self {
        Self {
            interval,
            poll: interval.min(Duration::from_millis(100)),
            expected_samples: (sample_rate as f64 * capture_duration.as_secs_f64()) as u64,
        }
    }

    pub fn snapshot(
        &self,
        start: Instant,
        stats: &CaptureStats,
        queue: &SampleQueue,
    ) -> ProgressSnapshot {
        ProgressSnapshot {
            elapsed: start.elapsed(),
            samples: stats.get_samples(),
            expected_samples: self.expected_samples,
            bytes_written: stats.get_bytes_written(),
            queue_depth: queue.depth(),
            overflows: queue.overflows(),
            commanded_freq: stats.get_commanded_freq(),
        }
    }

    /// Run until `running` goes false. Read-only on all shared state.
    pub fn run(
        &self,
        running: &AtomicBool,
        start: Instant,
        stats: &CaptureStats,
        queue: &SampleQueue,
    ) {
        let ticker = tick(self.poll);
        let mut last_report = Instant::now();
        let mut reported_overflows = 0u64;

        while running.load(Ordering::Acquire) {
            let _ = ticker.recv();
            if last_report.elapsed() < self.interval {
                continue;
            }
            last_report = Instant::now();

            let snapshot = self.snapshot(start, stats, queue);
            info!("{}", snapshot.status_line());

            if snapshot.overflows > reported_overflows {
                warn!(
                    "Queue above watermark ({} chunks): {} new overflow(s), writer is falling behind",
                    queue.watermark(),
                    snapshot.overflows - reported_overflows
                );
                reported_overflows = snapshot.overflows;
            }
        }
    }
}
