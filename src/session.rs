//! Capture session lifecycle
//!
//! `CaptureSession::run` validates the configuration and opens the device
//! before any thread exists, then runs the pipeline:
//!
//! ```text
//!   driver callback (this thread) -> SampleQueue -> writer thread -> file
//!                     monitor thread   reads counters, logs status
//!                     watchdog thread  duration timer, cancels the stream
//!                     retune thread    DopplerProfile -> tuner (optional)
//! ```
//!
//! The running flag is the only stop signal. Every thread observes it within
//! one polling interval; the writer keeps draining until the driver callback
//! has returned for good and the queue is empty. A stop request is latched,
//! so one issued while the device is still being opened is not lost.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ScopedJoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::tick;
use tracing::{error, info};

use crate::config::Config;
use crate::device::{DeviceHandle, Driver};
use crate::doppler::DopplerProfile;
use crate::error::{CaptureError, Result};
use crate::monitor::{CaptureStats, ProgressMonitor};
use crate::queue::{SampleChunk, SampleQueue};
use crate::tracking::{target_frequency, RetuneLoop};
use crate::writer::Writer;

/// How often the watchdog checks the clock and the running flag
const WATCHDOG_POLL: Duration = Duration::from_millis(50);

/// Stops a session from any thread, before or during `run`.
#[derive(Debug, Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        // latch first: `run` re-checks it after raising the running flag
        self.stop_requested.store(true, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Totals reported once the session has fully unwound.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSummary {
    pub output_path: PathBuf,
    pub device_index: u32,
    pub device_name: String,
    /// Center frequency the device reported after configuration
    pub center_freq: u32,
    pub sample_rate: u32,
    pub gain_tenths: i32,
    pub samples: u64,
    pub bytes_written: u64,
    pub overflows: u64,
    pub tunes_applied: u64,
    pub tune_failures: u64,
    pub pass_complete: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub elapsed: Duration,
}

pub struct CaptureSession {
    config: Config,
    running: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
}

impl CaptureSession {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            stop_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            running: self.running.clone(),
            stop_requested: self.stop_requested.clone(),
        }
    }

    pub fn stop(&self) {
        self.stop_handle().stop();
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one capture to completion. Tracks Doppler when `profile` is given.
    pub fn run(
        &self,
        driver: &dyn Driver,
        profile: Option<Arc<DopplerProfile>>,
    ) -> Result<CaptureSummary> {
        let config = &self.config;
        config.validate()?;

        let mut device = DeviceHandle::open(driver, config.device_index)?;

        let center_freq =
            config.resolve_center_freq(profile.as_ref().map(|p| p.center_freq_hz()));
        let initial_freq = match &profile {
            Some(p) => target_frequency(center_freq, p.interpolate(0.0)),
            None => center_freq,
        };

        info!(
            "Requested: {:.6} MHz, {:.3} MS/s, gain {}",
            initial_freq as f64 / 1e6,
            config.sample_rate as f64 / 1e6,
            config.gain
        );
        device.configure(&config.device_settings(initial_freq))?;

        let (applied_freq, applied_rate, applied_gain) = device.applied();
        info!(
            "Applied: {:.6} MHz, {:.3} MS/s, gain {:.1} dB",
            applied_freq as f64 / 1e6,
            applied_rate as f64 / 1e6,
            applied_gain as f64 / 10.0
        );

        let queue = SampleQueue::new(config.queue_watermark);
        let stats = CaptureStats::new();
        let tuner = device.tuner();
        let progress =
            ProgressMonitor::new(config.progress_interval, config.sample_rate, config.duration);
        let retune = profile
            .as_ref()
            .map(|p| RetuneLoop::new(p.clone(), config.retune_config(center_freq)));

        let running: &AtomicBool = &self.running;
        running.store(true, Ordering::SeqCst);
        if self.stop_requested() {
            running.store(false, Ordering::SeqCst);
            info!("Stop requested before streaming started");
        }
        // cleared only once the driver callback can no longer push
        let producing = AtomicBool::new(true);
        let started_at = Utc::now();
        let start = Instant::now();

        info!(
            "Capturing for {}s to {}",
            config.duration.as_secs_f64(),
            config.output_path.display()
        );

        let result = thread::scope(|s| -> Result<()> {
            let spawn_failed = |name: &'static str, source: io::Error| {
                running.store(false, Ordering::Release);
                producing.store(false, Ordering::Release);
                CaptureError::Spawn { name, source }
            };

            let writer = thread::Builder::new()
                .name("writer".into())
                .spawn_scoped(s, || {
                    Writer::new(&queue, &stats, running, &producing)
                        .run_to_file(&config.output_path)
                })
                .map_err(|e| spawn_failed("writer", e))?;

            let monitor = thread::Builder::new()
                .name("monitor".into())
                .spawn_scoped(s, || progress.run(running, start, &stats, &queue))
                .map_err(|e| spawn_failed("monitor", e))?;

            let watchdog = thread::Builder::new()
                .name("watchdog".into())
                .spawn_scoped(s, || {
                    let ticker = tick(WATCHDOG_POLL);
                    while running.load(Ordering::Acquire) {
                        if start.elapsed() >= config.duration {
                            info!("Capture duration reached, stopping");
                            running.store(false, Ordering::Release);
                            break;
                        }
                        let _ = ticker.recv();
                    }
                    tuner.lock().cancel_stream();
                })
                .map_err(|e| spawn_failed("watchdog", e))?;

            let retune = match retune {
                Some(retune) => {
                    let tuner = tuner.clone();
                    let stats = &stats;
                    let handle = thread::Builder::new()
                        .name("retune".into())
                        .spawn_scoped(s, move || retune.run(tuner, running, start, stats))
                        .map_err(|e| spawn_failed("retune", e))?;
                    Some(handle)
                }
                None => None,
            };

            let mut cancel_requested = false;
            let streamed = device.stream_mut().read_async(
                config.num_buffers,
                config.buffer_len,
                &mut |buf| {
                    if !running.load(Ordering::Acquire) {
                        if !cancel_requested {
                            tuner.lock().cancel_stream();
                            cancel_requested = true;
                        }
                        return;
                    }
                    queue.push(SampleChunk::from_slice(buf));
                    stats.record_chunk(buf.len());
                },
            );
            running.store(false, Ordering::Release);
            producing.store(false, Ordering::Release);
            if let Err(e) = &streamed {
                error!("Sample stream ended with error: {}", e);
            }

            let written = join("writer", writer);
            join("monitor", monitor)?;
            join("watchdog", watchdog)?;
            if let Some(handle) = retune {
                join("retune", handle)?;
            }

            // A sink failure is what stopped the stream, so report it first.
            written??;
            streamed
        });

        let ended_at = Utc::now();
        let elapsed = start.elapsed();
        result?;

        let summary = CaptureSummary {
            output_path: config.output_path.clone(),
            device_index: device.index(),
            device_name: device.name().to_string(),
            center_freq: applied_freq,
            sample_rate: applied_rate,
            gain_tenths: applied_gain,
            samples: stats.get_samples(),
            bytes_written: stats.get_bytes_written(),
            overflows: queue.overflows(),
            tunes_applied: stats.get_tunes_applied(),
            tune_failures: stats.get_tune_failures(),
            pass_complete: stats.is_pass_complete(),
            started_at,
            ended_at,
            elapsed,
        };

        info!(
            "Capture finished: {} samples, {:.1} MB in {:.1}s, {} overflow(s)",
            summary.samples,
            summary.bytes_written as f64 / 1e6,
            summary.elapsed.as_secs_f64(),
            summary.overflows
        );

        Ok(summary)
    }
}

fn join<T>(name: &'static str, handle: ScopedJoinHandle<'_, T>) -> Result<T> {
    handle.join().map_err(|_| CaptureError::ThreadPanic { name })
}
