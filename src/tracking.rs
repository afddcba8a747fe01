//! Doppler retune loop
//!
//! Polls the profile at the session's elapsed time and retunes the device to
//! `center + offset` whenever the offset has moved more than `epsilon_hz`
//! from the last applied value. A rejected tune leaves the state untouched,
//! so the next tick retries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::tick;
use tracing::{debug, info, warn};

use crate::device::SharedTuner;
use crate::doppler::DopplerProfile;
use crate::error::Result;
use crate::monitor::CaptureStats;

pub const DEFAULT_EPSILON_HZ: f64 = 10.0;
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq)]
pub struct RetuneConfig {
    /// Nominal frequency the profile offsets apply to
    pub center_freq: u32,
    pub epsilon_hz: f64,
    pub interval: Duration,
    /// Track and log without commanding the device
    pub dry_run: bool,
}

/// Last tune actually applied. `None` until the first one succeeds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RetuneState {
    pub last_applied_offset_hz: Option<f64>,
    pub last_applied_frequency: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetunePhase {
    Idle,
    Tracking,
    Complete,
}

/// What one poll did
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    Tuned { freq_hz: u32, offset_hz: f64 },
    Held,
    Failed { freq_hz: u32 },
    Complete,
}

/// Commanded frequency for an offset, rounded to the nearest Hz.
pub fn target_frequency(center_freq: u32, offset_hz: f64) -> u32 {
    (center_freq as f64 + offset_hz)
        .round()
        .clamp(0.0, u32::MAX as f64) as u32
}

pub struct RetuneLoop {
    profile: Arc<DopplerProfile>,
    config: RetuneConfig,
    state: RetuneState,
    phase: RetunePhase,
}

impl RetuneLoop {
    pub fn new(profile: Arc<DopplerProfile>, config: RetuneConfig) -> Self {
        Self {
            profile,
            config,
            state: RetuneState::default(),
            phase: RetunePhase::Idle,
        }
    }

    /// Idle -> Tracking, once the session clock has started.
    pub fn start(&mut self) {
        if self.phase == RetunePhase::Idle {
            self.phase = RetunePhase::Tracking;
        }
    }

    pub fn phase(&self) -> RetunePhase {
        self.phase
    }

    pub fn state(&self) -> RetuneState {
        self.state
    }

    /// One tracking step at `elapsed` seconds into the pass.
    pub fn poll<F>(&mut self, elapsed: f64, tune: &mut F, stats: &CaptureStats) -> TickOutcome
    where
        F: FnMut(u32) -> Result<()>,
    {
        match self.phase {
            RetunePhase::Idle => return TickOutcome::Held,
            RetunePhase::Complete => return TickOutcome::Complete,
            RetunePhase::Tracking => {}
        }

        if elapsed > self.profile.duration() {
            self.phase = RetunePhase::Complete;
            stats.mark_pass_complete();
            return TickOutcome::Complete;
        }

        let offset = self.profile.interpolate(elapsed);
        let needs_tune = match self.state.last_applied_offset_hz {
            None => true,
            Some(last) => (offset - last).abs() > self.config.epsilon_hz,
        };
        if !needs_tune {
            return TickOutcome::Held;
        }

        let freq = target_frequency(self.config.center_freq, offset);
        if !self.config.dry_run {
            if let Err(e) = tune(freq) {
                stats.record_tune_failure();
                warn!("[{:.1}s] Retune to {} Hz failed: {}", elapsed, freq, e);
                return TickOutcome::Failed { freq_hz: freq };
            }
        }

        self.state = RetuneState {
            last_applied_offset_hz: Some(offset),
            last_applied_frequency: Some(freq),
        };
        stats.record_tune(freq);
        debug!(
            "[{:.1}s] Doppler: {:7.1} Hz, Freq: {:.6} MHz{}",
            elapsed,
            offset,
            freq as f64 / 1e6,
            if self.config.dry_run { " (dry run)" } else { "" }
        );

        TickOutcome::Tuned {
            freq_hz: freq,
            offset_hz: offset,
        }
    }

    /// Track until the pass completes or `running` goes false.
    pub fn run(
        mut self,
        tuner: SharedTuner,
        running: &AtomicBool,
        start: Instant,
        stats: &CaptureStats,
    ) {
        self.start();
        info!(
            "Doppler tracking started: {} points over {:.0}s, epsilon {} Hz{}",
            self.profile.len(),
            self.profile.duration(),
            self.config.epsilon_hz,
            if self.config.dry_run { " [DRY RUN]" } else { "" }
        );

        let ticker = tick(self.config.interval);
        let mut tune = |hz: u32| tuner.lock().set_center_freq(hz);

        while running.load(Ordering::Acquire) {
            let elapsed = start.elapsed().as_secs_f64();
            if self.poll(elapsed, &mut tune, stats) == TickOutcome::Complete {
                info!(
                    "Pass complete after {:.1}s ({} retunes, {} failed)",
                    elapsed,
                    stats.get_tunes_applied(),
                    stats.get_tune_failures()
                );
                return;
            }
            let _ = ticker.recv();
        }

        info!("Doppler tracking stopped before pass end");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::sim::SimulatedDriver;
    use crate::device::DeviceHandle;
    use crate::error::CaptureError;
    use std::thread;

    fn retune_loop(times: Vec<f64>, offsets: Vec<f64>, epsilon_hz: f64) -> RetuneLoop {
        let profile = DopplerProfile::new(137_100_000.0, times, offsets).unwrap();
        let mut lp = RetuneLoop::new(
            Arc::new(profile),
            RetuneConfig {
                center_freq: 137_100_000,
                epsilon_hz,
                interval: Duration::from_millis(10),
                dry_run: false,
            },
        );
        lp.start();
        lp
    }

    #[test]
    fn test_first_poll_always_tunes() {
        let mut lp = retune_loop(vec![0.0, 100.0], vec![0.0, 0.0], 10.0);
        let stats = CaptureStats::new();
        let mut tuned = Vec::new();
        let mut tune = |hz: u32| -> Result<()> {
            tuned.push(hz);
            Ok(())
        };
        let outcome = lp.poll(0.0, &mut tune, &stats);
        assert_eq!(
            outcome,
            TickOutcome::Tuned {
                freq_hz: 137_100_000,
                offset_hz: 0.0
            }
        );
        assert_eq!(tuned, vec![137_100_000]);
    }

    #[test]
    fn test_hysteresis_gating() {
        // 0.5 Hz/s drift
        let mut lp = retune_loop(vec![0.0, 100.0], vec![0.0, 50.0], 10.0);
        let stats = CaptureStats::new();
        let mut tuned = Vec::new();
        let mut tune = |hz: u32| -> Result<()> {
            tuned.push(hz);
            Ok(())
        };

        assert!(matches!(lp.poll(0.0, &mut tune, &stats), TickOutcome::Tuned { .. }));
        for t in [1.0, 5.0, 10.0, 19.0, 20.0] {
            assert_eq!(lp.poll(t, &mut tune, &stats), TickOutcome::Held);
        }
        // 10.5 Hz from the last applied offset
        assert!(matches!(lp.poll(21.0, &mut tune, &stats), TickOutcome::Tuned { .. }));
        assert_eq!(lp.poll(22.0, &mut tune, &stats), TickOutcome::Held);

        assert_eq!(tuned, vec![137_100_000, 137_100_011]);
        assert_eq!(lp.state().last_applied_offset_hz, Some(10.5));
        assert_eq!(stats.get_tunes_applied(), 2);
    }

    #[test]
    fn test_negative_drift_also_retunes() {
        let mut lp = retune_loop(vec![0.0, 10.0], vec![0.0, -100.0], 10.0);
        let stats = CaptureStats::new();
        let mut tune = |_: u32| -> Result<()> { Ok(()) };
        lp.poll(0.0, &mut tune, &stats);
        assert_eq!(
            lp.poll(1.5, &mut tune, &stats),
            TickOutcome::Tuned {
                freq_hz: 137_099_985,
                offset_hz: -15.0
            }
        );
    }

    #[test]
    fn test_failed_tune_retries_next_tick() {
        let mut lp = retune_loop(vec![0.0, 100.0], vec![500.0, 500.0], 10.0);
        let stats = CaptureStats::new();
        let mut attempts = 0;
        let mut tune = |hz: u32| -> Result<()> {
            attempts += 1;
            if attempts == 1 {
                Err(CaptureError::Tune { freq_hz: hz })
            } else {
                Ok(())
            }
        };

        assert_eq!(
            lp.poll(0.0, &mut tune, &stats),
            TickOutcome::Failed {
                freq_hz: 137_100_500
            }
        );
        assert_eq!(lp.state(), RetuneState::default());
        assert!(matches!(lp.poll(0.1, &mut tune, &stats), TickOutcome::Tuned { .. }));
        assert_eq!(stats.get_tune_failures(), 1);
        assert_eq!(stats.get_tunes_applied(), 1);
    }

    #[test]
    fn test_completes_after_profile_end() {
        let mut lp = retune_loop(vec![0.0, 10.0], vec![0.0, 0.0], 10.0);
        let stats = CaptureStats::new();
        let mut calls = 0;
        let mut tune = |_: u32| -> Result<()> {
            calls += 1;
            Ok(())
        };

        lp.poll(10.0, &mut tune, &stats);
        assert_eq!(lp.poll(10.01, &mut tune, &stats), TickOutcome::Complete);
        assert_eq!(lp.phase(), RetunePhase::Complete);
        assert_eq!(lp.poll(5.0, &mut tune, &stats), TickOutcome::Complete);
        assert_eq!(calls, 1);
        assert!(stats.is_pass_complete());
    }

    #[test]
    fn test_idle_until_started() {
        let profile = DopplerProfile::new(0.0, vec![0.0], vec![0.0]).unwrap();
        let mut lp = RetuneLoop::new(
            Arc::new(profile),
            RetuneConfig {
                center_freq: 1,
                epsilon_hz: DEFAULT_EPSILON_HZ,
                interval: DEFAULT_INTERVAL,
                dry_run: false,
            },
        );
        let stats = CaptureStats::new();
        assert_eq!(lp.phase(), RetunePhase::Idle);
        assert_eq!(lp.poll(0.0, &mut |_| Ok(()), &stats), TickOutcome::Held);
        lp.start();
        assert_eq!(lp.phase(), RetunePhase::Tracking);
    }

    #[test]
    fn test_dry_run_never_calls_device() {
        let profile = DopplerProfile::new(0.0, vec![0.0, 10.0], vec![0.0, 1000.0]).unwrap();
        let mut lp = RetuneLoop::new(
            Arc::new(profile),
            RetuneConfig {
                center_freq: 100_000_000,
                epsilon_hz: 10.0,
                interval: DEFAULT_INTERVAL,
                dry_run: true,
            },
        );
        lp.start();
        let stats = CaptureStats::new();
        let mut tune = |_: u32| -> Result<()> { panic!("dry run must not tune") };
        assert!(matches!(lp.poll(0.0, &mut tune, &stats), TickOutcome::Tuned { .. }));
        assert!(matches!(lp.poll(5.0, &mut tune, &stats), TickOutcome::Tuned { .. }));
        assert_eq!(lp.state().last_applied_frequency, Some(100_000_500));
    }

    #[test]
    fn test_target_frequency_rounds_and_clamps() {
        assert_eq!(target_frequency(137_100_000, 2.6), 137_100_003);
        assert_eq!(target_frequency(137_100_000, -2.4), 137_099_998);
        assert_eq!(target_frequency(10, -100.0), 0);
    }

    #[test]
    fn test_run_retunes_device_until_pass_ends() {
        let driver = SimulatedDriver::new();
        let device = DeviceHandle::open(&driver, 0).unwrap();
        let profile = DopplerProfile::new(0.0, vec![0.0, 0.3], vec![0.0, 300.0]).unwrap();
        let lp = RetuneLoop::new(
            Arc::new(profile),
            RetuneConfig {
                center_freq: 137_000_000,
                epsilon_hz: 10.0,
                interval: Duration::from_millis(20),
                dry_run: false,
            },
        );
        let running = AtomicBool::new(true);
        let stats = CaptureStats::new();
        let tuner = device.tuner();

        thread::scope(|s| {
            s.spawn(|| lp.run(tuner, &running, Instant::now(), &stats));
        });

        let log = driver.state().unwrap().tune_log();
        assert!(log.len() >= 2, "expected several retunes, got {:?}", log);
        assert_eq!(log[0], 137_000_000);
        assert!(log.windows(2).all(|w| w[1] > w[0]));
        assert!(stats.is_pass_complete());
    }
}
