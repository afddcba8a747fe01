//! Configuration loaded from environment variables

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use tracing::warn;

use crate::device::{DeviceSettings, Gain};
use crate::error::{CaptureError, Result};
use crate::metadata::sidecar_path;
use crate::queue::DEFAULT_WATERMARK;
use crate::tracking::{RetuneConfig, DEFAULT_EPSILON_HZ, DEFAULT_INTERVAL};

pub const DEFAULT_FREQ: u32 = 137_100_000; // NOAA-19 APT
pub const DEFAULT_SAMPLE_RATE: u32 = 2_400_000;
pub const DEFAULT_GAIN_DB: f32 = 40.0;
pub const DEFAULT_DURATION_SECS: u64 = 900;
pub const DEFAULT_NUM_BUFFERS: u32 = 16;
pub const DEFAULT_BUFFER_LEN: u32 = 16 * 16384; // 256 KiB per driver buffer

/// Which device implementation to open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    RtlSdr,
    Simulated,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rtlsdr" | "rtl-sdr" | "rtl_sdr" => Ok(Backend::RtlSdr),
            "sim" | "simulated" => Ok(Backend::Simulated),
            other => Err(format!("unknown SDR backend '{}'", other)),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Raw cu8 output file
    pub output_path: PathBuf,

    /// Nominal center frequency in Hz. `None` means "take it from the
    /// Doppler profile", falling back to `DEFAULT_FREQ`.
    pub center_freq: Option<u32>,

    pub sample_rate: u32,

    pub gain: Gain,

    /// Capture stops after this long, independent of the pass length
    pub duration: Duration,

    pub device_index: u32,

    pub backend: Backend,

    /// Doppler profile; capture-only when absent
    pub doppler_profile: Option<PathBuf>,

    pub retune_interval: Duration,

    pub retune_epsilon_hz: f64,

    pub retune_dry_run: bool,

    /// Soft queue depth threshold in chunks
    pub queue_watermark: usize,

    pub progress_interval: Duration,

    /// Driver async buffer count and size in bytes
    pub num_buffers: u32,
    pub buffer_len: u32,

    /// Write `<output>.json` next to the capture
    pub write_metadata: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_path: default_output_path(),
            center_freq: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            gain: Gain::Manual(DEFAULT_GAIN_DB),
            duration: Duration::from_secs(DEFAULT_DURATION_SECS),
            device_index: 0,
            backend: Backend::RtlSdr,
            doppler_profile: None,
            retune_interval: DEFAULT_INTERVAL,
            retune_epsilon_hz: DEFAULT_EPSILON_HZ,
            retune_dry_run: false,
            queue_watermark: DEFAULT_WATERMARK,
            progress_interval: Duration::from_secs(1),
            num_buffers: DEFAULT_NUM_BUFFERS,
            buffer_len: DEFAULT_BUFFER_LEN,
            write_metadata: true,
        }
    }
}

fn default_output_path() -> PathBuf {
    PathBuf::from(format!("capture-{}.bin", Utc::now().format("%Y%m%d_%H%M%S")))
}

/// Parse `key`, keeping `default` (with a warning) when the value is bad.
fn parse_var<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                warn!("Ignoring invalid {}={:?}, using default", key, raw);
                default
            }
        },
    }
}

fn seconds(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

fn parse_gain(raw: &str) -> Option<Gain> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("auto") {
        return Some(Gain::Auto);
    }
    raw.parse::<f32>().ok().map(Gain::Manual)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let gain = match lookup("DEVICE_GAIN") {
            None => defaults.gain,
            Some(raw) => parse_gain(&raw).unwrap_or_else(|| {
                warn!("Ignoring invalid DEVICE_GAIN={:?}, using default", raw);
                defaults.gain
            }),
        };

        let flag = |key: &str, default: bool| match lookup(key) {
            None => default,
            Some(raw) => parse_bool(&raw).unwrap_or_else(|| {
                warn!("Ignoring invalid {}={:?}, using default", key, raw);
                default
            }),
        };

        Self {
            output_path: lookup("OUTPUT_PATH")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.output_path),

            center_freq: lookup("CENTER_FREQ_HZ").and_then(|raw| match raw.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!("Ignoring invalid CENTER_FREQ_HZ={:?}", raw);
                    None
                }
            }),

            sample_rate: parse_var(&lookup, "SAMPLE_RATE", defaults.sample_rate),

            gain,

            duration: seconds(parse_var(
                &lookup,
                "CAPTURE_DURATION_SECS",
                defaults.duration.as_secs_f64(),
            ))
            .unwrap_or_else(|| {
                warn!("CAPTURE_DURATION_SECS out of range, using default");
                defaults.duration
            }),

            device_index: parse_var(&lookup, "DEVICE_INDEX", defaults.device_index),

            backend: parse_var(&lookup, "SDR_BACKEND", defaults.backend),

            doppler_profile: lookup("DOPPLER_PROFILE")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),

            retune_interval: Duration::from_millis(parse_var(
                &lookup,
                "RETUNE_INTERVAL_MS",
                defaults.retune_interval.as_millis() as u64,
            )),

            retune_epsilon_hz: parse_var(&lookup, "RETUNE_EPSILON_HZ", defaults.retune_epsilon_hz),

            retune_dry_run: flag("RETUNE_DRY_RUN", defaults.retune_dry_run),

            queue_watermark: parse_var(&lookup, "QUEUE_WATERMARK", defaults.queue_watermark),

            progress_interval: Duration::from_millis(parse_var(
                &lookup,
                "PROGRESS_INTERVAL_MS",
                defaults.progress_interval.as_millis() as u64,
            )),

            num_buffers: parse_var(&lookup, "ASYNC_BUF_NUM", defaults.num_buffers),

            buffer_len: parse_var(&lookup, "ASYNC_BUF_LEN", defaults.buffer_len),

            write_metadata: flag("WRITE_METADATA", defaults.write_metadata),
        }
    }

    /// Center frequency to capture at, given an optional profile nominal.
    pub fn resolve_center_freq(&self, profile_center_hz: Option<f64>) -> u32 {
        match (self.center_freq, profile_center_hz) {
            (Some(hz), _) => hz,
            (None, Some(hz)) if hz.is_finite() && hz > 0.0 => hz.round() as u32,
            _ => DEFAULT_FREQ,
        }
    }

    /// Reject settings no session could run with.
    pub fn validate(&self) -> Result<()> {
        if self.center_freq == Some(0) {
            return Err(CaptureError::invalid_config("center frequency must be non-zero"));
        }
        if self.sample_rate == 0 {
            return Err(CaptureError::invalid_config("sample rate must be non-zero"));
        }
        if let Gain::Manual(db) = self.gain {
            if !db.is_finite() {
                return Err(CaptureError::invalid_config("gain must be finite"));
            }
        }
        if self.duration.is_zero() {
            return Err(CaptureError::invalid_config("capture duration must be non-zero"));
        }
        if self.retune_interval.is_zero() {
            return Err(CaptureError::invalid_config("retune interval must be non-zero"));
        }
        if !self.retune_epsilon_hz.is_finite() || self.retune_epsilon_hz < 0.0 {
            return Err(CaptureError::invalid_config(
                "retune epsilon must be a non-negative number of Hz",
            ));
        }
        if self.progress_interval.is_zero() {
            return Err(CaptureError::invalid_config("progress interval must be non-zero"));
        }
        if self.queue_watermark == 0 {
            return Err(CaptureError::invalid_config("queue watermark must be non-zero"));
        }
        if self.num_buffers == 0 {
            return Err(CaptureError::invalid_config("async buffer count must be non-zero"));
        }
        if self.buffer_len == 0 || self.buffer_len % 2 != 0 {
            return Err(CaptureError::invalid_config(
                "async buffer length must be a non-zero even number of bytes",
            ));
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(CaptureError::invalid_config("output path must not be empty"));
        }
        Ok(())
    }

    pub fn device_settings(&self, center_freq: u32) -> DeviceSettings {
        DeviceSettings {
            center_freq,
            sample_rate: self.sample_rate,
            gain: self.gain,
        }
    }

    pub fn retune_config(&self, center_freq: u32) -> RetuneConfig {
        RetuneConfig {
            center_freq,
            epsilon_hz: self.retune_epsilon_hz,
            interval: self.retune_interval,
            dry_run: self.retune_dry_run,
        }
    }

    /// Sidecar metadata path: `<output>.json`
    pub fn metadata_path(&self) -> PathBuf {
        sidecar_path(&self.output_path)
    }
}
