//! Capture metadata sidecar
//!
//! The raw sink has no header, so demodulators need the sample rate and
//! center frequency from somewhere else. This writes them, with the session
//! totals, to `<output>.json`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::SecondsFormat;
use serde::Serialize;

use crate::error::{CaptureError, Result};
use crate::session::CaptureSummary;

pub const SAMPLE_FORMAT: &str = "cu8";

#[derive(Debug, Clone, Serialize)]
pub struct CaptureMetadata {
    pub format: &'static str,
    pub output_file: String,
    pub center_freq_hz: u32,
    pub sample_rate: u32,
    /// Applied tuner gain in dB
    pub gain_db: f64,
    pub device_index: u32,
    pub device_name: String,
    pub start_utc: String,
    pub end_utc: String,
    pub duration_sec: f64,
    pub samples: u64,
    pub bytes_written: u64,
    pub overflows: u64,
    pub tunes_applied: u64,
    pub tune_failures: u64,
    pub pass_complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doppler_profile: Option<String>,
}

impl CaptureMetadata {
    pub fn new(summary: &CaptureSummary, doppler_profile: Option<&Path>) -> Self {
        Self {
            format: SAMPLE_FORMAT,
            output_file: summary.output_path.display().to_string(),
            center_freq_hz: summary.center_freq,
            sample_rate: summary.sample_rate,
            gain_db: summary.gain_tenths as f64 / 10.0,
            device_index: summary.device_index,
            device_name: summary.device_name.clone(),
            start_utc: summary
                .started_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            end_utc: summary.ended_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            duration_sec: summary.elapsed.as_secs_f64(),
            samples: summary.samples,
            bytes_written: summary.bytes_written,
            overflows: summary.overflows,
            tunes_applied: summary.tunes_applied,
            tune_failures: summary.tune_failures,
            pass_complete: summary.pass_complete,
            doppler_profile: doppler_profile.map(|p| p.display().to_string()),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Write pretty JSON to `path`, replacing any existing file.
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut text = self.to_json().map_err(|e| CaptureError::io(path, e.into()))?;
        text.push('\n');
        fs::write(path, text).map_err(|e| CaptureError::io(path, e))
    }
}

/// `<output>.json` next to the capture file
pub fn sidecar_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".json");
    PathBuf::from(name)
}
