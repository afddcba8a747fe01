//! Doppler offset profile
//!
//! A precomputed time series of (elapsed seconds, offset Hz) samples covering
//! one satellite pass. Produced by the pass predictor as a JSON document and
//! loaded once before capture starts; immutable afterwards.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Profile load errors
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("cannot read profile: {0}")]
    Read(#[from] std::io::Error),

    #[error("malformed profile document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("profile has no samples")]
    Empty,

    #[error("mismatched profile lengths: {times} times vs {offsets} offsets")]
    LengthMismatch { times: usize, offsets: usize },

    #[error("profile times decrease at sample {index}")]
    Unordered { index: usize },

    #[error("profile sample {index} is not finite")]
    NonFinite { index: usize },
}

/// On-disk layout written by the pass predictor. Extra keys (elevations,
/// azimuths, ranges, ...) are ignored.
#[derive(Debug, Deserialize)]
struct ProfileDocument {
    center_freq_hz: f64,
    #[serde(default)]
    time_step_sec: Option<f64>,
    #[serde(default)]
    satellite: Option<String>,
    #[serde(default)]
    aos_utc: Option<String>,
    #[serde(default)]
    los_utc: Option<String>,
    times_sec: Vec<f64>,
    doppler_hz: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DopplerProfile {
    center_freq_hz: f64,
    time_step_sec: Option<f64>,
    satellite: Option<String>,
    aos_utc: Option<String>,
    los_utc: Option<String>,
    times_sec: Vec<f64>,
    offsets_hz: Vec<f64>,
}

impl DopplerProfile {
    /// Build a profile from raw sequences.
    pub fn new(
        center_freq_hz: f64,
        times_sec: Vec<f64>,
        offsets_hz: Vec<f64>,
    ) -> Result<Self, ProfileError> {
        if times_sec.is_empty() || offsets_hz.is_empty() {
            return Err(ProfileError::Empty);
        }
        if times_sec.len() != offsets_hz.len() {
            return Err(ProfileError::LengthMismatch {
                times: times_sec.len(),
                offsets: offsets_hz.len(),
            });
        }
        for (i, (t, f)) in times_sec.iter().zip(&offsets_hz).enumerate() {
            if !t.is_finite() || !f.is_finite() {
                return Err(ProfileError::NonFinite { index: i });
            }
        }
        if let Some(i) = times_sec.windows(2).position(|w| w[1] < w[0]) {
            return Err(ProfileError::Unordered { index: i + 1 });
        }

        Ok(Self {
            center_freq_hz,
            time_step_sec: None,
            satellite: None,
            aos_utc: None,
            los_utc: None,
            times_sec,
            offsets_hz,
        })
    }

    /// Parse a profile from its JSON text.
    pub fn from_json(text: &str) -> Result<Self, ProfileError> {
        let doc: ProfileDocument = serde_json::from_str(text)?;
        let mut profile = Self::new(doc.center_freq_hz, doc.times_sec, doc.doppler_hz)?;
        profile.time_step_sec = doc.time_step_sec;
        profile.satellite = doc.satellite;
        profile.aos_utc = doc.aos_utc;
        profile.los_utc = doc.los_utc;
        Ok(profile)
    }

    /// Load a profile file. A missing file is a `ProfileError::Read`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ProfileError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Offset in Hz at `t` seconds after pass start.
    ///
    /// Clamps to the first/last sample outside the profile and linearly
    /// interpolates between the two bracketing samples inside it. A NaN `t`
    /// is treated as before the first sample.
    pub fn interpolate(&self, t: f64) -> f64 {
        let first = self.times_sec[0];
        let last = self.times_sec[self.times_sec.len() - 1];

        if t.is_nan() || t <= first {
            return self.offsets_hz[0];
        }
        if t >= last {
            return self.offsets_hz[self.offsets_hz.len() - 1];
        }

        // first index with time > t; 1 <= i < len, and times[i] > times[i - 1]
        let i = self.times_sec.partition_point(|&x| x <= t);
        let (t0, t1) = (self.times_sec[i - 1], self.times_sec[i]);
        let (f0, f1) = (self.offsets_hz[i - 1], self.offsets_hz[i]);

        let alpha = (t - t0) / (t1 - t0);
        f0 + alpha * (f1 - f0)
    }

    /// Time of the last sample, in seconds after pass start.
    pub fn duration(&self) -> f64 {
        self.times_sec[self.times_sec.len() - 1]
    }

    /// Nominal transmit frequency the offsets are relative to.
    pub fn center_freq_hz(&self) -> f64 {
        self.center_freq_hz
    }

    pub fn time_step_sec(&self) -> Option<f64> {
        self.time_step_sec
    }

    pub fn satellite(&self) -> Option<&str> {
        self.satellite.as_deref()
    }

    pub fn aos_utc(&self) -> Option<&str> {
        self.aos_utc.as_deref()
    }

    pub fn los_utc(&self) -> Option<&str> {
        self.los_utc.as_deref()
    }

    pub fn len(&self) -> usize {
        self.times_sec.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times_sec.is_empty()
    }

    /// (min, max) offset over the whole pass
    pub fn offset_range(&self) -> (f64, f64) {
        self.offsets_hz
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &f| {
                (lo.min(f), hi.max(f))
            })
    }
}
