//! SDR device capability interface
//!
//! The hardware is split the way librtlsdr's async API splits it: a `Tuner`
//! half that changes settings and cancels streaming, and a `SampleStream`
//! half that blocks inside the driver's read loop and calls back per buffer.
//! The tuner is shared between the session (configuration, cancellation) and
//! the retune loop, so it lives behind one lock.

#[cfg(feature = "native-sdr")]
pub mod rtlsdr;
pub mod sim;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::error::{CaptureError, Result};

/// Tuner gain setting
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gain {
    Auto,
    /// Manual gain in dB
    Manual(f32),
}

impl Gain {
    /// Gain in tenths of a dB, the unit librtlsdr uses
    pub fn tenths(db: f32) -> i32 {
        (db * 10.0).round() as i32
    }
}

impl fmt::Display for Gain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gain::Auto => write!(f, "auto"),
            Gain::Manual(db) => write!(f, "{:.1} dB", db),
        }
    }
}

/// Settings half of an open device.
pub trait Tuner: Send {
    fn set_center_freq(&mut self, hz: u32) -> Result<()>;
    fn set_sample_rate(&mut self, hz: u32) -> Result<()>;
    fn set_gain(&mut self, gain: Gain) -> Result<()>;
    /// Discard samples buffered inside the driver before streaming starts.
    fn reset_buffer(&mut self) -> Result<()>;
    /// Ask a running `SampleStream::read_async` to return. Safe to call
    /// from inside the stream callback and more than once.
    fn cancel_stream(&mut self);

    fn center_freq(&self) -> u32;
    fn sample_rate(&self) -> u32;
    /// Applied tuner gain in tenths of a dB
    fn tuner_gain(&self) -> i32;
}

/// Streaming half of an open device.
pub trait SampleStream: Send {
    /// Block, invoking `on_chunk` for every buffer the driver delivers, until
    /// the paired tuner cancels the stream.
    fn read_async(
        &mut self,
        num_buffers: u32,
        buffer_len: u32,
        on_chunk: &mut dyn FnMut(&[u8]),
    ) -> Result<()>;
}

/// Device enumeration and opening.
pub trait Driver: Send + Sync {
    fn device_count(&self) -> u32;
    fn device_name(&self, index: u32) -> Option<String>;
    fn open(&self, index: u32) -> Result<(Box<dyn Tuner>, Box<dyn SampleStream>)>;
}

pub type SharedTuner = Arc<Mutex<Box<dyn Tuner>>>;

/// Requested device settings
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSettings {
    pub center_freq: u32,
    pub sample_rate: u32,
    pub gain: Gain,
}

/// An open, owned device.
pub struct DeviceHandle {
    index: u32,
    name: String,
    tuner: SharedTuner,
    stream: Box<dyn SampleStream>,
}

impl DeviceHandle {
    /// Enumerate devices and open `index`. Zero devices is a `DeviceError`.
    pub fn open(driver: &dyn Driver, index: u32) -> Result<Self> {
        let count = driver.device_count();
        if count == 0 {
            return Err(CaptureError::device("no SDR devices found"));
        }
        info!("Found {} device(s)", count);

        if index >= count {
            return Err(CaptureError::device(format!(
                "device index {} out of range ({} device(s) found)",
                index, count
            )));
        }

        let name = driver
            .device_name(index)
            .unwrap_or_else(|| format!("device {}", index));
        info!("Using device {}: {}", index, name);

        let (tuner, stream) = driver.open(index)?;

        Ok(Self {
            index,
            name,
            tuner: Arc::new(Mutex::new(tuner)),
            stream,
        })
    }

    /// Apply frequency, sample rate and gain, then reset driver buffering.
    pub fn configure(&mut self, settings: &DeviceSettings) -> Result<()> {
        let mut tuner = self.tuner.lock();
        tuner.set_sample_rate(settings.sample_rate)?;
        tuner.set_center_freq(settings.center_freq)?;
        tuner.set_gain(settings.gain)?;
        tuner.reset_buffer()?;
        Ok(())
    }

    /// Settings the device reports after configuration
    pub fn applied(&self) -> (u32, u32, i32) {
        let tuner = self.tuner.lock();
        (tuner.center_freq(), tuner.sample_rate(), tuner.tuner_gain())
    }

    pub fn tuner(&self) -> SharedTuner {
        self.tuner.clone()
    }

    pub fn stream_mut(&mut self) -> &mut dyn SampleStream {
        self.stream.as_mut()
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
