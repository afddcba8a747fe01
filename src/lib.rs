//! Doppler Capture - RTL-SDR I/Q recorder with Doppler-tracked retuning
//!
//! Streams raw cu8 samples from the device callback through a FIFO queue to
//! disk without loss, while a retune loop follows a precomputed Doppler
//! profile for the duration of a satellite pass.

pub mod config;
pub mod device;
pub mod doppler;
pub mod error;
pub mod metadata;
pub mod monitor;
pub mod queue;
pub mod session;
pub mod tracking;
pub mod writer;

pub use config::{Backend, Config};
pub use device::{DeviceHandle, DeviceSettings, Driver, Gain, SampleStream, Tuner};
pub use doppler::{DopplerProfile, ProfileError};
pub use error::{CaptureError, Result};
pub use metadata::CaptureMetadata;
pub use monitor::{CaptureStats, ProgressMonitor};
pub use queue::{SampleChunk, SampleQueue};
pub use session::{CaptureSession, CaptureSummary, StopHandle};
pub use tracking::{RetuneConfig, RetuneLoop, RetunePhase, RetuneState};
pub use writer::Writer;
