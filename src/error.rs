//! Error taxonomy for the capture pipeline

use std::path::PathBuf;

use thiserror::Error;

use crate::doppler::ProfileError;

/// All errors produced while configuring or running a capture session.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// No device found, open failed, or initial configuration was rejected.
    #[error("device error: {0}")]
    Device(String),

    #[error("doppler profile error: {0}")]
    Profile(#[from] ProfileError),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A single retune command was rejected. Never fatal.
    #[error("tune to {freq_hz} Hz rejected by device")]
    Tune { freq_hz: u32 },

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{name} thread panicked")]
    ThreadPanic { name: &'static str },
}

impl CaptureError {
    pub fn device<S: Into<String>>(msg: S) -> Self {
        CaptureError::Device(msg.into())
    }

    pub fn io<P: Into<PathBuf>>(path: P, source: std::io::Error) -> Self {
        CaptureError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        CaptureError::InvalidConfig(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, CaptureError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn test_device_error_display() {
        let err = CaptureError::device("no RTL-SDR devices found");
        assert_eq!(err.to_string(), "device error: no RTL-SDR devices found");
    }

    #[test]
    fn test_io_error_keeps_path_and_source() {
        let err = CaptureError::io(
            "/nonexistent/capture.bin",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert!(err.to_string().contains("/nonexistent/capture.bin"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_profile_error_conversion() {
        let err: CaptureError = ProfileError::Empty.into();
        assert!(matches!(err, CaptureError::Profile(ProfileError::Empty)));
    }
}
