//! Doppler Capture - satellite pass recorder
//!
//! Records raw I/Q from an RTL-SDR for a fixed duration, optionally retuning
//! along a Doppler profile, and writes a JSON sidecar describing the capture.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use doppler_capture::config::{Backend, Config};
use doppler_capture::device::sim::SimulatedDriver;
use doppler_capture::device::Driver;
use doppler_capture::doppler::DopplerProfile;
use doppler_capture::error::CaptureError;
use doppler_capture::metadata::CaptureMetadata;
use doppler_capture::session::{CaptureSession, CaptureSummary};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("===========================================");
    info!("   Doppler Capture - RTL-SDR I/Q recorder");
    info!("   with Doppler-tracked retuning");
    info!("===========================================");

    let config = Config::from_env();

    // A bad profile is fatal before the device is touched
    let profile = match &config.doppler_profile {
        Some(path) => {
            let profile = DopplerProfile::load(path)
                .with_context(|| format!("failed to load Doppler profile {}", path.display()))?;
            log_profile(&profile);
            Some(Arc::new(profile))
        }
        None => {
            info!("No Doppler profile set, capture only");
            None
        }
    };

    let center_freq = config.resolve_center_freq(profile.as_ref().map(|p| p.center_freq_hz()));
    info!("Configuration:");
    info!("  Output: {}", config.output_path.display());
    info!("  Backend: {:?}", config.backend);
    info!("  Device index: {}", config.device_index);
    info!("  Center frequency: {:.6} MHz", center_freq as f64 / 1e6);
    info!("  Sample rate: {} Hz", config.sample_rate);
    info!("  Gain: {}", config.gain);
    info!("  Duration: {}s", config.duration.as_secs_f64());
    if profile.is_some() {
        info!(
            "  Retune: every {}ms, epsilon {} Hz{}",
            config.retune_interval.as_millis(),
            config.retune_epsilon_hz,
            if config.retune_dry_run { " [DRY RUN]" } else { "" }
        );
    }

    let driver = select_driver(config.backend)?;
    let session = Arc::new(CaptureSession::new(config));
    let stop = session.stop_handle();

    info!("===========================================");
    info!("  Starting capture...");
    info!("  Press Ctrl+C to stop.");
    info!("===========================================");

    // The driver's streaming call blocks, so the session runs off the runtime
    let mut capture = {
        let session = session.clone();
        tokio::task::spawn_blocking(move || session.run(driver.as_ref(), profile))
    };

    let joined = tokio::select! {
        joined = &mut capture => joined,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping capture and draining queue (Ctrl+C again to abort)...");
            stop.stop();
            tokio::select! {
                joined = &mut capture => joined,
                _ = tokio::signal::ctrl_c() => {
                    error!("Interrupted again, exiting without draining");
                    std::process::exit(130);
                }
            }
        }
    };

    let summary = match joined.context("capture task panicked")? {
        Ok(summary) => summary,
        Err(e) => {
            error!("Capture failed: {}", e);
            if matches!(e, CaptureError::Device(_)) {
                error!("Make sure the RTL-SDR device is connected and drivers are installed.");
            }
            return Err(e.into());
        }
    };

    let config = session.config();
    if config.write_metadata {
        let path = config.metadata_path();
        match CaptureMetadata::new(&summary, config.doppler_profile.as_deref()).write(&path) {
            Ok(()) => info!("Metadata written to {}", path.display()),
            Err(e) => warn!("Failed to write metadata: {}", e),
        }
    }

    log_summary(&summary);
    Ok(())
}

fn select_driver(backend: Backend) -> Result<Box<dyn Driver>, CaptureError> {
    match backend {
        Backend::Simulated => {
            warn!("Using the simulated SDR backend, samples are synthetic");
            Ok(Box::new(SimulatedDriver::new()))
        }
        #[cfg(feature = "native-sdr")]
        Backend::RtlSdr => Ok(Box::new(doppler_capture::device::rtlsdr::RtlSdrDriver)),
        #[cfg(not(feature = "native-sdr"))]
        Backend::RtlSdr => Err(CaptureError::device(
            "built without RTL-SDR support (enable the `native-sdr` feature or set SDR_BACKEND=sim)",
        )),
    }
}

fn log_profile(profile: &DopplerProfile) {
    let (min, max) = profile.offset_range();
    info!("Doppler profile:");
    if let Some(name) = profile.satellite() {
        info!("  Satellite: {}", name);
    }
    info!("  Center: {:.6} MHz", profile.center_freq_hz() / 1e6);
    info!("  Points: {} over {:.1}s", profile.len(), profile.duration());
    info!("  Offset range: {:.1} .. {:.1} Hz", min, max);
    if let (Some(aos), Some(los)) = (profile.aos_utc(), profile.los_utc()) {
        info!("  Pass: {} -> {}", aos, los);
    }
}

fn log_summary(summary: &CaptureSummary) {
    info!("===========================================");
    info!("  Capture complete");
    info!("  Output: {}", summary.output_path.display());
    info!("  Duration: {:.1}s", summary.elapsed.as_secs_f64());
    info!("  Samples: {}", summary.samples);
    info!("  Written: {:.1} MB", summary.bytes_written as f64 / 1e6);
    info!("  Overflows: {}", summary.overflows);
    info!(
        "  Retunes: {} applied, {} failed{}",
        summary.tunes_applied,
        summary.tune_failures,
        if summary.pass_complete { " (pass complete)" } else { "" }
    );
    info!("===========================================");
}
