//! Simulated SDR backend
//!
//! Streams synthetic cu8 buffers paced at the configured sample rate so the
//! whole pipeline can run without hardware. Every byte is the previous byte
//! plus one (wrapping), which makes reordering or loss visible in the sink.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{Driver, Gain, SampleStream, Tuner};
use crate::error::{CaptureError, Result};

/// Device state shared by the tuner and stream halves.
#[derive(Debug, Default)]
pub struct SimState {
    cancelled: AtomicBool,
    center_freq: AtomicU32,
    sample_rate: AtomicU32,
    gain_tenths: AtomicI32,
    buffer_resets: AtomicU32,
    freq_at_reset: AtomicU32,
    failing_tunes: AtomicU32,
    chunks_emitted: AtomicU64,
    tune_log: Mutex<Vec<u32>>,
}

impl SimState {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn buffer_resets(&self) -> u32 {
        self.buffer_resets.load(Ordering::Relaxed)
    }

    /// Center frequency in effect at the most recent buffer reset
    pub fn freq_at_reset(&self) -> u32 {
        self.freq_at_reset.load(Ordering::Relaxed)
    }

    pub fn chunks_emitted(&self) -> u64 {
        self.chunks_emitted.load(Ordering::Relaxed)
    }

    /// Every accepted center-frequency command, in order
    pub fn tune_log(&self) -> Vec<u32> {
        self.tune_log.lock().clone()
    }
}

pub struct SimulatedDriver {
    devices: u32,
    failing_tunes: u32,
    fail_stream_after: Option<u64>,
    open_calls: AtomicU32,
    state: Mutex<Option<Arc<SimState>>>,
}

impl SimulatedDriver {
    /// One simulated device
    pub fn new() -> Self {
        Self::with_devices(1)
    }

    pub fn with_devices(devices: u32) -> Self {
        Self {
            devices,
            failing_tunes: 0,
            fail_stream_after: None,
            open_calls: AtomicU32::new(0),
            state: Mutex::new(None),
        }
    }

    /// Reject the first `n` center-frequency commands.
    pub fn failing_tunes(mut self, n: u32) -> Self {
        self.failing_tunes = n;
        self
    }

    /// Make the stream fail after emitting `chunks` buffers.
    pub fn fail_stream_after(mut self, chunks: u64) -> Self {
        self.fail_stream_after = Some(chunks);
        self
    }

    pub fn open_calls(&self) -> u32 {
        self.open_calls.load(Ordering::Relaxed)
    }

    /// State of the most recently opened device
    pub fn state(&self) -> Option<Arc<SimState>> {
        self.state.lock().clone()
    }
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for SimulatedDriver {
    fn device_count(&self) -> u32 {
        self.devices
    }

    fn device_name(&self, index: u32) -> Option<String> {
        (index < self.devices).then(|| format!("Simulated RTL2832U #{}", index))
    }

    fn open(&self, index: u32) -> Result<(Box<dyn Tuner>, Box<dyn SampleStream>)> {
        self.open_calls.fetch_add(1, Ordering::Relaxed);
        if index >= self.devices {
            return Err(CaptureError::device(format!(
                "no simulated device at index {}",
                index
            )));
        }

        let state = Arc::new(SimState::default());
        state
            .failing_tunes
            .store(self.failing_tunes, Ordering::Relaxed);
        *self.state.lock() = Some(state.clone());

        Ok((
            Box::new(SimTuner {
                state: state.clone(),
            }),
            Box::new(SimStream {
                state,
                fail_after: self.fail_stream_after,
            }),
        ))
    }
}

struct SimTuner {
    state: Arc<SimState>,
}

impl Tuner for SimTuner {
    fn set_center_freq(&mut self, hz: u32) -> Result<()> {
        let failing = self.state.failing_tunes.load(Ordering::Relaxed);
        if failing > 0 {
            self.state
                .failing_tunes
                .store(failing - 1, Ordering::Relaxed);
            return Err(CaptureError::Tune { freq_hz: hz });
        }
        if hz == 0 {
            return Err(CaptureError::Tune { freq_hz: hz });
        }
        self.state.center_freq.store(hz, Ordering::Relaxed);
        self.state.tune_log.lock().push(hz);
        Ok(())
    }

    fn set_sample_rate(&mut self, hz: u32) -> Result<()> {
        if hz == 0 {
            return Err(CaptureError::device("sample rate 0 Hz rejected"));
        }
        self.state.sample_rate.store(hz, Ordering::Relaxed);
        Ok(())
    }

    fn set_gain(&mut self, gain: Gain) -> Result<()> {
        let tenths = match gain {
            Gain::Auto => 0,
            Gain::Manual(db) => Gain::tenths(db),
        };
        self.state.gain_tenths.store(tenths, Ordering::Relaxed);
        Ok(())
    }

    fn reset_buffer(&mut self) -> Result<()> {
        self.state.buffer_resets.fetch_add(1, Ordering::Relaxed);
        self.state
            .freq_at_reset
            .store(self.center_freq(), Ordering::Relaxed);
        Ok(())
    }

    fn cancel_stream(&mut self) {
        self.state.cancelled.store(true, Ordering::Release);
    }

    fn center_freq(&self) -> u32 {
        self.state.center_freq.load(Ordering::Relaxed)
    }

    fn sample_rate(&self) -> u32 {
        self.state.sample_rate.load(Ordering::Relaxed)
    }

    fn tuner_gain(&self) -> i32 {
        self.state.gain_tenths.load(Ordering::Relaxed)
    }
}

struct SimStream {
    state: Arc<SimState>,
    fail_after: Option<u64>,
}

impl SampleStream for SimStream {
    fn read_async(
        &mut self,
        _num_buffers: u32,
        buffer_len: u32,
        on_chunk: &mut dyn FnMut(&[u8]),
    ) -> Result<()> {
        let rate = self.state.sample_rate.load(Ordering::Relaxed).max(1);
        let period = Duration::from_secs_f64((buffer_len / 2) as f64 / rate as f64);

        let mut buf = vec![0u8; buffer_len as usize];
        let mut next_byte = 0u8;
        let mut deadline = Instant::now() + period;

        while !self.state.is_cancelled() {
            let now = Instant::now();
            if deadline > now {
                thread::sleep(deadline - now);
            }
            deadline += period;

            if self.state.is_cancelled() {
                break;
            }
            if let Some(limit) = self.fail_after {
                if self.state.chunks_emitted() >= limit {
                    return Err(CaptureError::device("simulated stream lost"));
                }
            }

            for b in buf.iter_mut() {
                *b = next_byte;
                next_byte = next_byte.wrapping_add(1);
            }
            self.state.chunks_emitted.fetch_add(1, Ordering::Relaxed);
            on_chunk(&buf);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_until_cancelled_from_callback() {
        let driver = SimulatedDriver::new();
        let (mut tuner, mut stream) = driver.open(0).unwrap();
        tuner.set_sample_rate(1_000_000).unwrap();

        let state = driver.state().unwrap();
        let mut received = Vec::new();
        stream
            .read_async(4, 1024, &mut |buf| {
                received.extend_from_slice(buf);
                if received.len() >= 4096 {
                    state.cancelled.store(true, Ordering::Release);
                }
            })
            .unwrap();

        assert_eq!(received.len(), 4096);
        for pair in received.windows(2) {
            assert_eq!(pair[1], pair[0].wrapping_add(1));
        }
    }

    #[test]
    fn test_failing_tunes_then_accepts() {
        let driver = SimulatedDriver::new().failing_tunes(2);
        let (mut tuner, _stream) = driver.open(0).unwrap();
        assert!(tuner.set_center_freq(137_100_000).is_err());
        assert!(tuner.set_center_freq(137_100_000).is_err());
        assert!(tuner.set_center_freq(137_100_010).is_ok());
        assert_eq!(driver.state().unwrap().tune_log(), vec![137_100_010]);
    }

    #[test]
    fn test_stream_failure() {
        let driver = SimulatedDriver::new().fail_stream_after(3);
        let (mut tuner, mut stream) = driver.open(0).unwrap();
        tuner.set_sample_rate(2_400_000).unwrap();
        let mut chunks = 0;
        let result = stream.read_async(4, 512, &mut |_| chunks += 1);
        assert!(matches!(result, Err(CaptureError::Device(_))));
        assert_eq!(chunks, 3);
    }
}
