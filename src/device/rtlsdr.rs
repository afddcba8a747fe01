//! librtlsdr backend via `rtlsdr_mt`
//! (requires the `native-sdr` feature)
//!
//! `rtlsdr_mt` already splits a device into a `Controller` that may be used
//! from any thread and a `Reader` that owns the async read loop, which maps
//! one-to-one onto `Tuner` and `SampleStream`.

use rtlsdr_mt::{Controller, Reader};

use super::{Driver, Gain, SampleStream, Tuner};
use crate::error::{CaptureError, Result};

pub struct RtlSdrDriver;

impl Driver for RtlSdrDriver {
    fn device_count(&self) -> u32 {
        rtlsdr_mt::devices().count() as u32
    }

    fn device_name(&self, index: u32) -> Option<String> {
        rtlsdr_mt::devices()
            .nth(index as usize)
            .map(|name| name.to_string_lossy().into_owned())
    }

    fn open(&self, index: u32) -> Result<(Box<dyn Tuner>, Box<dyn SampleStream>)> {
        let (controller, reader) = rtlsdr_mt::open(index)
            .map_err(|_| CaptureError::device(format!("failed to open RTL-SDR device {}", index)))?;

        Ok((
            Box::new(RtlSdrTuner { controller }),
            Box::new(RtlSdrStream { reader }),
        ))
    }
}

struct RtlSdrTuner {
    controller: Controller,
}

impl Tuner for RtlSdrTuner {
    fn set_center_freq(&mut self, hz: u32) -> Result<()> {
        self.controller
            .set_center_freq(hz)
            .map_err(|_| CaptureError::Tune { freq_hz: hz })
    }

    fn set_sample_rate(&mut self, hz: u32) -> Result<()> {
        self.controller
            .set_sample_rate(hz)
            .map_err(|_| CaptureError::device(format!("sample rate {} Hz rejected", hz)))
    }

    fn set_gain(&mut self, gain: Gain) -> Result<()> {
        match gain {
            Gain::Auto => self
                .controller
                .enable_agc()
                .map_err(|_| CaptureError::device("failed to enable automatic gain")),
            Gain::Manual(db) => {
                self.controller
                    .disable_agc()
                    .map_err(|_| CaptureError::device("failed to select manual gain"))?;
                self.controller
                    .set_tuner_gain(Gain::tenths(db))
                    .map_err(|_| CaptureError::device(format!("gain {:.1} dB rejected", db)))
            }
        }
    }

    fn reset_buffer(&mut self) -> Result<()> {
        self.controller
            .reset_buffer()
            .map_err(|_| CaptureError::device("failed to reset device buffer"))
    }

    fn cancel_stream(&mut self) {
        self.controller.cancel_async_read();
    }

    fn center_freq(&self) -> u32 {
        self.controller.center_freq()
    }

    fn sample_rate(&self) -> u32 {
        self.controller.sample_rate()
    }

    fn tuner_gain(&self) -> i32 {
        self.controller.tuner_gain()
    }
}

struct RtlSdrStream {
    reader: Reader,
}

impl SampleStream for RtlSdrStream {
    fn read_async(
        &mut self,
        num_buffers: u32,
        buffer_len: u32,
        on_chunk: &mut dyn FnMut(&[u8]),
    ) -> Result<()> {
        self.reader
            .read_async(num_buffers, buffer_len, |buf| on_chunk(buf))
            .map_err(|_| CaptureError::device("async read failed"))
    }
}
