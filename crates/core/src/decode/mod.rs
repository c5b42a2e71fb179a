//! Frame decoder adapters.
//!
//! Both ingestion paths end up producing [`PcmFrame`] values holding exactly
//! one analysis block of interleaved signed 16-bit samples. The subprocess
//! path pulls frames from a decoder's stdout through [`PcmReader`]; the live
//! capture path is pushed samples by the audio host and re-chunks them with
//! a [`FrameAssembler`].

#[cfg(feature = "capture")]
mod capture;
#[cfg(not(feature = "capture"))]
mod no_capture;
mod process;

use std::io::{ErrorKind, Read};

#[cfg(feature = "capture")]
pub use capture::CaptureDevice;
#[cfg(not(feature = "capture"))]
pub use no_capture::CaptureDevice;
pub use process::{DecoderCommand, DecoderProcess, DECODER_STOP_TIMEOUT};

use crate::Result;

/// Width in bytes of one signed 16-bit little-endian sample.
pub const SAMPLE_WIDTH: usize = 2;

/// One block of interleaved signed 16-bit samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmFrame {
    samples: Vec<i16>,
    channels: u16,
}

impl PcmFrame {
    /// Wraps interleaved samples. A zero channel count is treated as mono.
    pub fn new(samples: Vec<i16>, channels: u16) -> Self {
        Self {
            samples,
            channels: channels.max(1),
        }
    }

    /// Decodes raw little-endian bytes. A trailing odd byte is ignored.
    pub fn from_le_bytes(bytes: &[u8], channels: u16) -> Self {
        let samples = bytes
            .chunks_exact(SAMPLE_WIDTH)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self::new(samples, channels)
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of sample frames, i.e. samples per channel.
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }
}

/// Reads fixed-size PCM frames from a raw byte stream.
#[derive(Debug)]
pub struct PcmReader<R> {
    inner: R,
    channels: u16,
    buffer: Vec<u8>,
}

impl<R: Read> PcmReader<R> {
    pub fn new(inner: R, block_size: usize, channels: u16) -> Self {
        let channels = channels.max(1);
        Self {
            inner,
            channels,
            buffer: vec![0; block_size * channels as usize * SAMPLE_WIDTH],
        }
    }

    /// Bytes consumed per frame.
    pub fn frame_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Reads exactly one frame. Returns `Ok(None)` once the stream ends,
    /// including when it ends part-way through a frame.
    pub fn read_frame(&mut self) -> Result<Option<PcmFrame>> {
        let mut filled = 0;
        while filled < self.buffer.len() {
            match self.inner.read(&mut self.buffer[filled..]) {
                Ok(0) => {
                    if filled > 0 {
                        tracing::debug!(
                            filled,
                            expected = self.buffer.len(),
                            "discarding incomplete trailing frame"
                        );
                    }
                    return Ok(None);
                }
                Ok(read) => filled += read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }

        Ok(Some(PcmFrame::from_le_bytes(&self.buffer, self.channels)))
    }
}

/// Re-chunks arbitrarily sized callback buffers into whole frames.
#[derive(Debug)]
pub struct FrameAssembler {
    frame_len: usize,
    channels: u16,
    pending: Vec<i16>,
}

impl FrameAssembler {
    pub fn new(block_size: usize, channels: u16) -> Self {
        let channels = channels.max(1);
        let frame_len = block_size * channels as usize;
        Self {
            frame_len,
            channels,
            pending: Vec::with_capacity(frame_len),
        }
    }

    /// Appends interleaved samples, emitting every frame that completes.
    pub fn push<I, F>(&mut self, samples: I, mut emit: F)
    where
        I: IntoIterator<Item = i16>,
        F: FnMut(PcmFrame),
    {
        for sample in samples {
            self.pending.push(sample);
            if self.pending.len() == self.frame_len {
                let full = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_len));
                emit(PcmFrame::new(full, self.channels));
            }
        }
    }

    /// Samples waiting for the rest of their frame.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
