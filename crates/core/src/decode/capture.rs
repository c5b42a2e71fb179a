use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Sample, SampleFormat, SizedSample, Stream, StreamConfig};

use super::{FrameAssembler, PcmFrame};
use crate::{AudioConfig, Result, VisualiserError};

/// Live input from the host's default capture device.
///
/// Samples are pushed by the audio host on its own thread; each completed
/// block is handed to the `on_frame` callback given to [`CaptureDevice::open`].
pub struct CaptureDevice {
    stream: Option<Stream>,
    channels: u16,
}

impl CaptureDevice {
    /// Opens and starts the default input device.
    ///
    /// The configured channel count is used when the device supports it at
    /// the configured rate; otherwise the device's default layout is taken and
    /// the normalizer folds it to mono like any other frame.
    pub fn open<F>(config: &AudioConfig, on_frame: F) -> Result<Self>
    where
        F: FnMut(PcmFrame) + Send + 'static,
    {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| VisualiserError::DeviceUnavailable("no default input device".into()))?;

        let (channels, sample_format) = select_layout(&device, config)?;
        let stream_config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(config.buffer_size as u32),
        };

        tracing::info!(
            device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
            sample_rate = config.sample_rate,
            channels,
            ?sample_format,
            "opening capture device"
        );

        let block_size = config.buffer_size;
        let stream = match sample_format {
            SampleFormat::I16 => {
                build_stream::<i16, _>(&device, &stream_config, block_size, on_frame)?
            }
            SampleFormat::U16 => {
                build_stream::<u16, _>(&device, &stream_config, block_size, on_frame)?
            }
            SampleFormat::F32 => {
                build_stream::<f32, _>(&device, &stream_config, block_size, on_frame)?
            }
            other => {
                return Err(VisualiserError::DeviceUnavailable(format!(
                    "unsupported sample format {other:?}"
                )))
            }
        };

        stream
            .play()
            .map_err(|e| VisualiserError::DeviceUnavailable(e.to_string()))?;

        Ok(Self {
            stream: Some(stream),
            channels,
        })
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn is_running(&self) -> bool {
        self.stream.is_some()
    }

    /// Pauses and closes the stream. Calling it again is a no-op.
    pub fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            if let Err(err) = stream.pause() {
                tracing::warn!(%err, "failed to pause capture stream");
            }
            drop(stream);
            tracing::debug!("capture stream closed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for CaptureDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureDevice")
            .field("running", &self.is_running())
            .field("channels", &self.channels)
            .finish()
    }
}

/// One supported input range: channels, min rate, max rate, sample format.
type LayoutRange = (u16, u32, u32, SampleFormat);

fn select_layout(device: &Device, config: &AudioConfig) -> Result<(u16, SampleFormat)> {
    let ranges: Vec<LayoutRange> = device
        .supported_input_configs()
        .map_err(|e| VisualiserError::DeviceUnavailable(e.to_string()))?
        .map(|range| {
            (
                range.channels(),
                range.min_sample_rate().0,
                range.max_sample_rate().0,
                range.sample_format(),
            )
        })
        .collect();
    let rate = config.sample_rate;

    if let Some(layout) = pick_layout(&ranges, Some(config.channels), rate) {
        return Ok(layout);
    }

    let fallback = device
        .default_input_config()
        .map_err(|e| VisualiserError::DeviceUnavailable(e.to_string()))?;
    let layout = if format_rank(fallback.sample_format()).is_some() {
        Some((fallback.channels(), fallback.sample_format()))
    } else {
        pick_layout(&ranges, Some(fallback.channels()), rate)
            .or_else(|| pick_layout(&ranges, None, rate))
    };
    let (channels, sample_format) = layout.ok_or_else(|| {
        VisualiserError::DeviceUnavailable(format!(
            "no capture layout at {rate} Hz with an i16, u16 or f32 sample format"
        ))
    })?;

    tracing::warn!(
        requested = config.channels,
        using = channels,
        "capture device does not offer the requested channel layout"
    );
    Ok((channels, sample_format))
}

/// Best range covering `rate` with a sample format `build_stream` handles,
/// restricted to `channels` when given.
fn pick_layout(
    ranges: &[LayoutRange],
    channels: Option<u16>,
    rate: u32,
) -> Option<(u16, SampleFormat)> {
    ranges
        .iter()
        .filter(|(count, min, max, _)| {
            channels.map_or(true, |wanted| *count == wanted) && (*min..=*max).contains(&rate)
        })
        .filter_map(|&(count, _, _, format)| format_rank(format).map(|rank| (rank, count, format)))
        .min_by_key(|&(rank, _, _)| rank)
        .map(|(_, count, format)| (count, format))
}

/// Preference order among the formats with a conversion arm; `None` otherwise.
fn format_rank(format: SampleFormat) -> Option<u8> {
    match format {
        SampleFormat::F32 => Some(0),
        SampleFormat::I16 => Some(1),
        SampleFormat::U16 => Some(2),
        _ => None,
    }
}

fn build_stream<T, F>(
    device: &Device,
    config: &StreamConfig,
    block_size: usize,
    mut on_frame: F,
) -> Result<Stream>
where
    T: SizedSample,
    i16: cpal::FromSample<T>,
    F: FnMut(PcmFrame) + Send + 'static,
{
    let mut assembler = FrameAssembler::new(block_size, config.channels);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                assembler.push(data.iter().map(|&s| i16::from_sample(s)), &mut on_frame);
            },
            |err| tracing::warn!(%err, "capture stream error"),
            None,
        )
        .map_err(|e| VisualiserError::DeviceUnavailable(e.to_string()))
}
