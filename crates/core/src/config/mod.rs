use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{channel::SlotPolicy, Result, VisualiserError};

/// Name of the only visualisation the scene module knows how to plan.
pub const PSYCHEDELIC_SPECTRUM: &str = "psychedelic_spectrum";

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub display: DisplayConfig,
    pub visualization: VisualizationConfig,
}

impl AppConfig {
    /// Reads, parses and validates a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&text)?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Parses and validates configuration from a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.audio.validate()?;
        self.display.validate()?;
        self.visualization.validate()
    }
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Samples per channel in one analysis block.
    pub buffer_size: usize,
    pub channels: u16,
    pub stream_url: String,
    pub slot_policy: SlotPolicy,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            buffer_size: 1024,
            channels: 2,
            stream_url: "http://localhost:8000/stream.ogg".to_string(),
            slot_policy: SlotPolicy::default(),
        }
    }
}

impl AudioConfig {
    /// Bytes the decoder emits for one block of interleaved s16le samples.
    pub fn frame_bytes(&self) -> usize {
        self.buffer_size * self.channels as usize * 2
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(invalid("audio.sample_rate must be positive"));
        }
        if self.buffer_size < 2 {
            return Err(invalid("audio.buffer_size must be at least 2"));
        }
        if self.channels == 0 {
            return Err(invalid("audio.channels must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub fps_target: u32,
    pub fullscreen: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps_target: 60,
            fullscreen: false,
        }
    }
}

impl DisplayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(invalid("display size must be non-zero"));
        }
        if self.fps_target == 0 {
            return Err(invalid("display.fps_target must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualizationConfig {
    pub current: String,
    pub psychedelic_spectrum: SpectrumConfig,
}

impl Default for VisualizationConfig {
    fn default() -> Self {
        Self {
            current: PSYCHEDELIC_SPECTRUM.to_string(),
            psychedelic_spectrum: SpectrumConfig::default(),
        }
    }
}

impl VisualizationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.current != PSYCHEDELIC_SPECTRUM {
            return Err(invalid(format!("unknown visualization `{}`", self.current)));
        }
        self.psychedelic_spectrum.validate()
    }
}

/// Options consumed by the band mapper and the spectrum scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumConfig {
    pub num_bars: usize,
    pub bar_spacing: u32,
    pub color_speed: f32,
    /// Exponential smoothing weight kept from the previous state, in [0, 1).
    pub smoothing: f32,
    pub amplitude_scale: f32,
    pub bass_boost: f32,
    pub glow_intensity: f32,
    pub mirror_mode: bool,
    pub min_freq: f32,
    pub max_freq: f32,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            num_bars: 64,
            bar_spacing: 2,
            color_speed: 1.0,
            smoothing: 0.7,
            amplitude_scale: 1.0,
            bass_boost: 1.5,
            glow_intensity: 0.3,
            mirror_mode: false,
            min_freq: 20.0,
            max_freq: 20_000.0,
        }
    }
}

impl SpectrumConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_bars == 0 {
            return Err(invalid("num_bars must be at least 1"));
        }
        if !(0.0..1.0).contains(&self.smoothing) {
            return Err(invalid("smoothing must lie in [0, 1)"));
        }
        if !(self.min_freq > 0.0 && self.min_freq < self.max_freq) {
            return Err(invalid("frequency range must satisfy 0 < min_freq < max_freq"));
        }
        if self.amplitude_scale < 0.0 || self.bass_boost < 0.0 {
            return Err(invalid("amplitude_scale and bass_boost must not be negative"));
        }
        if !(0.0..=1.0).contains(&self.glow_intensity) {
            return Err(invalid("glow_intensity must lie in [0, 1]"));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> VisualiserError {
    VisualiserError::InvalidConfig(message.into())
}
