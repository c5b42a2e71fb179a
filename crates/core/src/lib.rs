//! Core library for the Vinyl Visualiser.
//!
//! Audio arrives either from a decoder subprocess (usually ffmpeg reading an
//! Icecast stream) or from a live capture device, and flows through
//! fixed-size PCM frames, normalized mono blocks and windowed FFT spectra
//! into a single-slot [`ResultSlot`]. The render tick pulls from that slot at
//! its own pace and folds each spectrum into smoothed band energies with the
//! [`BandMapper`].

pub mod analysis;
pub mod audio;
pub mod bands;
pub mod channel;
pub mod config;
pub mod decode;
pub mod error;
pub mod normalize;
pub mod render;
pub mod timeline;

pub use analysis::{AnalysisResult, SpectrumAnalyzer};
pub use audio::{AnalysisHandle, AudioEngine, EngineState, SourceKind};
pub use bands::{logarithmic_bands, BandMapper, FrequencyBand};
pub use channel::{PublishOutcome, ResultSlot, SlotPolicy, SlotStats};
pub use config::{AppConfig, AudioConfig, DisplayConfig, SpectrumConfig, VisualizationConfig};
pub use decode::{CaptureDevice, DecoderCommand, DecoderProcess, FrameAssembler, PcmFrame, PcmReader};
pub use error::{Result, VisualiserError};
pub use normalize::{NormalizedBlock, SampleNormalizer};
pub use render::{FramePlan, SpectrumScene};
pub use timeline::FrameClock;
