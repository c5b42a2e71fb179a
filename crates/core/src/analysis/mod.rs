use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{normalize::NormalizedBlock, Result, VisualiserError};

/// Magnitude spectrum of one normalized block.
///
/// The frequency table is shared by every result from the same analyzer.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub magnitude: Vec<f32>,
    pub frequencies: Arc<[f32]>,
    pub samples: NormalizedBlock,
}

impl AnalysisResult {
    pub fn bins(&self) -> usize {
        self.magnitude.len()
    }

    /// Index of the strongest bin, ignoring DC.
    pub fn peak_bin(&self) -> Option<usize> {
        self.magnitude
            .iter()
            .enumerate()
            .skip(1)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(index, _)| index)
    }

    /// Magnitude-weighted mean frequency in Hz, or 0 for silence.
    pub fn spectral_centroid(&self) -> f32 {
        let mut magnitude_sum = 0.0;
        let mut weighted_sum = 0.0;
        for (magnitude, frequency) in self.magnitude.iter().zip(self.frequencies.iter()) {
            magnitude_sum += magnitude;
            weighted_sum += magnitude * frequency;
        }

        if magnitude_sum <= f32::EPSILON {
            0.0
        } else {
            weighted_sum / magnitude_sum
        }
    }
}

/// Windowed real FFT over fixed-size blocks.
///
/// The Hann window, bin frequency table and FFT buffers are built once in
/// [`SpectrumAnalyzer::new`] and reused for every block.
pub struct SpectrumAnalyzer {
    sample_rate: u32,
    block_size: usize,
    window: Vec<f32>,
    frequencies: Arc<[f32]>,
    fft: FftResources,
}

impl SpectrumAnalyzer {
    pub fn new(sample_rate: u32, block_size: usize) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let plan = planner.plan_fft_forward(block_size);
        let fft = FftResources {
            scratch: plan.make_scratch_vec(),
            spectrum: plan.make_output_vec(),
            input: plan.make_input_vec(),
            plan,
        };

        Self {
            sample_rate,
            block_size,
            window: hann_window(block_size),
            frequencies: bin_frequencies(sample_rate, block_size).into(),
            fft,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Centre frequency of every bin, `block_size / 2 + 1` entries.
    pub fn frequencies(&self) -> &Arc<[f32]> {
        &self.frequencies
    }

    pub fn window(&self) -> &[f32] {
        &self.window
    }

    /// Windows the block and returns the magnitude of its real FFT.
    pub fn analyze(&mut self, block: NormalizedBlock) -> Result<AnalysisResult> {
        if block.len() != self.block_size {
            return Err(VisualiserError::FrameSize {
                expected: self.block_size,
                actual: block.len(),
            });
        }

        let fft = &mut self.fft;
        for ((slot, sample), weight) in fft.input.iter_mut().zip(block.iter()).zip(&self.window) {
            *slot = sample * weight;
        }

        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)?;

        let magnitude = fft.spectrum.iter().map(|bin| bin.norm()).collect();

        Ok(AnalysisResult {
            magnitude,
            frequencies: Arc::clone(&self.frequencies),
            samples: block,
        })
    }
}

struct FftResources {
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("sample_rate", &self.sample_rate)
            .field("block_size", &self.block_size)
            .field("bins", &self.frequencies.len())
            .finish()
    }
}

/// Symmetric Hann window.
pub fn hann_window(len: usize) -> Vec<f32> {
    (0..len).map(|index| hann_value(index, len)).collect()
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}

/// `k * sample_rate / block_size` for `k` in `0..=block_size / 2`.
pub fn bin_frequencies(sample_rate: u32, block_size: usize) -> Vec<f32> {
    let bin_hz = sample_rate as f32 / block_size as f32;
    (0..=block_size / 2).map(|k| k as f32 * bin_hz).collect()
}
