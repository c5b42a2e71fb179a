use std::ops::Deref;

use crate::{decode::PcmFrame, Result, VisualiserError};

/// Full-scale magnitude of a signed 16-bit sample.
pub const I16_FULL_SCALE: f32 = 32_768.0;

/// Mono floating point samples in [-1.0, 1.0], one analysis block long.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedBlock {
    samples: Vec<f32>,
}

impl NormalizedBlock {
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    /// Root mean square level of the block.
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.samples.iter().map(|sample| sample * sample).sum();
        (sum / self.samples.len() as f32).sqrt()
    }
}

impl Deref for NormalizedBlock {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.samples
    }
}

/// Folds interleaved integer frames down to normalized mono blocks.
#[derive(Debug, Clone, Copy)]
pub struct SampleNormalizer {
    block_size: usize,
}

impl SampleNormalizer {
    pub fn new(block_size: usize) -> Self {
        Self { block_size }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Averages channels to mono and rescales by [`I16_FULL_SCALE`].
    ///
    /// Frames are expected to be exactly one block long; anything else is a
    /// broken adapter and yields [`VisualiserError::FrameSize`].
    pub fn normalize(&self, frame: &PcmFrame) -> Result<NormalizedBlock> {
        let channels = frame.channels() as usize;
        let expected = self.block_size * channels;
        if frame.samples().len() != expected {
            return Err(VisualiserError::FrameSize {
                expected,
                actual: frame.samples().len(),
            });
        }

        let scale = 1.0 / (I16_FULL_SCALE * channels as f32);
        let samples = frame
            .samples()
            .chunks_exact(channels)
            .map(|group| group.iter().map(|&s| s as f32).sum::<f32>() * scale)
            .collect();

        Ok(NormalizedBlock { samples })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_stereo_to_mono() {
        let normalizer = SampleNormalizer::new(3);
        let frame = PcmFrame::new(vec![16_384, 0, -32_768, -32_768, 100, -100], 2);

        let block = normalizer.normalize(&frame).unwrap();
        assert_eq!(block.len(), 3);
        assert!((block[0] - 0.25).abs() < 1e-6);
        assert!((block[1] + 1.0).abs() < 1e-6);
        assert_eq!(block[2], 0.0);
    }

    #[test]
    fn mono_frames_are_only_rescaled() {
        let normalizer = SampleNormalizer::new(2);
        let block = normalizer
            .normalize(&PcmFrame::new(vec![i16::MAX, i16::MIN], 1))
            .unwrap();

        assert!(block[0] < 1.0 && block[0] > 0.999);
        assert_eq!(block[1], -1.0);
    }

    #[test]
    fn output_always_matches_block_size() {
        let normalizer = SampleNormalizer::new(1024);
        for channels in 1..=4u16 {
            let frame = PcmFrame::new(vec![1_000; 1024 * channels as usize], channels);
            let block = normalizer.normalize(&frame).unwrap();
            assert_eq!(block.len(), 1024);
            assert!(block.iter().all(|s| (-1.0..=1.0).contains(s)));
        }
    }

    #[test]
    fn rejects_frames_of_the_wrong_size() {
        let normalizer = SampleNormalizer::new(4);
        let err = normalizer
            .normalize(&PcmFrame::new(vec![0; 6], 2))
            .unwrap_err();
        assert!(matches!(
            err,
            VisualiserError::FrameSize {
                expected: 8,
                actual: 6
            }
        ));
    }

    #[test]
    fn rms_of_full_scale_square_is_one() {
        let normalizer = SampleNormalizer::new(4);
        let block = normalizer
            .normalize(&PcmFrame::new(vec![i16::MIN, i16::MIN, i16::MIN, i16::MIN], 1))
            .unwrap();
        assert!((block.rms() - 1.0).abs() < 1e-6);
    }
}
