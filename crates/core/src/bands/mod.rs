use serde::Serialize;

use crate::{analysis::AnalysisResult, SpectrumConfig};

/// Half-open frequency interval `[low, high)` in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrequencyBand {
    pub low: f32,
    pub high: f32,
}

impl FrequencyBand {
    pub fn contains(&self, frequency: f32) -> bool {
        frequency >= self.low && frequency < self.high
    }
}

/// Logarithmic partition of `[min_freq, max_freq)` into equal-ratio bands.
///
/// The first band starts exactly at `min_freq` and the last ends exactly at
/// `max_freq`; neighbours share an edge.
pub fn logarithmic_bands(count: usize, min_freq: f32, max_freq: f32) -> Vec<FrequencyBand> {
    let log_min = min_freq.log10();
    let log_span = max_freq.log10() - log_min;
    let edge = |i: usize| match i {
        0 => min_freq,
        i if i == count => max_freq,
        i => 10f32.powf(log_min + log_span * i as f32 / count as f32),
    };

    (0..count)
        .map(|i| FrequencyBand {
            low: edge(i),
            high: edge(i + 1),
        })
        .collect()
}

/// Folds magnitude spectra into smoothed per-band energies.
///
/// The energy vector persists across updates and is only ever blended in
/// place, so the presentation layer can read it every tick.
#[derive(Debug, Clone)]
pub struct BandMapper {
    bands: Vec<FrequencyBand>,
    bass_bands: usize,
    bass_boost: f32,
    amplitude_scale: f32,
    smoothing: f32,
    targets: Vec<f32>,
    energies: Vec<f32>,
}

impl BandMapper {
    pub fn new(config: &SpectrumConfig) -> Self {
        let bands = logarithmic_bands(config.num_bars, config.min_freq, config.max_freq);
        let count = bands.len();
        Self {
            bands,
            bass_bands: count / 4,
            bass_boost: config.bass_boost,
            amplitude_scale: config.amplitude_scale,
            smoothing: config.smoothing.clamp(0.0, 1.0),
            targets: vec![0.0; count],
            energies: vec![0.0; count],
        }
    }

    pub fn bands(&self) -> &[FrequencyBand] {
        &self.bands
    }

    /// Smoothed energy per band.
    pub fn energies(&self) -> &[f32] {
        &self.energies
    }

    /// Unsmoothed band values from the most recent result.
    pub fn targets(&self) -> &[f32] {
        &self.targets
    }

    pub fn mean_energy(&self) -> f32 {
        if self.energies.is_empty() {
            return 0.0;
        }
        self.energies.iter().sum::<f32>() / self.energies.len() as f32
    }

    /// Blends a new result into the band energies. `None` means no new audio
    /// arrived since the last tick and leaves the state untouched.
    ///
    /// Returns whether the energies changed.
    pub fn update(&mut self, result: Option<&AnalysisResult>) -> bool {
        let Some(result) = result else {
            return false;
        };

        self.map_to_bands(result);

        let peak = self.targets.iter().copied().fold(0.0_f32, f32::max);
        let scale = if peak > 0.0 {
            self.amplitude_scale / peak
        } else {
            self.amplitude_scale
        };

        let alpha = self.smoothing;
        for (energy, target) in self.energies.iter_mut().zip(self.targets.iter_mut()) {
            *target *= scale;
            *energy = alpha * *energy + (1.0 - alpha) * *target;
        }
        true
    }

    fn map_to_bands(&mut self, result: &AnalysisResult) {
        let len = result.magnitude.len().min(result.frequencies.len());
        let frequencies = &result.frequencies[..len];
        let magnitude = &result.magnitude[..len];

        for (index, (band, target)) in self.bands.iter().zip(self.targets.iter_mut()).enumerate() {
            let start = frequencies.partition_point(|&f| f < band.low);
            let end = frequencies.partition_point(|&f| f < band.high);

            *target = if end > start {
                magnitude[start..end].iter().sum::<f32>() / (end - start) as f32
            } else {
                0.0
            };

            if index < self.bass_bands {
                *target *= self.bass_boost;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::normalize::SampleNormalizer;
    use crate::{analysis::SpectrumAnalyzer, decode::PcmFrame};

    fn config(num_bars: usize, smoothing: f32) -> SpectrumConfig {
        SpectrumConfig {
            num_bars,
            smoothing,
            ..SpectrumConfig::default()
        }
    }

    /// Result with hand-picked bins, for exact arithmetic.
    fn result(frequencies: &[f32], magnitude: &[f32]) -> AnalysisResult {
        let block = SampleNormalizer::new(2)
            .normalize(&PcmFrame::new(vec![0, 0], 1))
            .unwrap();
        AnalysisResult {
            magnitude: magnitude.to_vec(),
            frequencies: Arc::from(frequencies),
            samples: block,
        }
    }

    #[test]
    fn bands_partition_the_audible_range() {
        for count in [1, 7, 64] {
            let bands = logarithmic_bands(count, 20.0, 20_000.0);
            assert_eq!(bands.len(), count);
            assert_eq!(bands[0].low, 20.0);
            assert!((bands[count - 1].high - 20_000.0).abs() < 1e-3);
            for band in &bands {
                assert!(band.low < band.high);
            }
            for pair in bands.windows(2) {
                assert_eq!(pair[0].high, pair[1].low);
            }
        }
    }

    #[test]
    fn bands_are_equal_ratio() {
        let bands = logarithmic_bands(3, 20.0, 20_000.0);
        for band in &bands {
            assert!((band.high / band.low - 10.0).abs() < 1e-2);
        }
        assert!(bands[0].contains(20.0));
        assert!(!bands[0].contains(bands[0].high));
    }

    #[test]
    fn missing_update_leaves_state_alone() {
        let mut mapper = BandMapper::new(&config(4, 0.5));
        let input = result(&[30.0, 300.0, 3_000.0], &[1.0, 2.0, 3.0]);
        mapper.update(Some(&input));
        let before = mapper.energies().to_vec();

        assert!(!mapper.update(None));
        assert_eq!(mapper.energies(), before.as_slice());
    }

    #[test]
    fn averages_boosts_normalizes_and_scales() {
        // Bands: [20, ~112), [~112, ~632), [~632, ~3557), [~3557, 20000).
        let mut mapper = BandMapper::new(&SpectrumConfig {
            num_bars: 4,
            smoothing: 0.0,
            bass_boost: 2.0,
            amplitude_scale: 1.5,
            ..SpectrumConfig::default()
        });
        let input = result(
            &[10.0, 50.0, 100.0, 200.0, 1_000.0, 2_000.0],
            &[99.0, 1.0, 3.0, 4.0, 8.0, 0.0],
        );

        assert!(mapper.update(Some(&input)));

        // Raw means: [2, 4, 4, 0]; the bass band is doubled to 4; max is 4.
        let expected = [1.5, 1.5, 1.5, 0.0];
        for (got, want) in mapper.energies().iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "{got} != {want}");
        }
    }

    #[test]
    fn smoothing_converges_to_the_target() {
        let mut mapper = BandMapper::new(&config(16, 0.8));
        let normalizer = SampleNormalizer::new(1024);
        let mut analyzer = SpectrumAnalyzer::new(44_100, 1024);
        let samples = (0..1024)
            .map(|n| ((n as f32 * 0.3).sin() * 20_000.0) as i16)
            .collect();
        let input = analyzer
            .analyze(normalizer.normalize(&PcmFrame::new(samples, 1)).unwrap())
            .unwrap();

        mapper.update(Some(&input));
        let first_gap: f32 = distance(mapper.energies(), mapper.targets());
        for _ in 0..100 {
            mapper.update(Some(&input));
        }

        assert!(first_gap > 0.1);
        assert!(distance(mapper.energies(), mapper.targets()) < 1e-4);
        assert!(mapper.energies().iter().any(|&e| (e - 1.0).abs() < 1e-4));
    }

    #[test]
    fn silence_decays_towards_zero_without_going_negative() {
        let mut mapper = BandMapper::new(&config(8, 0.6));
        let loud = result(&[25.0, 150.0, 900.0, 5_000.0], &[5.0, 5.0, 5.0, 5.0]);
        let silent = result(&[25.0, 150.0, 900.0, 5_000.0], &[0.0; 4]);

        mapper.update(Some(&loud));
        let mut previous = mapper.mean_energy();
        assert!(previous > 0.0);

        for _ in 0..50 {
            mapper.update(Some(&silent));
            assert!(mapper.targets().iter().all(|&t| t == 0.0));
            assert!(mapper.energies().iter().all(|&e| e >= 0.0));
            assert!(mapper.mean_energy() <= previous);
            previous = mapper.mean_energy();
        }
        assert!(previous < 1e-6);
    }

    fn distance(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| (x - y).abs()).fold(0.0, f32::max)
    }
}
