//! Spectrum scene: turns band energies into a backend-agnostic draw list.
//!
//! Nothing here touches pixels. A windowing backend walks the [`FramePlan`]
//! and fills the rectangles it describes.

use serde::Serialize;

use crate::{AnalysisResult, BandMapper, DisplayConfig, SpectrumConfig};

/// Fraction of the screen height a bar at energy 1.0 occupies.
const BAR_HEIGHT_RATIO: f32 = 0.8;
const MIN_BAR_HEIGHT: i32 = 2;
/// Extra pixels the glow extends past each bar edge.
const GLOW_MARGIN: i32 = 4;
const COLOR_SATURATION: f32 = 0.8;
const PULSE_EVERY_FRAMES: u64 = 3;
const PULSE_MIN_ENERGY: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BarShape {
    pub rect: Rect,
    pub color: Rgb,
    pub glow: Rect,
    pub glow_color: Rgb,
}

/// Translucent full-screen wash drawn over the bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PulseOverlay {
    pub color: Rgb,
    pub alpha: u8,
}

/// Everything needed to draw one frame, back to front.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FramePlan {
    pub width: u32,
    pub height: u32,
    pub background: Rgb,
    /// Opacity of the additive glow layer.
    pub glow_alpha: u8,
    pub bars: Vec<BarShape>,
    pub pulse: Option<PulseOverlay>,
}

/// The psychedelic spectrum visualisation.
#[derive(Debug, Clone)]
pub struct SpectrumScene {
    mapper: BandMapper,
    width: u32,
    height: u32,
    bar_width: i32,
    bar_spacing: i32,
    color_speed: f32,
    glow_intensity: f32,
    mirror_mode: bool,
    color_offset: f32,
    frame_count: u64,
}

impl SpectrumScene {
    pub fn new(spectrum: &SpectrumConfig, display: &DisplayConfig) -> Self {
        let bars = spectrum.num_bars.max(1) as i32;
        let total_spacing = (bars - 1) * spectrum.bar_spacing as i32;
        let bar_width = (display.width as i32 - total_spacing).max(0) / bars;

        tracing::info!(bars, bar_width, "spectrum scene initialized");

        Self {
            mapper: BandMapper::new(spectrum),
            width: display.width,
            height: display.height,
            bar_width,
            bar_spacing: spectrum.bar_spacing as i32,
            color_speed: spectrum.color_speed,
            glow_intensity: spectrum.glow_intensity,
            mirror_mode: spectrum.mirror_mode,
            color_offset: 0.0,
            frame_count: 0,
        }
    }

    pub fn mapper(&self) -> &BandMapper {
        &self.mapper
    }

    /// Smoothed band energies, one per bar.
    pub fn energies(&self) -> &[f32] {
        self.mapper.energies()
    }

    pub fn bar_width(&self) -> i32 {
        self.bar_width
    }

    pub fn color_offset(&self) -> f32 {
        self.color_offset
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Feeds the latest analysis. Colours only advance when data arrived.
    pub fn update(&mut self, result: Option<&AnalysisResult>) {
        if self.mapper.update(result) {
            self.color_offset += self.color_speed * 0.001;
            self.frame_count += 1;
        }
    }

    pub fn plan(&self) -> FramePlan {
        let height = self.height as i32;
        let count = self.energies().len();
        let mut bars = Vec::with_capacity(count);
        let mut x = 0;

        for (index, &energy) in self.energies().iter().enumerate() {
            let bar_height = ((energy * self.height as f32 * BAR_HEIGHT_RATIO) as i32)
                .clamp(MIN_BAR_HEIGHT, height.max(MIN_BAR_HEIGHT));
            let top = if self.mirror_mode {
                height / 2 - bar_height / 2
            } else {
                height - bar_height
            };

            let position = index as f32 / count as f32;
            let rect = Rect {
                x,
                y: top,
                width: self.bar_width,
                height: bar_height,
            };
            bars.push(BarShape {
                rect,
                color: self.rainbow(position, 1.0),
                glow: Rect {
                    x: x - GLOW_MARGIN,
                    y: top - GLOW_MARGIN,
                    width: self.bar_width + 2 * GLOW_MARGIN,
                    height: bar_height + 2 * GLOW_MARGIN,
                },
                glow_color: self.rainbow(position, 0.5),
            });

            x += self.bar_width + self.bar_spacing;
        }

        FramePlan {
            width: self.width,
            height: self.height,
            background: Rgb(0, 0, 0),
            glow_alpha: (255.0 * self.glow_intensity) as u8,
            bars,
            pulse: self.pulse(),
        }
    }

    fn pulse(&self) -> Option<PulseOverlay> {
        if self.frame_count % PULSE_EVERY_FRAMES != 0 {
            return None;
        }
        let energy = self.mapper.mean_energy();
        if energy <= PULSE_MIN_ENERGY {
            return None;
        }
        Some(PulseOverlay {
            color: self.rainbow(self.color_offset, 0.3),
            alpha: (energy * 20.0).min(255.0) as u8,
        })
    }

    fn rainbow(&self, position: f32, brightness: f32) -> Rgb {
        let hue = (position + self.color_offset).rem_euclid(1.0);
        hsv_to_rgb(hue, COLOR_SATURATION, brightness)
    }
}

/// HSV with every component in [0, 1] to 8-bit RGB.
pub fn hsv_to_rgb(hue: f32, saturation: f32, value: f32) -> Rgb {
    let (r, g, b) = if saturation <= 0.0 {
        (value, value, value)
    } else {
        let sector = (hue * 6.0).floor();
        let fraction = hue * 6.0 - sector;
        let p = value * (1.0 - saturation);
        let q = value * (1.0 - saturation * fraction);
        let t = value * (1.0 - saturation * (1.0 - fraction));
        match sector as i32 % 6 {
            0 => (value, t, p),
            1 => (q, value, p),
            2 => (p, value, t),
            3 => (p, q, value),
            4 => (t, p, value),
            _ => (value, p, q),
        }
    };

    let channel = |c: f32| (c.clamp(0.0, 1.0) * 255.0) as u8;
    Rgb(channel(r), channel(g), channel(b))
}
