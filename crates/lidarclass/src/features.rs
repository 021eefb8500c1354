//! Per-point derived features, computed column-wise once per chunk.

use crate::chunk::ChunkView;
use crate::stats::{GlobalStats, RANGE_EPSILON};
use serde::{Deserialize, Serialize};

const INTENSITY_MAX: f32 = u16::MAX as f32;
const COLOR_MAX: f32 = u16::MAX as f32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// `(z - z_min) / (z_range + eps)`
    ZRel,
    /// Reflectance proxy in 0..1.
    Intensity,
    Red,
    Green,
    Blue,
    /// `g - (r + b) / 2`
    Greenness,
    /// `(r + g + b) / 3`
    Brightness,
    /// `b - (r + g) / 2`
    Blueness,
    /// `r - (g + b) / 2`
    Redness,
}

/// Feature columns for one chunk, all the same length.
#[derive(Debug, Default)]
pub struct FeatureColumns {
    z_rel: Vec<f32>,
    intensity: Vec<f32>,
    red: Vec<f32>,
    green: Vec<f32>,
    blue: Vec<f32>,
    greenness: Vec<f32>,
    brightness: Vec<f32>,
    blueness: Vec<f32>,
    redness: Vec<f32>,
}

impl FeatureColumns {
    pub fn compute(view: ChunkView<'_>, stats: &GlobalStats) -> Self {
        let z_min = stats.z_min;
        let scale = 1.0 / (stats.z_range + RANGE_EPSILON);

        let z_rel = view
            .elevation
            .iter()
            .map(|&z| ((z - z_min) * scale) as f32)
            .collect();

        let intensity = view
            .intensity
            .iter()
            .map(|&i| i as f32 / INTENSITY_MAX)
            .collect();

        let red: Vec<f32> = view.color.iter().map(|c| c[0] as f32 / COLOR_MAX).collect();
        let green: Vec<f32> = view.color.iter().map(|c| c[1] as f32 / COLOR_MAX).collect();
        let blue: Vec<f32> = view.color.iter().map(|c| c[2] as f32 / COLOR_MAX).collect();

        let greenness = zip3(&green, &red, &blue, |g, r, b| g - (r + b) / 2.0);
        let brightness = zip3(&red, &green, &blue, |r, g, b| (r + g + b) / 3.0);
        let blueness = zip3(&blue, &red, &green, |b, r, g| b - (r + g) / 2.0);
        let redness = zip3(&red, &green, &blue, |r, g, b| r - (g + b) / 2.0);

        Self {
            z_rel,
            intensity,
            red,
            green,
            blue,
            greenness,
            brightness,
            blueness,
            redness,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.z_rel.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.z_rel.is_empty()
    }

    #[inline]
    pub fn column(&self, feature: Feature) -> &[f32] {
        match feature {
            Feature::ZRel => &self.z_rel,
            Feature::Intensity => &self.intensity,
            Feature::Red => &self.red,
            Feature::Green => &self.green,
            Feature::Blue => &self.blue,
            Feature::Greenness => &self.greenness,
            Feature::Brightness => &self.brightness,
            Feature::Blueness => &self.blueness,
            Feature::Redness => &self.redness,
        }
    }
}

#[inline]
fn zip3(a: &[f32], b: &[f32], c: &[f32], f: impl Fn(f32, f32, f32) -> f32) -> Vec<f32> {
    a.iter()
        .zip(b)
        .zip(c)
        .map(|((&a, &b), &c)| f(a, b, c))
        .collect()
}
