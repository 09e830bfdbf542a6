use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};

/// Outcome of comparing one candidate with its predecessor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneDecision {
    /// Mean absolute grayscale difference, `None` when there was nothing comparable
    pub score: Option<f64>,
    pub is_keyframe: bool,
}

/// Scene-change detector over downscaled grayscale candidates.
///
/// Each candidate is compared with the immediately preceding candidate, never
/// with the last keyframe, so a slow fade can stay under the threshold at every
/// step.
pub struct SceneDetector {
    threshold: f64,
    downscale_factor: u32,
    previous: Option<GrayImage>,
}

impl SceneDetector {
    pub fn new(threshold: f64, downscale_factor: u32) -> Self {
        Self {
            threshold,
            downscale_factor: downscale_factor.max(1),
            previous: None,
        }
    }

    /// Classify a candidate and make it the new reference
    pub fn observe(&mut self, frame: &RgbImage) -> SceneDecision {
        let current = self.downscale(frame);

        let decision = match &self.previous {
            None => SceneDecision {
                score: None,
                is_keyframe: true,
            },
            Some(previous) => match mean_absolute_difference(&current, previous) {
                Some(score) => SceneDecision {
                    score: Some(score),
                    is_keyframe: score > self.threshold,
                },
                // Resolution changed mid-stream
                None => SceneDecision {
                    score: None,
                    is_keyframe: true,
                },
            },
        };

        self.previous = Some(current);
        decision
    }

    /// Shrink to 1/N linear resolution, then convert to grayscale
    pub fn downscale(&self, frame: &RgbImage) -> GrayImage {
        let width = (frame.width() / self.downscale_factor).max(1);
        let height = (frame.height() / self.downscale_factor).max(1);

        let small = if (width, height) == frame.dimensions() {
            frame.clone()
        } else {
            imageops::resize(frame, width, height, FilterType::Triangle)
        };

        imageops::grayscale(&small)
    }
}

/// Mean absolute per-pixel difference on a 0-255 scale
pub fn mean_absolute_difference(a: &GrayImage, b: &GrayImage) -> Option<f64> {
    if a.dimensions() != b.dimensions() || a.as_raw().is_empty() {
        return None;
    }

    let total: u64 = a
        .as_raw()
        .iter()
        .zip(b.as_raw().iter())
        .map(|(&x, &y)| x.abs_diff(y) as u64)
        .sum();

    Some(total as f64 / a.as_raw().len() as f64)
}
