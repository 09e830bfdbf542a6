//! Keyframe selection: a fixed-stride walk over decoded frames with
//! scene-change detection on downscaled grayscale candidates.

pub mod scene;
pub mod source;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::SamplerConfig;
use crate::error::{IndexerError, Result};
use crate::timecode::frame_timestamp;

pub use scene::{mean_absolute_difference, SceneDecision, SceneDetector};
pub use source::{FfmpegDecoder, FfmpegFrameSource, FrameSource, InMemoryFrames, VideoDecoder};

/// A sampled frame selected for text extraction
#[derive(Debug, Clone)]
pub struct KeyFrame {
    /// Index in the original frame stream, not the decimated index
    pub frame_number: u64,
    /// `HH:MM:SS` derived from `frame_number / fps`
    pub timestamp: String,
    /// Full-resolution pixels, dropped once text has been extracted
    pub pixels: RgbImage,
}

/// Counters for one sampling pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingStats {
    pub frames_read: u64,
    pub candidates: u64,
    pub keyframes: u64,
}

/// Fixed-stride keyframe sampler
#[derive(Debug, Clone)]
pub struct FrameSampler {
    stride: u64,
    threshold: f64,
    downscale_factor: u32,
}

impl FrameSampler {
    pub fn new(config: &SamplerConfig) -> Self {
        Self {
            stride: config.stride.max(1),
            threshold: config.scene_threshold,
            downscale_factor: config.downscale_factor.max(1),
        }
    }

    /// Lazily walk a source, yielding keyframes in stream order
    pub fn keyframes(&self, source: Box<dyn FrameSource>) -> Result<KeyFrames> {
        let fps = source.fps();
        if !fps.is_finite() || fps <= 0.0 {
            return Err(IndexerError::unreadable("<stream>", format!("invalid frame rate {}", fps)));
        }

        Ok(KeyFrames {
            source: Some(source),
            detector: SceneDetector::new(self.threshold, self.downscale_factor),
            stride: self.stride,
            fps,
            next_index: 0,
            stats: SamplingStats::default(),
            cancel: None,
        })
    }

    /// Collect every keyframe of a source
    pub fn sample(&self, source: Box<dyn FrameSource>) -> Result<(Vec<KeyFrame>, SamplingStats)> {
        let mut keyframes = self.keyframes(source)?;
        let frames = keyframes.by_ref().collect::<Result<Vec<_>>>()?;
        Ok((frames, keyframes.stats()))
    }
}

impl Default for FrameSampler {
    fn default() -> Self {
        Self::new(&SamplerConfig::default())
    }
}

/// Iterator over the keyframes of one stream. The decoder is released as soon
/// as the stream ends, fails, is cancelled, or the iterator is dropped.
pub struct KeyFrames {
    source: Option<Box<dyn FrameSource>>,
    detector: SceneDetector,
    stride: u64,
    fps: f64,
    next_index: u64,
    stats: SamplingStats,
    cancel: Option<CancellationToken>,
}

impl KeyFrames {
    /// Stop decoding at the next frame once `cancel` fires
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn stats(&self) -> SamplingStats {
        self.stats
    }

    fn release(&mut self) {
        self.source.take();
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().map_or(false, CancellationToken::is_cancelled)
    }
}

impl Iterator for KeyFrames {
    type Item = Result<KeyFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.cancelled() {
                if self.source.is_some() {
                    debug!("🛑 Sampling cancelled after {} frames", self.stats.frames_read);
                }
                self.release();
                return None;
            }

            let frame_number = self.next_index;
            let source = self.source.as_mut()?;

            // Non-candidates are read past without materializing an image
            if frame_number % self.stride != 0 {
                match source.skip_frame() {
                    Ok(true) => {
                        self.next_index += 1;
                        self.stats.frames_read += 1;
                        continue;
                    }
                    Ok(false) => {
                        self.release();
                        return None;
                    }
                    Err(e) => {
                        self.release();
                        return Some(Err(e));
                    }
                }
            }

            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    self.release();
                    return None;
                }
                Err(e) => {
                    self.release();
                    return Some(Err(e));
                }
            };

            self.next_index += 1;
            self.stats.frames_read += 1;
            self.stats.candidates += 1;

            let decision = self.detector.observe(&frame);
            if !decision.is_keyframe {
                continue;
            }

            self.stats.keyframes += 1;
            let timestamp = frame_timestamp(frame_number, self.fps);
            debug!("🖼️  Keyframe {} at {} (score {:?})", frame_number, timestamp, decision.score);

            return Some(Ok(KeyFrame {
                frame_number,
                timestamp,
                pixels: frame,
            }));
        }
    }
}
