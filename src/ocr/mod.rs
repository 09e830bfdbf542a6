//! On-screen text extraction from keyframes.

pub mod tesseract;

use image::RgbImage;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{IndexerError, Result};
use crate::metadata::Observation;
use crate::report::ExtractionReport;
use crate::sampler::KeyFrame;
use crate::store::MetadataStore;

pub use tesseract::TesseractRecognizer;

/// A loaded text-recognition model
pub trait TextRecognizer: Send + Sync {
    fn name(&self) -> &str;

    /// Recognized text spans in reading order
    fn recognize(&self, image: &RgbImage) -> Result<Vec<String>>;
}

/// Join recognized spans with single spaces, dropping blank ones
pub fn join_spans<S: AsRef<str>>(spans: &[S]) -> String {
    spans
        .iter()
        .map(|s| s.as_ref().trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Writes one visual record per keyframe that has text on it
#[derive(Clone)]
pub struct VisualTextExtractor {
    recognizer: Arc<dyn TextRecognizer>,
}

impl VisualTextExtractor {
    pub fn new(recognizer: Arc<dyn TextRecognizer>) -> Self {
        Self { recognizer }
    }

    pub fn recognizer_name(&self) -> &str {
        self.recognizer.name()
    }

    /// Recognize one keyframe. `None` when the frame carries no text.
    pub fn read_frame(&self, frame: &KeyFrame) -> Result<Option<Observation>> {
        let spans = self.recognizer.recognize(&frame.pixels).map_err(|e| match e {
            IndexerError::PerUnitExtractionFailure { reason, .. } => {
                IndexerError::unit(format!("frame {}", frame.frame_number), reason)
            }
            other => other,
        })?;

        let text = join_spans(&spans);
        if text.is_empty() {
            return Ok(None);
        }
        Ok(Some(Observation::frame(frame.frame_number, frame.timestamp.clone(), text)))
    }

    /// Drain keyframes from the sampler, appending a record for each frame
    /// with text. Stops early on cancellation or a model failure; dropping
    /// the receiver then stops the sampler.
    pub async fn run(
        &self,
        video_name: &str,
        mut frames: mpsc::Receiver<KeyFrame>,
        store: &MetadataStore,
        cancel: &CancellationToken,
    ) -> ExtractionReport {
        let mut report = ExtractionReport::default();

        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                frame = frames.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };

            report.units += 1;
            let frame_number = frame.frame_number;
            let extractor = self.clone();
            let recognized = tokio::task::spawn_blocking(move || extractor.read_frame(&frame)).await;

            let observation = match recognized {
                Ok(Ok(Some(observation))) => observation,
                Ok(Ok(None)) => {
                    report.empty_units += 1;
                    continue;
                }
                Ok(Err(e)) if e.aborts_video() => {
                    warn!("🔤 Text recognition for {} stopped: {}", video_name, e);
                    report.failure = Some((&e).into());
                    break;
                }
                Ok(Err(e)) => {
                    warn!("Skipping frame {} of {}: {}", frame_number, video_name, e);
                    report.record_unit_failure(&e);
                    continue;
                }
                Err(join_error) => {
                    let e = IndexerError::unit(format!("frame {}", frame_number), join_error);
                    warn!("Skipping frame {} of {}: {}", frame_number, video_name, e);
                    report.record_unit_failure(&e);
                    continue;
                }
            };

            match store.append(video_name, &observation).await {
                Ok(()) => {
                    report.records_written += 1;
                    debug!("🔤 {} @ {}: {}", video_name, observation.timestamp(), observation.text());
                }
                Err(e) => {
                    warn!("Failed to store frame {} of {}: {}", frame_number, video_name, e);
                    report.record_write_failure(&e);
                }
            }
        }

        info!("🔤 {}: {} visual records from {} keyframes", video_name, report.records_written, report.units);
        report
    }
}
