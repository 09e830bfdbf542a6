//! Speech transcription: turns a video's audio track into timestamped
//! speech records.

pub mod whisper;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Result;
use crate::metadata::Observation;
use crate::report::ExtractionReport;
use crate::store::MetadataStore;

pub use whisper::{WhisperBackend, WhisperTranscriber};

/// One recognized stretch of speech
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Start in seconds from the beginning of the video
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
}

impl TranscriptSegment {
    pub fn new(start_time: f64, end_time: f64, text: impl Into<String>) -> Self {
        Self {
            start_time,
            end_time,
            text: text.into(),
        }
    }
}

/// A loaded speech-recognition model
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    fn name(&self) -> &str;

    /// Transcribe a whole video. `work_dir` is scratch space for the
    /// extracted audio.
    async fn transcribe(&self, video_path: &Path, work_dir: &Path) -> Result<Vec<TranscriptSegment>>;
}

/// Writes one speech record per transcript segment
#[derive(Clone)]
pub struct SpeechTranscriber {
    recognizer: Arc<dyn SpeechRecognizer>,
}

impl SpeechTranscriber {
    pub fn new(recognizer: Arc<dyn SpeechRecognizer>) -> Self {
        Self { recognizer }
    }

    pub fn recognizer_name(&self) -> &str {
        self.recognizer.name()
    }

    /// Transcribe `video_path` and append its segments under `video_name`.
    /// A whole-video failure is reported with no records written.
    pub async fn run(
        &self,
        video_name: &str,
        video_path: &Path,
        work_dir: &Path,
        store: &MetadataStore,
        cancel: &CancellationToken,
    ) -> ExtractionReport {
        let segments = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return ExtractionReport { cancelled: true, ..ExtractionReport::default() };
            }
            result = self.recognizer.transcribe(video_path, work_dir) => result,
        };

        let segments = match segments {
            Ok(segments) => segments,
            Err(e) => {
                warn!("🎤 Transcription of {} failed: {}", video_name, e);
                return ExtractionReport::failed(&e);
            }
        };

        let mut report = ExtractionReport::default();
        for segment in segments {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            report.units += 1;
            let text = segment.text.trim();
            if text.is_empty() {
                report.empty_units += 1;
                continue;
            }

            match store.append(video_name, &Observation::speech(segment.start_time, text)).await {
                Ok(()) => report.records_written += 1,
                Err(e) => {
                    warn!("Failed to store segment at {:.1}s of {}: {}", segment.start_time, video_name, e);
                    report.record_write_failure(&e);
                }
            }
        }

        info!("🎤 {}: {} speech records from {} segments", video_name, report.records_written, report.units);
        report
    }
}
