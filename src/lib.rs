//! Video Indexer
//!
//! Turns videos into a searchable timeline of what was said and what was shown:
//! keyframes are sampled on scene changes and read for on-screen text, the audio
//! track is transcribed, and every observation lands in a full-text store.

pub mod audio;
pub mod config;
pub mod error;
pub mod metadata;
pub mod ocr;
pub mod processing;
pub mod report;
pub mod sampler;
pub mod store;
pub mod timecode;
pub mod transcription;
pub mod video;

#[cfg(feature = "api")]
pub mod api;

// Re-export main types for easy access
pub use crate::config::{Config, ConfigBuilder};
pub use crate::error::{ErrorKind, Failure, IndexerError, Result};
pub use crate::metadata::{MetadataRecord, Modality, Observation, VideoStats};
pub use crate::ocr::{TesseractRecognizer, TextRecognizer, VisualTextExtractor};
pub use crate::processing::{BatchProcessor, ProcessingResult, ProcessingStatus, VideoIndexer, VideoProcessingResult};
pub use crate::report::ExtractionReport;
pub use crate::sampler::{FrameSampler, FrameSource, KeyFrame, VideoDecoder};
pub use crate::store::MetadataStore;
pub use crate::transcription::{SpeechRecognizer, SpeechTranscriber, TranscriptSegment, WhisperTranscriber};
pub use crate::video::{VideoInfo, VideoProcessor};
