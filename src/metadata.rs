use serde::{Deserialize, Serialize};

use crate::timecode::{format_timestamp, parse_timestamp};

/// Text read off a keyframe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameObservation {
    /// Index in the original (non-decimated) frame stream
    pub frame_number: u64,
    /// `HH:MM:SS`, copied verbatim from the keyframe
    pub timestamp: String,
    pub ocr_text: String,
}

/// One transcribed speech segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechObservation {
    /// Segment start in seconds
    pub start_time: f64,
    pub transcription: String,
}

/// Everything a producer can append to the store. Each variant carries exactly
/// one text payload; the nullable six-column row only exists at the storage
/// boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Observation {
    Frame(FrameObservation),
    Speech(SpeechObservation),
}

impl Observation {
    pub fn frame(frame_number: u64, timestamp: impl Into<String>, ocr_text: impl Into<String>) -> Self {
        Self::Frame(FrameObservation {
            frame_number,
            timestamp: timestamp.into(),
            ocr_text: ocr_text.into(),
        })
    }

    pub fn speech(start_time: f64, transcription: impl Into<String>) -> Self {
        Self::Speech(SpeechObservation {
            start_time,
            transcription: transcription.into(),
        })
    }

    pub fn timestamp(&self) -> String {
        match self {
            Self::Frame(frame) => frame.timestamp.clone(),
            Self::Speech(speech) => format_timestamp(speech.start_time),
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Frame(frame) => &frame.ocr_text,
            Self::Speech(speech) => &speech.transcription,
        }
    }
}

/// Which extractor produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Visual,
    Speech,
    Unknown,
}

/// Persisted row of the `video_metadata` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MetadataRecord {
    pub video_name: String,
    pub frame_number: Option<String>,
    pub timestamp: String,
    pub transcription: Option<String>,
    pub ocr_text: Option<String>,
    pub objects_detected: Option<String>,
}

impl MetadataRecord {
    pub fn from_observation(video_name: &str, observation: &Observation) -> Self {
        match observation {
            Observation::Frame(frame) => Self {
                video_name: video_name.to_string(),
                frame_number: Some(frame.frame_number.to_string()),
                timestamp: frame.timestamp.clone(),
                transcription: None,
                ocr_text: Some(frame.ocr_text.clone()),
                objects_detected: None,
            },
            Observation::Speech(speech) => Self {
                video_name: video_name.to_string(),
                frame_number: None,
                timestamp: format_timestamp(speech.start_time),
                transcription: Some(speech.transcription.clone()),
                ocr_text: None,
                objects_detected: None,
            },
        }
    }

    /// Whole seconds of the stored `HH:MM:SS` timestamp
    pub fn seconds(&self) -> Option<u64> {
        parse_timestamp(&self.timestamp).ok()
    }

    pub fn modality(&self) -> Modality {
        match (&self.ocr_text, &self.transcription) {
            (Some(_), None) => Modality::Visual,
            (None, Some(_)) => Modality::Speech,
            _ => Modality::Unknown,
        }
    }

    /// The text payload, OCR first
    pub fn text(&self) -> Option<&str> {
        self.ocr_text
            .as_deref()
            .or(self.transcription.as_deref())
    }

    /// Case-insensitive (ASCII) containment over both text columns, matching
    /// the store's `LIKE` semantics.
    pub fn matches(&self, query: &str) -> bool {
        let needle = query.to_ascii_lowercase();
        [&self.transcription, &self.ocr_text]
            .into_iter()
            .flatten()
            .any(|text| text.to_ascii_lowercase().contains(&needle))
    }
}

/// Per-video record counts for viewers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoStats {
    pub video_name: String,
    pub total_records: usize,
    pub transcription_records: usize,
    pub ocr_records: usize,
    pub first_timestamp: Option<String>,
    pub last_timestamp: Option<String>,
}
