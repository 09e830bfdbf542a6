//! Error taxonomy shared by the sampler, extractors and metadata store.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Result type for indexing operations
pub type Result<T> = std::result::Result<T, IndexerError>;

/// Error types for indexing operations
#[derive(thiserror::Error, Debug)]
pub enum IndexerError {
    #[error("Unreadable video {path}: {reason}")]
    UnreadableVideo { path: PathBuf, reason: String },

    #[error("Failed to initialize {model}: {reason}")]
    ModelInitFailure { model: String, reason: String },

    #[error("Extraction failed for {unit}: {reason}")]
    PerUnitExtractionFailure { unit: String, reason: String },

    #[error("Failed to write metadata record: {0}")]
    StoreWriteFailure(#[source] sqlx::Error),

    #[error("Metadata store is missing or corrupt: {0}")]
    StoreCorrupt(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IndexerError {
    pub fn unreadable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::UnreadableVideo {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn model_init(model: impl Into<String>, reason: impl ToString) -> Self {
        Self::ModelInitFailure {
            model: model.into(),
            reason: reason.to_string(),
        }
    }

    pub fn unit(unit: impl Into<String>, reason: impl ToString) -> Self {
        Self::PerUnitExtractionFailure {
            unit: unit.into(),
            reason: reason.to_string(),
        }
    }

    /// Errors that end processing of the current video rather than a single unit.
    pub fn aborts_video(&self) -> bool {
        matches!(
            self,
            Self::UnreadableVideo { .. } | Self::ModelInitFailure { .. }
        )
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnreadableVideo { .. } => ErrorKind::UnreadableVideo,
            Self::ModelInitFailure { .. } => ErrorKind::ModelInitFailure,
            Self::PerUnitExtractionFailure { .. } => ErrorKind::PerUnitExtractionFailure,
            Self::StoreWriteFailure(_) => ErrorKind::StoreWriteFailure,
            Self::StoreCorrupt(_) => ErrorKind::StoreCorrupt,
            _ => ErrorKind::Other,
        }
    }
}

/// Serializable classification of an [`IndexerError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnreadableVideo,
    ModelInitFailure,
    PerUnitExtractionFailure,
    StoreWriteFailure,
    StoreCorrupt,
    Other,
}

/// An error captured into a processing report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&IndexerError> for Failure {
    fn from(error: &IndexerError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}
