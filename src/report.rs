use serde::{Deserialize, Serialize};

use crate::error::{Failure, IndexerError};

/// What one extractor did for one video
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionReport {
    /// Keyframes or speech segments handed to the extractor
    pub units: usize,
    /// Units that produced a stored record
    pub records_written: usize,
    /// Units with nothing to say (no text on screen, silent segment)
    pub empty_units: usize,
    /// Units skipped after an extraction error
    pub unit_failures: Vec<Failure>,
    /// Records lost to store write errors
    pub write_failures: Vec<Failure>,
    /// Set when the extractor gave up on the whole video
    pub failure: Option<Failure>,
    pub cancelled: bool,
}

impl ExtractionReport {
    pub fn failed(error: &IndexerError) -> Self {
        Self {
            failure: Some(Failure::from(error)),
            ..Self::default()
        }
    }

    pub fn record_unit_failure(&mut self, error: &IndexerError) {
        self.unit_failures.push(Failure::from(error));
    }

    pub fn record_write_failure(&mut self, error: &IndexerError) {
        self.write_failures.push(Failure::from(error));
    }

    /// True when the extractor ran to the end of its input
    pub fn completed(&self) -> bool {
        self.failure.is_none() && !self.cancelled
    }

    pub fn error_count(&self) -> usize {
        self.unit_failures.len() + self.write_failures.len() + usize::from(self.failure.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_failed_report() {
        let report = ExtractionReport::failed(&IndexerError::unit("audio track of a.mp4", "no audio"));
        assert!(!report.completed());
        assert_eq!(report.records_written, 0);
        assert_eq!(report.failure.as_ref().map(|f| f.kind), Some(ErrorKind::PerUnitExtractionFailure));
        assert_eq!(report.error_count(), 1);
    }

    #[test]
    fn test_unit_failures_do_not_fail_report() {
        let mut report = ExtractionReport::default();
        report.record_unit_failure(&IndexerError::unit("frame 15", "garbled"));
        report.record_write_failure(&IndexerError::StoreCorrupt("locked".into()));

        assert!(report.completed());
        assert_eq!(report.error_count(), 2);
    }
}
