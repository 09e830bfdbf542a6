//! `HH:MM:SS` timestamps shared by every record producer and the viewers that
//! seek with `h, m, s = timestamp.split(':')`.

use crate::error::{IndexerError, Result};

/// Format seconds as `HH:MM:SS`, truncating any fractional part.
pub fn format_timestamp(seconds: f64) -> String {
    let total_seconds = if seconds.is_finite() && seconds > 0.0 {
        seconds.trunc() as u64
    } else {
        0
    };
    format_whole_seconds(total_seconds)
}

/// Format whole seconds as `HH:MM:SS`. Hours grow past two digits when needed.
pub fn format_whole_seconds(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// Timestamp of a frame in the original stream.
pub fn frame_timestamp(frame_number: u64, fps: f64) -> String {
    format_timestamp(frame_number as f64 / fps)
}

/// Parse `HH:MM:SS` back to whole seconds.
pub fn parse_timestamp(timestamp: &str) -> Result<u64> {
    let parts: Vec<&str> = timestamp.trim().split(':').collect();
    if parts.len() != 3 {
        return Err(IndexerError::InvalidTimestamp(timestamp.to_string()));
    }

    let parse = |part: &str| -> Result<u64> {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(IndexerError::InvalidTimestamp(timestamp.to_string()));
        }
        part.parse::<u64>()
            .map_err(|_| IndexerError::InvalidTimestamp(timestamp.to_string()))
    };

    let hours = parse(parts[0])?;
    let minutes = parse(parts[1])?;
    let seconds = parse(parts[2])?;

    if minutes >= 60 || seconds >= 60 {
        return Err(IndexerError::InvalidTimestamp(timestamp.to_string()));
    }

    Ok(hours * 3600 + minutes * 60 + seconds)
}

/// Accept either `HH:MM:SS` or plain (possibly fractional) seconds.
pub fn parse_time_query(input: &str) -> Result<f64> {
    if input.contains(':') {
        return parse_timestamp(input).map(|s| s as f64);
    }

    input
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s >= 0.0)
        .ok_or_else(|| IndexerError::InvalidTimestamp(input.to_string()))
}
