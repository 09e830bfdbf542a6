use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{IndexerError, Result};

/// Video information extracted from file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoInfo {
    pub path: PathBuf,
    pub filename: String,
    pub duration: Duration,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frame_count: Option<u64>,
    pub format: String,
    pub file_size: u64,
    pub has_audio: bool,
}

/// Video probing and discovery using FFmpeg
#[derive(Clone)]
pub struct VideoProcessor {
    /// Supported video extensions
    supported_extensions: Vec<String>,
}

impl VideoProcessor {
    pub fn new() -> Self {
        Self::with_extensions(&[
            "mp4".to_string(),
            "avi".to_string(),
            "mov".to_string(),
            "mkv".to_string(),
            "webm".to_string(),
            "m4v".to_string(),
        ])
    }

    pub fn with_extensions(extensions: &[String]) -> Self {
        Self {
            supported_extensions: extensions.iter().map(|e| e.to_lowercase()).collect(),
        }
    }

    pub fn is_supported(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| self.supported_extensions.contains(&ext.to_lowercase()))
    }

    /// Discover all video files in a directory recursively, sorted by path
    pub fn discover_videos(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut videos = Vec::new();

        for entry in WalkDir::new(dir).follow_links(true) {
            let entry = entry.map_err(|e| {
                IndexerError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
            })?;
            if entry.file_type().is_file() && self.is_supported(entry.path()) {
                videos.push(entry.into_path());
            }
        }

        videos.sort();
        debug!("🔍 Discovered {} videos under {}", videos.len(), dir.display());
        Ok(videos)
    }

    /// Expand a mix of files and directories into video paths
    pub fn expand_inputs(&self, inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let mut videos = Vec::new();

        for input in inputs {
            if input.is_dir() {
                videos.extend(self.discover_videos(input)?);
            } else {
                if !self.is_supported(input) {
                    warn!("Unrecognized video extension, trying anyway: {}", input.display());
                }
                videos.push(input.clone());
            }
        }

        Ok(videos)
    }

    /// Extract video information using ffprobe
    pub async fn get_video_info(&self, video_path: &Path) -> Result<VideoInfo> {
        let output = tokio::process::Command::new("ffprobe")
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(video_path)
            .output()
            .await
            .map_err(|e| IndexerError::unreadable(video_path, format!("failed to run ffprobe: {}", e)))?;

        if !output.status.success() {
            return Err(IndexerError::unreadable(video_path, "ffprobe could not open the file"));
        }

        let ffprobe_data: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| IndexerError::unreadable(video_path, format!("invalid ffprobe output: {}", e)))?;

        let file_size = tokio::fs::metadata(video_path).await?.len();
        let video_info = parse_ffprobe_output(video_path, &ffprobe_data, file_size)?;

        info!("📹 Analyzed video: {} ({}x{}, {:.1}fps, {:.1}s)",
              video_info.filename,
              video_info.width,
              video_info.height,
              video_info.fps,
              video_info.duration.as_secs_f64());

        Ok(video_info)
    }
}

impl Default for VideoProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a [`VideoInfo`] from `ffprobe -print_format json` output
pub fn parse_ffprobe_output(video_path: &Path, ffprobe_data: &serde_json::Value, file_size: u64) -> Result<VideoInfo> {
    let format = &ffprobe_data["format"];
    let streams = ffprobe_data["streams"]
        .as_array()
        .ok_or_else(|| IndexerError::unreadable(video_path, "no streams reported"))?;

    let video_stream = streams
        .iter()
        .find(|s| s["codec_type"] == "video")
        .ok_or_else(|| IndexerError::unreadable(video_path, "no video stream found"))?;

    let has_audio = streams.iter().any(|s| s["codec_type"] == "audio");

    let fps = ["avg_frame_rate", "r_frame_rate"]
        .iter()
        .filter_map(|key| video_stream[*key].as_str().and_then(parse_frame_rate))
        .next()
        .unwrap_or(0.0);

    if fps <= 0.0 {
        return Err(IndexerError::unreadable(video_path, "video stream has no usable frame rate"));
    }

    let coded_width = video_stream["width"].as_u64().unwrap_or(0) as u32;
    let coded_height = video_stream["height"].as_u64().unwrap_or(0) as u32;
    if coded_width == 0 || coded_height == 0 {
        return Err(IndexerError::unreadable(video_path, "video stream has no dimensions"));
    }

    // ffmpeg applies the display rotation while decoding
    let (width, height) = if display_rotation(video_stream) % 180 == 0 {
        (coded_width, coded_height)
    } else {
        (coded_height, coded_width)
    };

    let duration_seconds: f64 = format["duration"]
        .as_str()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0);

    Ok(VideoInfo {
        path: video_path.to_path_buf(),
        filename: video_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default(),
        duration: Duration::from_secs_f64(duration_seconds.max(0.0)),
        width,
        height,
        fps,
        frame_count: video_stream["nb_frames"].as_str().and_then(|s| s.parse().ok()),
        format: format["format_name"]
            .as_str()
            .unwrap_or("unknown")
            .to_string(),
        file_size,
        has_audio,
    })
}

/// Rotation in degrees from the display matrix side data, or the legacy
/// `rotate` tag
fn display_rotation(stream: &serde_json::Value) -> i64 {
    let side_data = stream["side_data_list"]
        .as_array()
        .into_iter()
        .flatten()
        .find_map(|entry| entry["rotation"].as_f64().or_else(|| entry["rotation"].as_str()?.parse().ok()));
    let tag = || stream["tags"]["rotate"].as_str().and_then(|r| r.parse::<f64>().ok());

    side_data.or_else(tag).map_or(0, |degrees| degrees.round() as i64)
}

/// Parse `30000/1001` or `25` style frame rates
fn parse_frame_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.parse().ok()?,
    };

    (value.is_finite() && value > 0.0).then_some(value)
}
