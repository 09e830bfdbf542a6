use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::AudioConfig;
use crate::error::{IndexerError, Result};

/// Audio track prepared for transcription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioInfo {
    pub path: PathBuf,
    pub duration: Duration,
    pub sample_rate: u32,
    pub channels: u32,
    pub file_size: u64,
}

/// Pulls the audio track out of a video as mono PCM for Whisper
#[derive(Debug, Clone)]
pub struct AudioExtractor {
    /// Sample rate of the extracted track (Whisper expects 16kHz)
    pub target_sample_rate: u32,
}

impl AudioExtractor {
    pub fn new() -> Self {
        Self {
            target_sample_rate: 16000,
        }
    }

    pub fn from_config(config: &AudioConfig) -> Self {
        Self {
            target_sample_rate: config.target_sample_rate,
        }
    }

    /// Extract the audio track as 16-bit mono WAV into `output_dir`
    pub async fn extract_for_transcription(
        &self,
        video_path: &Path,
        output_dir: &Path,
    ) -> Result<AudioInfo> {
        let unit = audio_unit(video_path);
        let stem = video_path
            .file_stem()
            .ok_or_else(|| IndexerError::unit(&unit, "video path has no file name"))?
            .to_string_lossy();

        let audio_path = output_dir.join(format!("{}.wav", stem));
        tokio::fs::create_dir_all(output_dir).await?;

        info!("🎵 Extracting audio for transcription: {}", video_path.display());

        let output = tokio::process::Command::new("ffmpeg")
            .args(["-nostdin", "-v", "error", "-i"])
            .arg(video_path)
            .args([
                "-vn",                 // No video stream
                "-acodec", "pcm_s16le", // 16-bit PCM
                "-ar", &self.target_sample_rate.to_string(),
                "-ac", "1",            // Mono
                "-f", "wav",
                "-y",
            ])
            .arg(&audio_path)
            .output()
            .await
            .map_err(|e| IndexerError::unit(&unit, format!("failed to run ffmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(IndexerError::unit(
                &unit,
                format!("audio extraction failed: {}", stderr.trim()),
            ));
        }

        let audio_info = self.get_audio_info(&audio_path).await?;

        info!("✅ Audio extracted: {} ({:.1}s, {}Hz)",
              audio_info.path.display(),
              audio_info.duration.as_secs_f64(),
              audio_info.sample_rate);

        Ok(audio_info)
    }

    /// Inspect an extracted audio file
    pub async fn get_audio_info(&self, audio_path: &Path) -> Result<AudioInfo> {
        let unit = audio_unit(audio_path);
        let output = tokio::process::Command::new("ffprobe")
            .args([
                "-v", "quiet",
                "-print_format", "json",
                "-show_format",
                "-show_streams",
                "-select_streams", "a:0",
            ])
            .arg(audio_path)
            .output()
            .await
            .map_err(|e| IndexerError::unit(&unit, format!("failed to run ffprobe: {}", e)))?;

        if !output.status.success() {
            return Err(IndexerError::unit(&unit, "ffprobe could not read the audio"));
        }

        let ffprobe_data: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| IndexerError::unit(&unit, format!("invalid ffprobe output: {}", e)))?;
        let file_size = tokio::fs::metadata(audio_path).await?.len();

        parse_audio_probe(audio_path, &ffprobe_data, file_size, self.target_sample_rate)
    }
}

impl Default for AudioExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn audio_unit(path: &Path) -> String {
    format!("audio track of {}", path.display())
}

fn parse_audio_probe(
    audio_path: &Path,
    ffprobe_data: &serde_json::Value,
    file_size: u64,
    default_rate: u32,
) -> Result<AudioInfo> {
    let audio_stream = ffprobe_data["streams"]
        .as_array()
        .and_then(|streams| streams.first())
        .ok_or_else(|| IndexerError::unit(audio_unit(audio_path), "no audio stream found"))?;

    let duration_seconds: f64 = ffprobe_data["format"]["duration"]
        .as_str()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0);

    debug!("Audio stream: {}", audio_stream);

    Ok(AudioInfo {
        path: audio_path.to_path_buf(),
        duration: Duration::from_secs_f64(duration_seconds.max(0.0)),
        sample_rate: audio_stream["sample_rate"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .unwrap_or(default_rate),
        channels: audio_stream["channels"].as_u64().unwrap_or(1) as u32,
        file_size,
    })
}
