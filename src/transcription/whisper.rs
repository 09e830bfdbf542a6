use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use super::{SpeechRecognizer, TranscriptSegment};
use crate::audio::AudioExtractor;
use crate::config::{AudioConfig, TranscriptionConfig};
use crate::error::{IndexerError, Result};

/// Installed Whisper implementation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WhisperBackend {
    /// whisper.cpp under the given executable name, with a ggml model file
    Cpp { command: String, model_path: PathBuf },
    /// OpenAI's Python `whisper` CLI
    Python,
}

impl WhisperBackend {
    fn name(&self) -> &str {
        match self {
            Self::Cpp { command, .. } => command,
            Self::Python => "whisper",
        }
    }
}

/// Whisper speech recognizer driven through its command-line tools
#[derive(Debug, Clone)]
pub struct WhisperTranscriber {
    config: TranscriptionConfig,
    audio: AudioExtractor,
    backend: WhisperBackend,
    keep_audio: bool,
}

impl WhisperTranscriber {
    /// Detect a backend and resolve the model once, up front
    pub async fn load(config: &TranscriptionConfig, audio: &AudioConfig) -> Result<Self> {
        let backend = Self::detect_backend(config).await?;
        info!("🎤 Whisper ready: {} ({} model)", backend.name(), config.model);

        Ok(Self::with_backend(config.clone(), audio, backend))
    }

    pub fn with_backend(config: TranscriptionConfig, audio: &AudioConfig, backend: WhisperBackend) -> Self {
        Self {
            config,
            audio: AudioExtractor::from_config(audio),
            backend,
            keep_audio: !audio.cleanup_temp_files,
        }
    }

    pub fn backend(&self) -> &WhisperBackend {
        &self.backend
    }

    /// Try whisper.cpp first, then the Python implementation
    async fn detect_backend(config: &TranscriptionConfig) -> Result<WhisperBackend> {
        let model_path = config.model_dir.join(format!("ggml-{}.bin", config.model));

        for command in ["whisper-cli", "whisper-cpp"] {
            debug!("🔍 Checking for {} command...", command);
            if !check_command_available(command).await {
                continue;
            }
            if model_path.exists() {
                return Ok(WhisperBackend::Cpp {
                    command: command.to_string(),
                    model_path,
                });
            }
            warn!("Found {} but no model at {}", command, model_path.display());
        }

        if check_command_available("whisper").await {
            return Ok(WhisperBackend::Python);
        }

        error!("❌ No Whisper backend found!");
        Err(IndexerError::model_init(
            format!("whisper {}", config.model),
            format!(
                "no usable backend: install whisper.cpp with {} or openai-whisper",
                model_path.display()
            ),
        ))
    }

    fn build_command(&self, audio_path: &Path, output_dir: &Path) -> Command {
        match &self.backend {
            WhisperBackend::Cpp { command, model_path } => {
                let stem = audio_path.file_stem().unwrap_or_default().to_string_lossy().to_string();
                let mut cmd = Command::new(command);
                cmd.arg("-f").arg(audio_path)
                    .arg("-m").arg(model_path)
                    .arg("-oj") // JSON output
                    .arg("-of").arg(output_dir.join(stem))
                    .arg("-t").arg(self.config.threads.max(1).to_string());
                if let Some(language) = &self.config.language {
                    cmd.arg("-l").arg(language);
                }
                if !self.config.use_gpu {
                    cmd.arg("-ng");
                }
                cmd
            }
            WhisperBackend::Python => {
                let mut cmd = Command::new("whisper");
                cmd.arg(audio_path)
                    .arg("--model").arg(&self.config.model)
                    .arg("--output_dir").arg(output_dir)
                    .arg("--output_format").arg("json")
                    .arg("--verbose").arg("False")
                    .arg("--fp16").arg("False");
                if let Some(language) = &self.config.language {
                    cmd.arg("--language").arg(language);
                }
                if !self.config.use_gpu {
                    cmd.arg("--device").arg("cpu");
                }
                cmd
            }
        }
    }

    /// Run the backend under the configured timeout and parse its JSON output
    async fn run_backend(&self, unit: &str, audio_path: &Path, output_dir: &Path) -> Result<WhisperOutput> {
        let backend_name = self.backend.name().to_string();
        let timeout_duration = Duration::from_secs(self.config.timeout as u64);
        let start_time = Instant::now();

        let mut cmd = self.build_command(audio_path, output_dir);
        cmd.stdout(Stdio::null()).stderr(Stdio::piped()).kill_on_drop(true);
        debug!("Executing command: {:?}", cmd);

        let mut child = cmd
            .spawn()
            .map_err(|e| IndexerError::unit(unit, format!("failed to spawn {}: {}", backend_name, e)))?;

        let mut stderr_lines = child.stderr.take().map(|stderr| BufReader::new(stderr).lines());

        let waited = tokio::time::timeout(timeout_duration, async {
            loop {
                tokio::select! {
                    line = async { stderr_lines.as_mut()?.next_line().await.ok().flatten() }, if stderr_lines.is_some() => {
                        match line {
                            Some(line) if !line.trim().is_empty() => debug!("Whisper: {}", line.trim()),
                            Some(_) => {}
                            None => stderr_lines = None,
                        }
                    }
                    status = child.wait() => return status,
                }
            }
        })
        .await;

        let status = match waited {
            Ok(status) => status?,
            Err(_) => {
                error!("⏰ {} timed out after {:.1}s", backend_name, start_time.elapsed().as_secs_f64());
                let _ = child.kill().await;
                return Err(IndexerError::unit(
                    unit,
                    format!("{} timed out after {} seconds", backend_name, self.config.timeout),
                ));
            }
        };

        if !status.success() {
            return Err(IndexerError::unit(unit, format!("{} exited with {}", backend_name, status)));
        }
        info!("✅ {} finished in {:.1}s", backend_name, start_time.elapsed().as_secs_f64());

        let json_path = find_json_output(output_dir)
            .await?
            .ok_or_else(|| IndexerError::unit(unit, format!("no {} JSON output found", backend_name)))?;
        let json_content = tokio::fs::read_to_string(&json_path).await?;

        serde_json::from_str::<WhisperOutput>(&json_content)
            .map_err(|e| IndexerError::unit(unit, format!("failed to parse {} output: {}", backend_name, e)))
    }
}

#[async_trait]
impl SpeechRecognizer for WhisperTranscriber {
    fn name(&self) -> &str {
        self.backend.name()
    }

    async fn transcribe(&self, video_path: &Path, work_dir: &Path) -> Result<Vec<TranscriptSegment>> {
        let unit = format!("audio track of {}", video_path.display());
        tokio::fs::create_dir_all(work_dir).await?;
        let scratch = tempfile::Builder::new().prefix("whisper-").tempdir_in(work_dir)?;

        let audio = self.audio.extract_for_transcription(video_path, scratch.path()).await?;
        info!("🎤 Transcribing {} ({:.1}s of audio)", video_path.display(), audio.duration.as_secs_f64());

        let output = self.run_backend(&unit, &audio.path, scratch.path()).await;

        if self.keep_audio {
            let kept = scratch.into_path();
            debug!("Keeping transcription scratch files in {}", kept.display());
        }

        let segments = output?.into_segments();
        info!("🎤 {} segments from {}", segments.len(), video_path.display());
        Ok(segments)
    }
}

/// Check if a command is available
async fn check_command_available(cmd_name: &str) -> bool {
    Command::new(cmd_name)
        .arg("--help")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

async fn find_json_output(dir: &Path) -> Result<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().map_or(false, |ext| ext == "json") {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

/// Parse whisper.cpp `HH:MM:SS,mmm` timestamps to seconds
fn parse_cpp_timestamp(timestamp: &str) -> Option<f64> {
    let (time, millis) = timestamp.split_once(',')?;
    let millis: f64 = millis.parse().ok()?;
    let mut parts = time.split(':').map(|p| p.parse::<f64>());
    let hours = parts.next()?.ok()?;
    let minutes = parts.next()?.ok()?;
    let seconds = parts.next()?.ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds + millis / 1000.0)
}

/// The JSON shapes written by whisper.cpp and the Python CLI
#[derive(Debug, Clone, Default, Deserialize)]
struct WhisperOutput {
    #[serde(default)]
    segments: Vec<WhisperSegment>,
    #[serde(default)]
    transcription: Vec<CppSegment>,
    #[serde(default)]
    result: Option<WhisperResult>,
}

#[derive(Debug, Clone, Deserialize)]
struct WhisperResult {
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Clone, Deserialize)]
struct WhisperSegment {
    start: f64,
    end: f64,
    text: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CppSegment {
    #[serde(default)]
    timestamps: Option<CppTimestamps>,
    #[serde(default)]
    offsets: Option<CppOffsets>,
    text: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CppTimestamps {
    from: String,
    to: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CppOffsets {
    from: u64,
    to: u64,
}

impl CppSegment {
    fn bounds(&self) -> (f64, f64) {
        if let Some(offsets) = &self.offsets {
            return (offsets.from as f64 / 1000.0, offsets.to as f64 / 1000.0);
        }
        let parse = |t: Option<&String>| t.and_then(|t| parse_cpp_timestamp(t)).unwrap_or(0.0);
        (
            parse(self.timestamps.as_ref().map(|t| &t.from)),
            parse(self.timestamps.as_ref().map(|t| &t.to)),
        )
    }
}

impl WhisperOutput {
    fn into_segments(self) -> Vec<TranscriptSegment> {
        if !self.transcription.is_empty() {
            return self
                .transcription
                .into_iter()
                .map(|seg| {
                    let (start, end) = seg.bounds();
                    TranscriptSegment::new(start, end, seg.text)
                })
                .collect();
        }

        let segments = match self.result {
            Some(result) if !result.segments.is_empty() => result.segments,
            _ => self.segments,
        };

        segments
            .into_iter()
            .map(|seg| TranscriptSegment::new(seg.start, seg.end, seg.text))
            .collect()
    }
}
