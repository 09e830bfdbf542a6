use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for the video indexer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Keyframe sampling settings
    pub sampler: SamplerConfig,

    /// On-screen text recognition settings
    pub ocr: OcrConfig,

    /// Speech transcription settings
    pub transcription: TranscriptionConfig,

    /// Audio extraction settings
    pub audio: AudioConfig,

    /// Metadata store settings
    pub storage: StorageConfig,

    /// Batch processing settings
    pub processing: ProcessingConfig,

    /// Logging settings
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Only every Nth decoded frame is a scene-change candidate
    pub stride: u64,

    /// Mean absolute grayscale difference (0-255) above which a candidate is a keyframe
    pub scene_threshold: f64,

    /// Candidates are compared at 1/N linear resolution
    pub downscale_factor: u32,

    /// Keyframes buffered between the sampler and text recognition
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    /// Tesseract executable
    pub command: String,

    /// Tesseract language pack
    pub language: String,

    /// Tesseract page segmentation mode
    pub page_segmentation_mode: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Whisper model name
    pub model: String,

    /// Directory searched for ggml model files (whisper.cpp)
    pub model_dir: PathBuf,

    /// Language hint for transcription
    pub language: Option<String>,

    /// Timeout for a whole-video transcription (seconds)
    pub timeout: u32,

    /// Threads handed to whisper.cpp
    pub threads: u32,

    /// Enable GPU acceleration for Whisper
    pub use_gpu: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Target sample rate for transcription
    pub target_sample_rate: u32,

    /// Remove extracted audio after transcription
    pub cleanup_temp_files: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file
    pub database_path: PathBuf,

    /// Pooled connections
    pub max_connections: u32,

    /// Busy timeout for contended writes (seconds)
    pub busy_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Supported video file extensions
    pub supported_extensions: Vec<String>,

    /// Maximum number of videos processed concurrently
    pub max_workers: usize,

    /// Reset the store before every batch
    pub reset_before_processing: bool,

    /// Scratch directory for extracted audio and spooled uploads
    pub work_dir: PathBuf,

    /// Write a JSON summary of each batch here
    pub summary_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Log level
    pub log_level: String,
}

impl Config {
    /// Load configuration from the first config file found, falling back to env
    pub fn load() -> Result<Self> {
        let config_paths = ["video-indexer.toml", "config/video-indexer.toml"];

        for path in &config_paths {
            if Path::new(path).exists() {
                match Self::from_file(Path::new(path)) {
                    Ok(config) => return Ok(config),
                    Err(e) => tracing::warn!("Failed to parse config file {}: {}", path, e),
                }
            }
        }

        Self::from_env()
    }

    /// Load configuration from a specific TOML file, then apply env overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config {}: {}", path.display(), e))?;
        let config: Config = toml::from_str(&config_str)?;
        tracing::info!("📄 Loaded configuration from: {}", path.display());
        Ok(config.with_env_overrides())
    }

    /// Defaults with environment variable overrides
    pub fn from_env() -> Result<Self> {
        Ok(Self::default().with_env_overrides())
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(database) = std::env::var("VIDEO_INDEXER_DATABASE") {
            self.storage.database_path = PathBuf::from(database);
        }

        if let Ok(workers) = std::env::var("VIDEO_INDEXER_WORKERS") {
            self.processing.max_workers = workers.parse().unwrap_or(self.processing.max_workers);
        }

        if let Ok(log_level) = std::env::var("VIDEO_INDEXER_LOG_LEVEL") {
            self.output.log_level = log_level;
        }

        if let Ok(command) = std::env::var("VIDEO_INDEXER_OCR_COMMAND") {
            self.ocr.command = command;
        }

        if let Ok(model) = std::env::var("VIDEO_INDEXER_WHISPER_MODEL") {
            self.transcription.model = model;
        }

        self
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let config_str = toml::to_string_pretty(self)?;
        std::fs::write(path, config_str)?;
        tracing::info!("💾 Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.sampler.stride == 0 {
            return Err(anyhow!("sampler.stride must be greater than 0"));
        }

        if self.sampler.downscale_factor == 0 {
            return Err(anyhow!("sampler.downscale_factor must be greater than 0"));
        }

        if !(0.0..=255.0).contains(&self.sampler.scene_threshold) {
            return Err(anyhow!("sampler.scene_threshold must be within 0-255"));
        }

        if self.sampler.channel_capacity == 0 {
            return Err(anyhow!("sampler.channel_capacity must be greater than 0"));
        }

        if self.processing.max_workers == 0 {
            return Err(anyhow!("processing.max_workers must be greater than 0"));
        }

        if self.storage.max_connections == 0 {
            return Err(anyhow!("storage.max_connections must be greater than 0"));
        }

        if self.audio.target_sample_rate == 0 {
            return Err(anyhow!("audio.target_sample_rate must be greater than 0"));
        }

        tracing::debug!("✅ Configuration validation passed");
        Ok(())
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Video Indexer Configuration:\n\
            - Database: {}\n\
            - Workers: {}\n\
            - Sampling: every {} frames, threshold {:.1}, 1/{} scale\n\
            - OCR: {} ({})\n\
            - Whisper model: {}\n\
            - Supported Extensions: {}",
            self.storage.database_path.display(),
            self.processing.max_workers,
            self.sampler.stride,
            self.sampler.scene_threshold,
            self.sampler.downscale_factor,
            self.ocr.command,
            self.ocr.language,
            self.transcription.model,
            self.processing.supported_extensions.join(", "),
        )
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            stride: 15,
            scene_threshold: 20.0,
            downscale_factor: 4,
            channel_capacity: 8,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sampler: SamplerConfig::default(),
            ocr: OcrConfig {
                command: "tesseract".to_string(),
                language: "eng".to_string(),
                page_segmentation_mode: 3,
            },
            transcription: TranscriptionConfig {
                model: "base".to_string(),
                model_dir: PathBuf::from("models"),
                language: None,
                timeout: 3600, // 60 minutes for large files
                threads: 4,
                use_gpu: false,
            },
            audio: AudioConfig {
                target_sample_rate: 16000, // Optimal for Whisper
                cleanup_temp_files: true,
            },
            storage: StorageConfig {
                database_path: PathBuf::from("data/video_metadata.db"),
                max_connections: 4,
                busy_timeout: 30,
            },
            processing: ProcessingConfig {
                supported_extensions: vec![
                    "mp4".to_string(),
                    "avi".to_string(),
                    "mov".to_string(),
                    "mkv".to_string(),
                    "webm".to_string(),
                    "m4v".to_string(),
                ],
                max_workers: num_cpus::get().min(4),
                reset_before_processing: false,
                work_dir: std::env::temp_dir().join("video-indexer"),
                summary_path: None,
            },
            output: OutputConfig {
                log_level: "info".to_string(),
            },
        }
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_database(mut self, path: PathBuf) -> Self {
        self.config.storage.database_path = path;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.config.processing.max_workers = workers;
        self
    }

    pub fn with_stride(mut self, stride: u64) -> Self {
        self.config.sampler.stride = stride;
        self
    }

    pub fn with_scene_threshold(mut self, threshold: f64) -> Self {
        self.config.sampler.scene_threshold = threshold;
        self
    }

    pub fn with_work_dir(mut self, dir: PathBuf) -> Self {
        self.config.processing.work_dir = dir;
        self
    }

    pub fn with_whisper_model(mut self, model: impl Into<String>) -> Self {
        self.config.transcription.model = model.into();
        self
    }

    pub fn reset_before_processing(mut self, reset: bool) -> Self {
        self.config.processing.reset_before_processing = reset;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
