use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{ErrorKind, IndexerError, Result};
use crate::metadata::{MetadataRecord, VideoStats};
use crate::ocr::{TesseractRecognizer, TextRecognizer, VisualTextExtractor};
use crate::report::ExtractionReport;
use crate::sampler::{FfmpegDecoder, FrameSampler, SamplingStats, VideoDecoder};
use crate::store::MetadataStore;
use crate::transcription::{SpeechRecognizer, SpeechTranscriber, WhisperTranscriber};
use crate::video::{VideoInfo, VideoProcessor};

/// Outcome of processing one video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingStatus {
    /// Both extractors ran to the end of the video
    Completed,
    /// One extractor failed for the whole video; the other's records stand
    Partial,
    /// The video could not be read or a model could not be used
    Failed,
    /// Stopped between units; records written so far stay
    Cancelled,
}

/// Processing result for a single video
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoProcessingResult {
    pub video_name: String,
    pub path: PathBuf,
    pub video_info: Option<VideoInfo>,
    pub status: ProcessingStatus,
    pub sampling: SamplingStats,
    pub visual: ExtractionReport,
    pub speech: ExtractionReport,
    pub error_message: Option<String>,
    pub processing_time: Duration,
}

impl VideoProcessingResult {
    fn failed(video_name: &str, path: &Path, error: &IndexerError, started: Instant) -> Self {
        Self {
            video_name: video_name.to_string(),
            path: path.to_path_buf(),
            video_info: None,
            status: ProcessingStatus::Failed,
            sampling: SamplingStats::default(),
            visual: ExtractionReport::default(),
            speech: ExtractionReport::default(),
            error_message: Some(error.to_string()),
            processing_time: started.elapsed(),
        }
    }

    pub fn records_written(&self) -> usize {
        self.visual.records_written + self.speech.records_written
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, ProcessingStatus::Completed | ProcessingStatus::Partial)
    }
}

/// Overall batch processing results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub total_records: usize,
    pub total_time: Duration,
    pub results: Vec<VideoProcessingResult>,
}

impl ProcessingResult {
    fn from_results(results: Vec<VideoProcessingResult>, total_time: Duration) -> Self {
        let successful = results.iter().filter(|r| r.is_success()).count();
        Self {
            total: results.len(),
            successful,
            failed: results.len() - successful,
            total_records: results.iter().map(|r| r.records_written()).sum(),
            total_time,
            results,
        }
    }

    /// Write the summary as pretty JSON
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json_data = serde_json::to_string_pretty(self)
            .map_err(|e| IndexerError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        tokio::fs::write(path, json_data).await?;
        info!("💾 Results saved to: {}", path.display());
        Ok(())
    }
}

fn aborts_video(report: &ExtractionReport) -> bool {
    report
        .failure
        .as_ref()
        .map_or(false, |f| matches!(f.kind, ErrorKind::UnreadableVideo | ErrorKind::ModelInitFailure))
}

/// Indexes videos into the metadata store and answers queries over it.
///
/// Models and the store are loaded once and shared by every video.
#[derive(Clone)]
pub struct VideoIndexer {
    config: Arc<Config>,
    store: MetadataStore,
    decoder: Arc<dyn VideoDecoder>,
    sampler: FrameSampler,
    visual: VisualTextExtractor,
    speech: SpeechTranscriber,
}

impl VideoIndexer {
    pub fn new(
        config: Config,
        store: MetadataStore,
        decoder: Arc<dyn VideoDecoder>,
        recognizer: Arc<dyn TextRecognizer>,
        speech: Arc<dyn SpeechRecognizer>,
    ) -> Self {
        Self {
            sampler: FrameSampler::new(&config.sampler),
            config: Arc::new(config),
            store,
            decoder,
            visual: VisualTextExtractor::new(recognizer),
            speech: SpeechTranscriber::new(speech),
        }
    }

    /// Open the store and load the ffmpeg, tesseract and whisper backends
    pub async fn from_config(config: Config) -> Result<Self> {
        let store = MetadataStore::open(&config.storage).await?;

        let ocr_config = config.ocr.clone();
        let recognizer = tokio::task::spawn_blocking(move || TesseractRecognizer::load(&ocr_config))
            .await
            .map_err(|e| IndexerError::model_init(&config.ocr.command, e))??;

        let transcriber = WhisperTranscriber::load(&config.transcription, &config.audio).await?;
        let decoder = FfmpegDecoder::new(VideoProcessor::with_extensions(&config.processing.supported_extensions));

        Ok(Self::new(
            config,
            store,
            Arc::new(decoder),
            Arc::new(recognizer),
            Arc::new(transcriber),
        ))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    /// Index one video under `video_name`
    pub async fn process(&self, video_path: &Path, video_name: &str) -> VideoProcessingResult {
        self.process_with_cancel(video_path, video_name, &CancellationToken::new()).await
    }

    /// Index one video. Once `cancel` fires, decoding stops at the next frame
    /// and extraction at the next unit.
    pub async fn process_with_cancel(
        &self,
        video_path: &Path,
        video_name: &str,
        cancel: &CancellationToken,
    ) -> VideoProcessingResult {
        let started = Instant::now();
        info!("📹 Processing {} ({})", video_name, video_path.display());

        let video_info = match self.decoder.inspect(video_path).await {
            Ok(info) => info,
            Err(e) => {
                warn!("❌ {}: {}", video_name, e);
                return VideoProcessingResult::failed(video_name, video_path, &e, started);
            }
        };

        // Cancelled by the caller, or internally once the video is beyond saving
        let video_cancel = cancel.child_token();
        let (tx, rx) = mpsc::channel(self.config.sampler.channel_capacity.max(1));

        let producer = {
            let decoder = Arc::clone(&self.decoder);
            let sampler = self.sampler.clone();
            let info = video_info.clone();
            let cancel = video_cancel.clone();
            tokio::task::spawn_blocking(move || -> Result<SamplingStats> {
                let source = decoder.open(&info)?;
                let mut keyframes = sampler.keyframes(source)?.with_cancel(cancel);
                for keyframe in keyframes.by_ref() {
                    if tx.blocking_send(keyframe?).is_err() {
                        break;
                    }
                }
                Ok(keyframes.stats())
            })
        };

        let sampling = async {
            let outcome = match producer.await {
                Ok(outcome) => outcome,
                Err(e) => Err(IndexerError::unreadable(video_path, format!("decoder task failed: {}", e))),
            };
            if outcome.is_err() {
                video_cancel.cancel();
            }
            outcome
        };

        let visual = async {
            let report = self.visual.run(video_name, rx, &self.store, &video_cancel).await;
            if aborts_video(&report) {
                video_cancel.cancel();
            }
            report
        };

        let has_audio = video_info.has_audio;
        let speech = async {
            if !has_audio {
                let e = IndexerError::unit(format!("audio track of {}", video_name), "video has no audio stream");
                warn!("🎤 Skipping transcription of {}: {}", video_name, e);
                return ExtractionReport::failed(&e);
            }

            let report = self
                .speech
                .run(video_name, video_path, &self.config.processing.work_dir, &self.store, &video_cancel)
                .await;
            if aborts_video(&report) {
                video_cancel.cancel();
            }
            report
        };

        let (sampling, visual, speech) = tokio::join!(sampling, visual, speech);

        let mut error_message = None;
        let status = match &sampling {
            Err(e) => {
                error_message = Some(e.to_string());
                ProcessingStatus::Failed
            }
            Ok(_) if aborts_video(&visual) || aborts_video(&speech) => ProcessingStatus::Failed,
            Ok(_) if cancel.is_cancelled() => ProcessingStatus::Cancelled,
            Ok(_) if visual.failure.is_some() || speech.failure.is_some() => ProcessingStatus::Partial,
            Ok(_) => ProcessingStatus::Completed,
        };

        if error_message.is_none() {
            error_message = visual
                .failure
                .as_ref()
                .or(speech.failure.as_ref())
                .map(|f| f.message.clone());
        }

        let result = VideoProcessingResult {
            video_name: video_name.to_string(),
            path: video_path.to_path_buf(),
            video_info: Some(video_info),
            status,
            sampling: sampling.unwrap_or_default(),
            visual,
            speech,
            error_message,
            processing_time: started.elapsed(),
        };

        match result.status {
            ProcessingStatus::Completed => info!(
                "✅ Completed: {} in {:.2}s ({} visual, {} speech records)",
                video_name,
                result.processing_time.as_secs_f64(),
                result.visual.records_written,
                result.speech.records_written
            ),
            ProcessingStatus::Partial => warn!(
                "⚠️ Partially indexed {}: {}",
                video_name,
                result.error_message.as_deref().unwrap_or("extractor failed")
            ),
            ProcessingStatus::Failed => warn!(
                "❌ Failed: {} - {}",
                video_name,
                result.error_message.as_deref().unwrap_or("Unknown error")
            ),
            ProcessingStatus::Cancelled => info!("🛑 Cancelled: {} after {} records", video_name, result.records_written()),
        }

        result
    }

    /// Spool uploaded bytes to a scratch file and index them under `video_name`
    pub async fn process_bytes(&self, bytes: &[u8], video_name: &str) -> Result<VideoProcessingResult> {
        let work_dir = &self.config.processing.work_dir;
        tokio::fs::create_dir_all(work_dir).await?;

        let suffix = Path::new(video_name)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let upload = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(&suffix)
            .tempfile_in(work_dir)?;
        tokio::fs::write(upload.path(), bytes).await?;
        debug!("📥 Spooled {} bytes of {} to {}", bytes.len(), video_name, upload.path().display());

        Ok(self.process(upload.path(), video_name).await)
    }

    /// Substring search over transcriptions and on-screen text. A store
    /// error is logged and yields no results.
    pub async fn search(&self, query: &str) -> Vec<MetadataRecord> {
        match self.store.search(query).await {
            Ok(records) => records,
            Err(e) => {
                error!("Search for '{}' failed: {}", query, e);
                Vec::new()
            }
        }
    }

    /// Search results partitioned by video, insertion order kept within each
    pub async fn search_by_video(&self, query: &str) -> BTreeMap<String, Vec<MetadataRecord>> {
        let mut grouped: BTreeMap<String, Vec<MetadataRecord>> = BTreeMap::new();
        for record in self.search(query).await {
            grouped.entry(record.video_name.clone()).or_default().push(record);
        }
        grouped
    }

    pub async fn list_videos(&self) -> Result<BTreeSet<String>> {
        self.store.list_videos().await
    }

    pub async fn reset(&self) -> Result<()> {
        self.store.reset().await
    }

    pub async fn records_near(&self, video_name: &str, seconds: f64, tolerance: f64) -> Result<Vec<MetadataRecord>> {
        self.store.records_near(video_name, seconds, tolerance).await
    }

    pub async fn timestamps(&self, video_name: &str) -> Result<Vec<u64>> {
        self.store.timestamps(video_name).await
    }

    pub async fn stats(&self, video_name: &str) -> Result<VideoStats> {
        self.store.stats(video_name).await
    }
}

/// Batch processor running videos through a bounded worker pool
pub struct BatchProcessor {
    indexer: VideoIndexer,
    video_processor: VideoProcessor,
    worker_semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl BatchProcessor {
    pub fn new(indexer: VideoIndexer, max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        info!("🔧 Initializing BatchProcessor with {} workers", max_workers);

        Self {
            video_processor: VideoProcessor::with_extensions(&indexer.config().processing.supported_extensions),
            indexer,
            worker_semaphore: Arc::new(Semaphore::new(max_workers)),
            max_concurrent: max_workers,
        }
    }

    pub fn indexer(&self) -> &VideoIndexer {
        &self.indexer
    }

    /// Process files and directories (searched recursively)
    pub async fn process_paths(&self, inputs: &[PathBuf]) -> Result<ProcessingResult> {
        self.process_paths_with_cancel(inputs, &CancellationToken::new()).await
    }

    pub async fn process_paths_with_cancel(
        &self,
        inputs: &[PathBuf],
        cancel: &CancellationToken,
    ) -> Result<ProcessingResult> {
        let start_time = Instant::now();
        let config = self.indexer.config();

        info!("🚀 Starting batch processing...");
        let video_paths = self.video_processor.expand_inputs(inputs)?;

        if config.processing.reset_before_processing {
            info!("🧹 Resetting metadata store before processing");
            self.indexer.reset().await?;
        }

        if video_paths.is_empty() {
            warn!("No videos found in {:?}", inputs);
            return Ok(ProcessingResult::from_results(Vec::new(), start_time.elapsed()));
        }

        info!("📹 Found {} videos to process", video_paths.len());
        let results = self.process_videos_parallel(video_paths, cancel).await;
        let processing_result = ProcessingResult::from_results(results, start_time.elapsed());

        if let Some(summary_path) = &config.processing.summary_path {
            processing_result.save(summary_path).await?;
        }

        info!("🏁 Batch done: {}/{} videos indexed, {} records in {:.1}s",
              processing_result.successful,
              processing_result.total,
              processing_result.total_records,
              processing_result.total_time.as_secs_f64());

        Ok(processing_result)
    }

    /// Process multiple videos in parallel with controlled concurrency
    async fn process_videos_parallel(
        &self,
        video_paths: Vec<PathBuf>,
        cancel: &CancellationToken,
    ) -> Vec<VideoProcessingResult> {
        let (tx, mut rx) = mpsc::channel(self.max_concurrent);
        let total_videos = video_paths.len();

        for (index, video_path) in video_paths.into_iter().enumerate() {
            let indexer = self.indexer.clone();
            let tx = tx.clone();
            let semaphore = Arc::clone(&self.worker_semaphore);
            let cancel = cancel.clone();

            tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return;
                };

                let video_name = video_path
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_else(|| video_path.display().to_string());

                info!("📹 Processing video {}/{}: {}", index + 1, total_videos, video_path.display());
                let result = indexer.process_with_cancel(&video_path, &video_name, &cancel).await;

                if let Err(e) = tx.send((index, result)).await {
                    error!("Failed to send result: {}", e);
                }
            });
        }

        // Drop the original sender to close the channel when all tasks complete
        drop(tx);

        let mut results = Vec::with_capacity(total_videos);
        while let Some(result) = rx.recv().await {
            results.push(result);
        }

        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, result)| result).collect()
    }
}
