//! Synthetic decoder and recognizers shared by the integration tests.
//!
//! A "video" is a file whose bytes are frame labels, one byte per frame at
//! 30fps. Each label becomes a solid gray frame, and the text recognizer reads
//! the label back to decide what is written on screen.

#![allow(dead_code)]

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use video_indexer::sampler::InMemoryFrames;
use video_indexer::{
    Config, ConfigBuilder, FrameSource, IndexerError, MetadataStore, Result, SpeechRecognizer,
    TextRecognizer, TranscriptSegment, VideoDecoder, VideoIndexer, VideoInfo,
};

pub const FPS: f64 = 30.0;

pub const BLANK: u8 = 0;
pub const WELCOME: u8 = 60;
pub const EXIT_SIGN: u8 = 120;
pub const SERVICES: u8 = 180;
/// Frames the recognizer cannot read
pub const GARBLED: u8 = 240;
/// Frames that bring the recognition model down
pub const POISON: u8 = 200;

/// Frame labels: `runs` of (label, frame count)
pub fn frames(runs: &[(u8, usize)]) -> Vec<u8> {
    runs.iter()
        .flat_map(|&(label, count)| std::iter::repeat(label).take(count))
        .collect()
}

/// The canonical clip: 450 frames with a cut at frame 150
pub fn highway_clip() -> Vec<u8> {
    frames(&[(WELCOME, 150), (EXIT_SIGN, 300)])
}

pub fn write_video(dir: &Path, name: &str, labels: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, labels).unwrap();
    path
}

/// Decodes label files. Files named in `silent` have no audio stream.
#[derive(Default)]
pub struct SyntheticDecoder {
    pub silent: HashSet<String>,
}

impl SyntheticDecoder {
    pub fn silent(mut self, file_name: &str) -> Self {
        self.silent.insert(file_name.to_string());
        self
    }
}

#[async_trait]
impl VideoDecoder for SyntheticDecoder {
    async fn inspect(&self, path: &Path) -> Result<VideoInfo> {
        let labels = tokio::fs::read(path)
            .await
            .map_err(|e| IndexerError::unreadable(path, e))?;
        if labels.is_empty() {
            return Err(IndexerError::unreadable(path, "no video stream found"));
        }

        let filename = path.file_name().unwrap().to_string_lossy().to_string();
        Ok(VideoInfo {
            path: path.to_path_buf(),
            has_audio: !self.silent.contains(&filename),
            filename,
            duration: Duration::from_secs_f64(labels.len() as f64 / FPS),
            width: 16,
            height: 16,
            fps: FPS,
            frame_count: Some(labels.len() as u64),
            format: "synthetic".to_string(),
            file_size: labels.len() as u64,
        })
    }

    fn open(&self, info: &VideoInfo) -> Result<Box<dyn FrameSource>> {
        let labels = std::fs::read(&info.path)?;
        let frames = labels
            .into_iter()
            .map(|label| RgbImage::from_pixel(info.width, info.height, Rgb([label, label, label])));
        Ok(Box::new(InMemoryFrames::new(info.fps, frames)))
    }
}

pub struct LabelReader;

impl TextRecognizer for LabelReader {
    fn name(&self) -> &str {
        "label-reader"
    }

    fn recognize(&self, image: &RgbImage) -> Result<Vec<String>> {
        match image.get_pixel(0, 0).0[0] {
            WELCOME => Ok(vec!["Welcome".into()]),
            EXIT_SIGN => Ok(vec!["EXIT".into(), "12".into()]),
            SERVICES => Ok(vec!["Next services".into(), "5 km".into()]),
            GARBLED => Err(IndexerError::unit("keyframe image", "unreadable glyphs")),
            POISON => Err(IndexerError::model_init("label-reader", "model crashed")),
            _ => Ok(Vec::new()),
        }
    }
}

/// Speech keyed by video file name; unknown files are silent
#[derive(Default)]
pub struct ScriptedSpeech {
    pub transcripts: HashMap<String, Vec<TranscriptSegment>>,
    pub broken: HashSet<String>,
}

impl ScriptedSpeech {
    pub fn with(mut self, file_name: &str, segments: Vec<TranscriptSegment>) -> Self {
        self.transcripts.insert(file_name.to_string(), segments);
        self
    }

    pub fn broken(mut self, file_name: &str) -> Self {
        self.broken.insert(file_name.to_string());
        self
    }
}

#[async_trait]
impl SpeechRecognizer for ScriptedSpeech {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn transcribe(&self, video_path: &Path, _work_dir: &Path) -> Result<Vec<TranscriptSegment>> {
        let file_name = video_path.file_name().unwrap().to_string_lossy().to_string();
        if self.broken.contains(&file_name) {
            return Err(IndexerError::unit(
                format!("audio track of {}", file_name),
                "no audio stream found",
            ));
        }
        Ok(self.transcripts.get(&file_name).cloned().unwrap_or_default())
    }
}

pub fn highway_transcript() -> Vec<TranscriptSegment> {
    vec![
        TranscriptSegment::new(0.0, 4.2, " Welcome aboard."),
        TranscriptSegment::new(6.5, 9.0, " Take the next exit."),
    ]
}

pub struct Harness {
    pub dir: TempDir,
    pub indexer: VideoIndexer,
}

impl Harness {
    pub async fn new(speech: ScriptedSpeech) -> Self {
        let dir = TempDir::new().unwrap();
        let config = Self::config(&dir);
        Self::with_config(dir, config, speech).await
    }

    pub async fn with_config(dir: TempDir, config: Config, speech: ScriptedSpeech) -> Self {
        Self::with_parts(dir, config, SyntheticDecoder::default(), Arc::new(LabelReader), speech).await
    }

    pub async fn with_parts(
        dir: TempDir,
        config: Config,
        decoder: SyntheticDecoder,
        reader: Arc<dyn TextRecognizer>,
        speech: ScriptedSpeech,
    ) -> Self {
        let store = MetadataStore::in_memory().await.unwrap();
        let indexer = VideoIndexer::new(config, store, Arc::new(decoder), reader, Arc::new(speech));
        Self { dir, indexer }
    }

    pub fn config(dir: &TempDir) -> Config {
        ConfigBuilder::new()
            .with_work_dir(dir.path().join("work"))
            .with_workers(2)
            .build()
    }

    pub fn video(&self, name: &str, labels: &[u8]) -> PathBuf {
        write_video(self.dir.path(), name, labels)
    }
}
