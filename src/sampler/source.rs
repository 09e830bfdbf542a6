//! Decoded frame sources for the sampler.

use async_trait::async_trait;
use image::RgbImage;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;
use tracing::{debug, warn};

use crate::error::{IndexerError, Result};
use crate::video::{VideoInfo, VideoProcessor};

/// Sequential reader over a video's decoded frames. Dropping the source
/// releases the underlying decoder.
pub trait FrameSource: Send {
    fn fps(&self) -> f64;

    /// Next frame in stream order, `None` once the stream is exhausted
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;

    /// Advance past one frame the caller will not look at. `false` once the
    /// stream is exhausted.
    fn skip_frame(&mut self) -> Result<bool> {
        Ok(self.next_frame()?.is_some())
    }
}

/// Opens videos for sampling
#[async_trait]
pub trait VideoDecoder: Send + Sync {
    async fn inspect(&self, path: &Path) -> Result<VideoInfo>;

    fn open(&self, info: &VideoInfo) -> Result<Box<dyn FrameSource>>;
}

/// Decoder backed by the `ffprobe` and `ffmpeg` executables
#[derive(Clone, Default)]
pub struct FfmpegDecoder {
    processor: VideoProcessor,
}

impl FfmpegDecoder {
    pub fn new(processor: VideoProcessor) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl VideoDecoder for FfmpegDecoder {
    async fn inspect(&self, path: &Path) -> Result<VideoInfo> {
        self.processor.get_video_info(path).await
    }

    fn open(&self, info: &VideoInfo) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(FfmpegFrameSource::spawn(info)?))
    }
}

/// Arguments decoding `info` to raw RGB24 on stdout. The output size is
/// pinned to the probed display size so every frame is exactly
/// `width * height * 3` bytes, whatever rotation metadata the file carries.
pub fn decode_args(info: &VideoInfo) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-nostdin", "-v", "error", "-i"].iter().map(OsString::from).collect();
    args.push(info.path.as_os_str().to_os_string());
    args.extend(
        [
            "-an".to_string(),
            "-vf".to_string(),
            format!("scale={}:{}", info.width, info.height),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "rgb24".to_string(),
            "-".to_string(),
        ]
        .into_iter()
        .map(OsString::from),
    );
    args
}

/// Raw RGB24 frames piped out of an `ffmpeg` child process
pub struct FfmpegFrameSource {
    path: PathBuf,
    child: Option<Child>,
    stdout: BufReader<ChildStdout>,
    stderr: Option<JoinHandle<String>>,
    /// Reused for frames that are skipped
    scratch: Vec<u8>,
    width: u32,
    height: u32,
    fps: f64,
    frames_read: u64,
}

impl FfmpegFrameSource {
    pub fn spawn(info: &VideoInfo) -> Result<Self> {
        let mut child = Command::new("ffmpeg")
            .args(decode_args(info))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| IndexerError::unreadable(&info.path, format!("failed to spawn ffmpeg: {}", e)))?;

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(IndexerError::unreadable(&info.path, "ffmpeg stdout unavailable"));
            }
        };

        // A full stderr pipe would stall the decoder
        let stderr = child.stderr.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut text = String::new();
                let _ = pipe.read_to_string(&mut text);
                text
            })
        });

        debug!("🎞️  Decoding {} at {}x{}", info.path.display(), info.width, info.height);

        Ok(Self {
            path: info.path.clone(),
            child: Some(child),
            stdout: BufReader::new(stdout),
            stderr,
            scratch: Vec::new(),
            width: info.width,
            height: info.height,
            fps: info.fps,
            frames_read: 0,
        })
    }

    fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    /// Whatever ffmpeg printed on stderr, once it has exited
    fn decoder_errors(&mut self) -> String {
        self.stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .map(|text| text.trim().to_string())
            .unwrap_or_default()
    }

    /// Reap the decoder at end of stream. A decoder that failed before
    /// producing a single frame means the file was never readable.
    fn finish(&mut self) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            let status = child.wait()?;
            if !status.success() {
                let errors = self.decoder_errors();
                let reason = if errors.is_empty() {
                    format!("ffmpeg exited with {}", status)
                } else {
                    format!("ffmpeg exited with {}: {}", status, errors)
                };
                if self.frames_read == 0 {
                    return Err(IndexerError::unreadable(&self.path, reason));
                }
                warn!("{} after {} frames of {}", reason, self.frames_read, self.path.display());
            }
        }
        Ok(())
    }

    /// Fill `buffer` with the next frame. `false` at end of stream.
    fn read_into(&mut self, buffer: &mut [u8]) -> Result<bool> {
        if self.child.is_none() {
            return Ok(false);
        }

        match self.stdout.read_exact(buffer) {
            Ok(()) => {
                self.frames_read += 1;
                Ok(true)
            }
            // A trailing partial frame counts as end of stream
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => self.finish().map(|()| false),
            Err(e) => Err(IndexerError::unreadable(&self.path, format!("failed reading frames: {}", e))),
        }
    }
}

impl FrameSource for FfmpegFrameSource {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let mut buffer = vec![0u8; self.frame_len()];
        if !self.read_into(&mut buffer)? {
            return Ok(None);
        }

        RgbImage::from_raw(self.width, self.height, buffer)
            .map(Some)
            .ok_or_else(|| IndexerError::unreadable(&self.path, "frame buffer size mismatch"))
    }

    fn skip_frame(&mut self) -> Result<bool> {
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.resize(self.frame_len(), 0);
        let advanced = self.read_into(&mut scratch);
        self.scratch = scratch;
        advanced
    }
}

impl Drop for FfmpegFrameSource {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Frames already in memory, for synthetic inputs and benchmarks
pub struct InMemoryFrames {
    fps: f64,
    frames: VecDeque<RgbImage>,
}

impl InMemoryFrames {
    pub fn new(fps: f64, frames: impl IntoIterator<Item = RgbImage>) -> Self {
        Self {
            fps,
            frames: frames.into_iter().collect(),
        }
    }
}

impl FrameSource for InMemoryFrames {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        Ok(self.frames.pop_front())
    }
}
