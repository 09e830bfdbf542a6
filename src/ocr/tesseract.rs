use image::{ImageFormat, RgbImage};
use std::process::{Command, Stdio};
use tracing::{debug, info};

use super::TextRecognizer;
use crate::config::OcrConfig;
use crate::error::{IndexerError, Result};

/// Text recognizer shelling out to the `tesseract` CLI
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    command: String,
    language: String,
    page_segmentation_mode: u32,
}

impl TesseractRecognizer {
    /// Check that the executable runs and has the language pack installed
    pub fn load(config: &OcrConfig) -> Result<Self> {
        let model = format!("{} ({})", config.command, config.language);

        let output = Command::new(&config.command)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .map_err(|e| IndexerError::model_init(&model, format!("cannot run {}: {}", config.command, e)))?;
        if !output.status.success() {
            return Err(IndexerError::model_init(&model, format!("{} --version failed", config.command)));
        }

        // Older releases print the banner on stderr
        let banner = if output.stdout.is_empty() { &output.stderr } else { &output.stdout };
        let version = String::from_utf8_lossy(banner)
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();

        let langs = Command::new(&config.command)
            .arg("--list-langs")
            .stdin(Stdio::null())
            .output()
            .map_err(|e| IndexerError::model_init(&model, e))?;
        let listed = String::from_utf8_lossy(&langs.stdout).to_string() + &String::from_utf8_lossy(&langs.stderr);
        if !language_installed(&listed, &config.language) {
            return Err(IndexerError::model_init(
                &model,
                format!("language pack '{}' is not installed", config.language),
            ));
        }

        info!("🔤 Text recognizer ready: {}", version);

        Ok(Self {
            command: config.command.clone(),
            language: config.language.clone(),
            page_segmentation_mode: config.page_segmentation_mode,
        })
    }
}

impl TextRecognizer for TesseractRecognizer {
    fn name(&self) -> &str {
        &self.command
    }

    fn recognize(&self, image: &RgbImage) -> Result<Vec<String>> {
        let file = tempfile::Builder::new()
            .prefix("keyframe-")
            .suffix(".png")
            .tempfile()?;

        image
            .save_with_format(file.path(), ImageFormat::Png)
            .map_err(|e| IndexerError::unit("keyframe image", format!("failed to encode PNG: {}", e)))?;

        let output = Command::new(&self.command)
            .arg(file.path())
            .arg("stdout")
            .args(["-l", &self.language])
            .args(["--psm", &self.page_segmentation_mode.to_string()])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| IndexerError::unit("keyframe image", format!("failed to run {}: {}", self.command, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(IndexerError::unit(
                "keyframe image",
                format!("{} exited with {}: {}", self.command, output.status, stderr.trim()),
            ));
        }

        let spans = parse_spans(&String::from_utf8_lossy(&output.stdout));
        debug!("{} text spans recognized", spans.len());
        Ok(spans)
    }
}

/// Every non-blank output line is a span, with inner whitespace collapsed
pub fn parse_spans(output: &str) -> Vec<String> {
    output
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect()
}

/// `--list-langs` prints a header line followed by one language per line;
/// `eng+deu` style specs need every part installed
fn language_installed(listing: &str, language: &str) -> bool {
    let installed: Vec<&str> = listing.lines().map(str::trim).collect();
    language
        .split('+')
        .all(|lang| installed.contains(&lang))
}
