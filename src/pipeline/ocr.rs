//! OCR: turn one preprocessed page image into text.
//!
//! [`TesseractEngine`] drives the `tesseract` command-line binary. The image
//! is PNG-encoded and piped through stdin (`tesseract stdin stdout`), so no
//! temporary files are involved and concurrent pages never collide on disk.
//! The child is spawned with `kill_on_drop`, which is what makes the
//! pipeline's per-page timeout effective: dropping the recognition future
//! kills the process.

use crate::config::ExtractionConfig;
use crate::pipeline::preprocess::PreprocessedImage;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Why recognition of one page failed.
#[derive(Debug, Error)]
pub enum RecognitionError {
    /// The OCR binary does not exist or is not executable.
    #[error("OCR binary '{path}' not found")]
    BinaryNotFound { path: PathBuf },

    /// The OCR process could not be started or talked to.
    #[error("failed to run OCR binary: {0}")]
    Io(#[from] std::io::Error),

    /// The image could not be encoded for the engine.
    #[error("image encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    /// The OCR process exited unsuccessfully.
    #[error("OCR process exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    /// A background task of the engine panicked.
    #[error("OCR task failed: {0}")]
    Task(String),
}

/// Extracts text from a single preprocessed page image.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Short engine identifier for logs.
    fn name(&self) -> &'static str;

    /// Recognise the text in `image`.
    async fn recognize(&self, image: PreprocessedImage) -> Result<String, RecognitionError>;
}

/// [`OcrEngine`] backed by the tesseract binary.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    binary: PathBuf,
    page_segmentation_mode: u8,
    language: Option<String>,
}

impl TesseractEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            page_segmentation_mode: crate::config::DEFAULT_PAGE_SEGMENTATION_MODE,
            language: None,
        }
    }

    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            binary: config.tesseract_path.clone(),
            page_segmentation_mode: config.page_segmentation_mode,
            language: config.language.clone(),
        }
    }

    pub fn with_page_segmentation_mode(mut self, psm: u8) -> Self {
        self.page_segmentation_mode = psm;
        self
    }

    pub fn with_language(mut self, lang: impl Into<String>) -> Self {
        self.language = Some(lang.into());
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Command-line arguments for one recognition run.
    fn args(&self) -> Vec<String> {
        let mut args = vec![
            "stdin".to_string(),
            "stdout".to_string(),
            "--psm".to_string(),
            self.page_segmentation_mode.to_string(),
        ];
        if let Some(ref lang) = self.language {
            args.push("-l".to_string());
            args.push(lang.clone());
        }
        args
    }

    /// First line of `tesseract --version`, e.g. `tesseract 5.3.4`.
    pub async fn version(&self) -> Result<String, RecognitionError> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            return Err(RecognitionError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        // Older releases print the banner on stderr.
        let banner = if output.stdout.is_empty() {
            output.stderr
        } else {
            output.stdout
        };
        Ok(String::from_utf8_lossy(&banner)
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string())
    }

    /// Check whether the binary runs at all.
    pub async fn is_available(&self) -> bool {
        self.version().await.is_ok()
    }

    fn spawn_error(&self, e: std::io::Error) -> RecognitionError {
        if e.kind() == std::io::ErrorKind::NotFound {
            RecognitionError::BinaryNotFound {
                path: self.binary.clone(),
            }
        } else {
            RecognitionError::Io(e)
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    async fn recognize(&self, image: PreprocessedImage) -> Result<String, RecognitionError> {
        let png = tokio::task::spawn_blocking(move || image.to_png())
            .await
            .map_err(|e| RecognitionError::Task(e.to_string()))??;

        let mut child = Command::new(&self.binary)
            .args(self.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| RecognitionError::Task("child stdin was not captured".into()))?;

        // Feed stdin while draining stdout so neither pipe can fill up and stall.
        let feed = async move {
            stdin.write_all(&png).await?;
            stdin.shutdown().await
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;

        if !output.status.success() {
            return Err(RecognitionError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        // A write error after a successful exit means tesseract stopped
        // reading early; its output is still complete.
        if let Err(e) = fed {
            debug!("tesseract closed stdin early: {}", e);
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
