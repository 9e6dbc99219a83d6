//! Configuration types for OCR extraction and text structuring.
//!
//! Extraction behaviour is controlled through [`ExtractionConfig`], built via
//! [`ExtractionConfigBuilder`]; the optional LLM step through
//! [`StructuringConfig`]. Every external dependency the pipeline needs (the
//! tesseract binary, the pdfium library) is named here and handed to the
//! components at construction, so two pipelines with different settings can
//! coexist in one process.

use crate::error::ExtractError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default rasterisation resolution.
pub const DEFAULT_DPI: u32 = 300;

/// Default binarisation cutoff: luminance below it becomes black.
pub const DEFAULT_THRESHOLD: u8 = 200;

/// Tesseract page segmentation mode 6: "assume a single uniform block of text".
pub const DEFAULT_PAGE_SEGMENTATION_MODE: u8 = 6;

/// Configuration for a PDF-to-text OCR extraction.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use scan2text::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .dpi(300)
///     .threshold(180)
///     .concurrency(4)
///     .tesseract_path("/usr/bin/tesseract")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Rendering DPI used when rasterising each page. Range: 72–600. Default: 300.
    ///
    /// Higher values help on small fonts at a proportional cost per page.
    pub dpi: u32,

    /// Luminance cutoff for binarisation. Default: 200.
    ///
    /// Assumes dark text on a light background; not adaptive.
    pub threshold: u8,

    /// Number of pages preprocessed and recognised at once.
    /// Default: the machine's available parallelism.
    pub concurrency: usize,

    /// Path (or bare command name) of the tesseract binary. Default: `"tesseract"`.
    pub tesseract_path: PathBuf,

    /// Tesseract `--psm` value. Range: 0–13. Default: 6.
    pub page_segmentation_mode: u8,

    /// Tesseract language (`-l`), e.g. `"eng"` or `"eng+deu"`.
    /// If None, tesseract uses its own default.
    pub language: Option<String>,

    /// Per-page limit for preprocessing plus OCR, in seconds.
    /// A page over the limit contributes an empty string. Default: None.
    pub page_timeout_secs: Option<u64>,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Explicit pdfium library file or directory. If None, `PDFIUM_LIB_PATH`,
    /// the working directory and the system library are tried in that order.
    pub pdfium_library_path: Option<PathBuf>,

    /// Per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            dpi: DEFAULT_DPI,
            threshold: DEFAULT_THRESHOLD,
            concurrency: default_concurrency(),
            tesseract_path: PathBuf::from("tesseract"),
            page_segmentation_mode: DEFAULT_PAGE_SEGMENTATION_MODE,
            language: None,
            page_timeout_secs: None,
            password: None,
            pdfium_library_path: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("dpi", &self.dpi)
            .field("threshold", &self.threshold)
            .field("concurrency", &self.concurrency)
            .field("tesseract_path", &self.tesseract_path)
            .field("page_segmentation_mode", &self.page_segmentation_mode)
            .field("language", &self.language)
            .field("page_timeout_secs", &self.page_timeout_secs)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("pdfium_library_path", &self.pdfium_library_path)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ExtractionProgressCallback>"),
            )
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// The per-page time limit, if any.
    pub fn page_timeout(&self) -> Option<Duration> {
        self.page_timeout_secs.map(Duration::from_secs)
    }
}

/// Number of execution units available to this process, falling back to 4.
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn threshold(mut self, threshold: u8) -> Self {
        self.config.threshold = threshold;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn tesseract_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.tesseract_path = path.into();
        self
    }

    pub fn page_segmentation_mode(mut self, psm: u8) -> Self {
        self.config.page_segmentation_mode = psm;
        self
    }

    pub fn language(mut self, lang: impl Into<String>) -> Self {
        self.config.language = Some(lang.into());
        self
    }

    pub fn page_timeout_secs(mut self, secs: u64) -> Self {
        self.config.page_timeout_secs = Some(secs);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn pdfium_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(path.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 600 {
            return Err(ExtractError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if c.concurrency == 0 {
            return Err(ExtractError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.page_segmentation_mode > 13 {
            return Err(ExtractError::InvalidConfig(format!(
                "Page segmentation mode must be 0–13, got {}",
                c.page_segmentation_mode
            )));
        }
        if let Some(ref lang) = c.language {
            validate_language(lang)?;
        }
        if c.page_timeout_secs == Some(0) {
            return Err(ExtractError::InvalidConfig(
                "Page timeout must be ≥ 1 second".into(),
            ));
        }
        if c.tesseract_path.as_os_str().is_empty() {
            return Err(ExtractError::InvalidConfig(
                "Tesseract path must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

/// Language codes are passed as a process argument: alphanumerics joined by
/// `+`, with `_` allowed (`eng`, `eng+deu`, `chi_sim`).
fn validate_language(lang: &str) -> Result<(), ExtractError> {
    if lang.is_empty() || lang.len() > 64 {
        return Err(ExtractError::InvalidConfig(format!(
            "Invalid OCR language '{lang}'"
        )));
    }
    if let Some(c) = lang
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '+' && *c != '_')
    {
        return Err(ExtractError::InvalidConfig(format!(
            "Invalid character '{c}' in OCR language '{lang}'"
        )));
    }
    Ok(())
}

// ── Structuring ──────────────────────────────────────────────────────────

/// Default token budget per chunk sent to the language model.
pub const DEFAULT_MAX_TOKENS_PER_CHUNK: usize = 6000;

/// Configuration for the LLM text-structuring step.
#[derive(Clone)]
pub struct StructuringConfig {
    /// LLM model identifier. If None, `"gpt-4.1-nano"` for named providers.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Approximate input token budget per chunk. Default: 6000.
    pub max_tokens_per_chunk: usize,

    /// Sampling temperature. Default: 0.2.
    pub temperature: f32,

    /// Maximum tokens generated per chunk. Default: 4096.
    pub max_output_tokens: usize,

    /// Prompt template containing `{extracted_text}`. If None, uses the
    /// built-in [`crate::prompts::STRUCTURE_PROMPT`].
    pub prompt_template: Option<String>,
}

impl Default for StructuringConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            max_tokens_per_chunk: DEFAULT_MAX_TOKENS_PER_CHUNK,
            temperature: 0.2,
            max_output_tokens: 4096,
            prompt_template: None,
        }
    }
}

impl fmt::Debug for StructuringConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructuringConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("max_tokens_per_chunk", &self.max_tokens_per_chunk)
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("prompt_template", &self.prompt_template.is_some())
            .finish()
    }
}

impl StructuringConfig {
    /// Create a new builder for `StructuringConfig`.
    pub fn builder() -> StructuringConfigBuilder {
        StructuringConfigBuilder {
            config: Self::default(),
        }
    }

    /// Character budget per chunk, estimated at 4 characters per 1.3 tokens.
    pub fn max_chars_per_chunk(&self) -> usize {
        chars_for_tokens(self.max_tokens_per_chunk)
    }
}

/// Convert a token budget into a character budget (`tokens * 4 / 1.3`).
pub fn chars_for_tokens(tokens: usize) -> usize {
    (tokens as f64 * 4.0 / 1.3) as usize
}

/// Builder for [`StructuringConfig`].
pub struct StructuringConfigBuilder {
    config: StructuringConfig,
}

impl StructuringConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn max_tokens_per_chunk(mut self, n: usize) -> Self {
        self.config.max_tokens_per_chunk = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_output_tokens(mut self, n: usize) -> Self {
        self.config.max_output_tokens = n;
        self
    }

    pub fn prompt_template(mut self, template: impl Into<String>) -> Self {
        self.config.prompt_template = Some(template.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<StructuringConfig, ExtractError> {
        let c = &self.config;
        if c.max_chars_per_chunk() == 0 {
            return Err(ExtractError::InvalidConfig(
                "Chunk token budget must be ≥ 1".into(),
            ));
        }
        if let Some(ref template) = c.prompt_template {
            if !template.contains(crate::prompts::TEXT_PLACEHOLDER) {
                return Err(ExtractError::InvalidConfig(format!(
                    "Prompt template must contain {}",
                    crate::prompts::TEXT_PLACEHOLDER
                )));
            }
        }
        Ok(self.config)
    }
}
