//! Error types for the scan2text library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ExtractError`] is **fatal**: the extraction cannot proceed at all
//!   (missing file, not a PDF, wrong password, pdfium not loadable). Returned
//!   as `Err(ExtractError)` from [`crate::OcrPipeline::try_extract`] and the
//!   other fallible entry points.
//!
//! * [`PageError`] is **non-fatal**: a single page failed (render glitch,
//!   tesseract crash, timeout) but every other page is fine. Stored inside
//!   [`crate::output::PageText`]; the page contributes an empty string to the
//!   document text.
//!
//! [`crate::OcrPipeline::extract`] goes one step further and folds fatal
//! errors into an empty document as well, after logging them.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the scan2text library.
///
/// Page-level failures use [`PageError`] and are stored in
/// [`crate::output::PageText`] rather than propagated here.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: Vec<u8> },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}\nTry repairing with: qpdf input.pdf output.pdf")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install libpdfium for your platform (https://github.com/bblanchon/pdfium-binaries)\n\
and either place it in the working directory or set PDFIUM_LIB_PATH=/path/to/libpdfium.\n"
    )]
    PdfiumBindingFailed(String),

    // ── OCR engine errors ─────────────────────────────────────────────────
    /// The OCR binary could not be executed at startup validation.
    #[error("OCR engine unavailable at '{path}': {detail}\nInstall tesseract or pass --tesseract <PATH>.")]
    OcrEngineUnavailable { path: PathBuf, detail: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Storage errors ────────────────────────────────────────────────────
    /// Reading or parsing the record store failed.
    #[error("Failed to read record store '{path}': {detail}")]
    StoreReadFailed { path: PathBuf, detail: String },

    /// Could not create or write an output file.
    #[error("Failed to write '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page.
///
/// Stored alongside [`crate::output::PageText`] when a page fails. The page
/// text becomes empty and the extraction carries on with the other pages.
/// Page numbers are 1-indexed.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// pdfium could not render the page.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// The rendered bitmap could not be binarised.
    #[error("Page {page}: preprocessing failed: {detail}")]
    PreprocessingFailed { page: usize, detail: String },

    /// The OCR engine failed on the page.
    #[error("Page {page}: recognition failed: {detail}")]
    RecognitionFailed { page: usize, detail: String },

    /// The page exceeded the per-page time limit.
    #[error("Page {page}: OCR timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },

    /// The worker processing the page panicked.
    #[error("Page {page}: worker panicked: {detail}")]
    WorkerPanicked { page: usize, detail: String },

    /// The render thread stopped before producing the page.
    #[error("Page {page}: never rendered")]
    NotRendered { page: usize },
}

impl PageError {
    /// 1-indexed page number the error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::RasterisationFailed { page, .. }
            | PageError::PreprocessingFailed { page, .. }
            | PageError::RecognitionFailed { page, .. }
            | PageError::Timeout { page, .. }
            | PageError::WorkerPanicked { page, .. }
            | PageError::NotRendered { page } => *page,
        }
    }
}
