//! # scan2text
//!
//! Extract text from scanned PDF documents with OCR, then optionally
//! restructure it with a language model.
//!
//! ## Why this crate?
//!
//! Scanned PDFs carry no text layer: every page is a picture of paper.
//! Text extractors that read the PDF content stream find nothing. This crate
//! rasterises each page, binarises it, and hands it to Tesseract, running
//! pages in parallel while keeping their text in document order.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input       check path and %PDF header
//!  ├─ 2. Render      rasterise pages via pdfium at 300 DPI (one blocking thread)
//!  ├─ 3. Preprocess  grayscale + threshold at 200
//!  ├─ 4. OCR         tesseract --psm 6, `concurrency` pages at a time
//!  ├─ 5. Join        page texts in page order, separated by "\n"
//!  ├─ 6. Structure   (optional) chunked LLM rewrite
//!  └─ 7. Store       (optional) append to the JSON record store
//! ```
//!
//! A page that cannot be rendered or recognised contributes an empty string;
//! it never aborts the document. [`OcrPipeline::extract`] goes further and
//! turns even a fatal error into an empty result after logging it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scan2text::{ExtractionConfig, OcrPipeline};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExtractionConfig::builder()
//!         .tesseract_path("/usr/bin/tesseract")
//!         .build()?;
//!     let pipeline = OcrPipeline::new(config);
//!
//!     let output = pipeline.try_extract("scan.pdf").await?;
//!     println!("{}", output.text);
//!     eprintln!("{} of {} pages failed", output.stats.failed_pages, output.stats.total_pages);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `scan2text` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! ## External requirements
//!
//! * `libpdfium` for rendering. Looked up via the configured path,
//!   `PDFIUM_LIB_PATH`, the working directory, then the system library path.
//! * The `tesseract` binary, on `PATH` or configured explicitly.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod store;
pub mod structure;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ExtractionConfig, ExtractionConfigBuilder, StructuringConfig, StructuringConfigBuilder,
};
pub use error::{ExtractError, PageError};
pub use extract::{
    extract_from_bytes, extract_text, extract_text_sync, extract_to_file, inspect, OcrPipeline,
};
pub use output::{DocumentInfo, ExtractionOutput, ExtractionStats, PageText};
pub use pipeline::ocr::{OcrEngine, RecognitionError, TesseractEngine};
pub use pipeline::render::{PageRasterizer, PdfiumRasterizer, RasterDocument};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use store::{generate_sequential_id, DocumentRecord, RecordStore};
pub use structure::{
    split_into_chunks, LlmBackend, StructureError, StructuredText, Structurer, StructuringBackend,
};
