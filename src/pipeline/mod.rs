//! Pipeline stages for PDF-to-text OCR.
//!
//! Each submodule implements exactly one transformation step.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ preprocess ──▶ ocr ──▶ (join)
//! (path)    (pdfium)   (threshold)   (tesseract)
//! ```
//!
//! 1. [`input`]      : validate the path and the `%PDF` header
//! 2. [`render`]     : rasterise pages on one blocking thread, streaming
//!    bitmaps over a bounded channel
//! 3. [`preprocess`] : grayscale and binarise each bitmap
//! 4. [`ocr`]        : run the OCR engine on the binarised page
//! 5. [`page`]       : one unit of work: 3 + 4 with timeout and error capture
//!
//! [`postprocess`] cleans language-model output for the optional
//! structuring step and is not part of the OCR path.

pub mod input;
pub mod ocr;
pub mod page;
pub mod postprocess;
pub mod preprocess;
pub mod render;
