//! One unit of work: preprocess and recognise a single rendered page.
//!
//! [`process_page`] never fails. Every page-scoped problem (a render error
//! carried in from the render thread, an unusable bitmap, an OCR failure, a
//! timeout, a panic in the preprocessing task) is logged here, at the point
//! of failure, and recorded as a [`PageError`] on a [`PageText`] with empty
//! text. Sibling pages are unaffected.

use crate::error::PageError;
use crate::output::PageText;
use crate::pipeline::ocr::OcrEngine;
use crate::pipeline::preprocess::preprocess;
use image::DynamicImage;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Settings shared by every unit of work of one extraction.
#[derive(Debug, Clone, Copy)]
pub struct PageJob {
    pub threshold: u8,
    pub timeout: Option<Duration>,
}

/// Preprocess and recognise one page.
///
/// `raster` is the render thread's result for page `index` (0-based).
pub async fn process_page(
    engine: Arc<dyn OcrEngine>,
    index: usize,
    raster: Result<DynamicImage, PageError>,
    job: PageJob,
) -> PageText {
    let start = Instant::now();
    let page_num = index + 1;

    let work = recognize_page(engine, page_num, raster, job.threshold);
    let result = match job.timeout {
        Some(limit) => match tokio::time::timeout(limit, work).await {
            Ok(r) => r,
            // Dropping `work` kills the OCR child process.
            Err(_) => Err(PageError::Timeout {
                page: page_num,
                secs: limit.as_secs(),
            }),
        },
        None => work.await,
    };
    let duration_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(text) => {
            debug!(
                "Page {}: {} chars in {}ms",
                page_num,
                text.chars().count(),
                duration_ms
            );
            PageText {
                index,
                text,
                duration_ms,
                error: None,
            }
        }
        Err(e) => {
            warn!("{} (page text left empty)", e);
            PageText::failed(index, e, duration_ms)
        }
    }
}

async fn recognize_page(
    engine: Arc<dyn OcrEngine>,
    page_num: usize,
    raster: Result<DynamicImage, PageError>,
    threshold: u8,
) -> Result<String, PageError> {
    let image = raster?;

    let prepared = tokio::task::spawn_blocking(move || preprocess(&image, threshold))
        .await
        .map_err(|e| PageError::WorkerPanicked {
            page: page_num,
            detail: e.to_string(),
        })?
        .map_err(|e| PageError::PreprocessingFailed {
            page: page_num,
            detail: e.to_string(),
        })?;

    engine
        .recognize(prepared)
        .await
        .map_err(|e| PageError::RecognitionFailed {
            page: page_num,
            detail: format!("{}: {}", engine.name(), e),
        })
}
