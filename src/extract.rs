//! The OCR pipeline: PDF path in, page-ordered text out.
//!
//! ## Flow of one extraction
//!
//! ```text
//! Idle ──▶ Opened ──▶ Dispatching ──▶ Collecting ──▶ Joined ──▶ Done
//!            │
//!            └──▶ Failed (document could not be opened)
//! ```
//!
//! The render thread opens the document and streams `(index, bitmap)` pairs
//! over a bounded channel. Each pair becomes one unit of work
//! ([`crate::pipeline::page::process_page`]) on the tokio runtime; at most
//! `concurrency` units run at once. Units finish in any order, so results go
//! into a slot vector addressed by page index rather than being appended in
//! arrival order.
//!
//! Nothing here retries. A page that fails once contributes `""`.

use crate::config::ExtractionConfig;
use crate::error::{ExtractError, PageError};
use crate::output::{DocumentInfo, ExtractionOutput, ExtractionStats, PageText};
use crate::pipeline::ocr::{OcrEngine, TesseractEngine};
use crate::pipeline::page::{process_page, PageJob};
use crate::pipeline::render::{self, PageRasterizer, PdfiumRasterizer, RenderThread};
use crate::pipeline::input;
use futures::StreamExt;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

/// Concurrent, order-preserving OCR over all pages of a PDF.
///
/// Cheap to clone; the rasterizer and engine are shared.
#[derive(Clone)]
pub struct OcrPipeline {
    config: ExtractionConfig,
    rasterizer: Arc<dyn PageRasterizer>,
    engine: Arc<dyn OcrEngine>,
}

impl OcrPipeline {
    /// Pipeline over pdfium and the tesseract binary named in `config`.
    pub fn new(config: ExtractionConfig) -> Self {
        let rasterizer = Arc::new(PdfiumRasterizer::from_config(&config));
        let engine = Arc::new(TesseractEngine::from_config(&config));
        Self::with_components(config, rasterizer, engine)
    }

    /// Pipeline over caller-supplied backends.
    pub fn with_components(
        config: ExtractionConfig,
        rasterizer: Arc<dyn PageRasterizer>,
        engine: Arc<dyn OcrEngine>,
    ) -> Self {
        Self {
            config,
            rasterizer,
            engine,
        }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Extract the text of `path`, one segment per page joined by `"\n"`.
    ///
    /// Never fails. Fatal errors (unreadable file, not a PDF, pdfium missing)
    /// are logged at `error` level and produce an empty string, which is
    /// indistinguishable from a document without text. Use
    /// [`OcrPipeline::try_extract`] to tell the two apart.
    pub async fn extract(&self, path: impl AsRef<Path>) -> String {
        let path = path.as_ref();
        match self.try_extract(path).await {
            Ok(output) => output.text,
            Err(e) => {
                error!("Extraction of '{}' failed: {}", path.display(), e);
                String::new()
            }
        }
    }

    /// Extract `path`, surfacing fatal errors and per-page details.
    ///
    /// Returns `Ok` whenever the document could be opened, even if every
    /// page failed; inspect [`ExtractionOutput::page_errors`] for those.
    pub async fn try_extract(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<ExtractionOutput, ExtractError> {
        let start = Instant::now();
        let path = input::validate_local(path.as_ref())?;
        info!("Starting extraction: {}", path.display());

        // The config fields are public, so a hand-built config can bypass
        // the builder's clamping. A zero-width buffer never polls its stream.
        let workers = self.config.concurrency.max(1);

        let RenderThread {
            opened,
            pages,
            task,
        } = render::spawn_render_thread(
            Arc::clone(&self.rasterizer),
            path.clone(),
            self.config.dpi,
            workers,
        );

        // ── Opened / Failed ──────────────────────────────────────────────
        let info = match opened.await {
            Ok(info) => info,
            Err(_) => return Err(open_failure(task.await)),
        };
        let total = info.page_count;
        info!("Document opened: {} pages", total);

        let callback = self.config.progress_callback.clone();
        if let Some(ref cb) = callback {
            notify("on_extraction_start", || cb.on_extraction_start(total));
        }

        if total == 0 {
            finish_render_thread(task.await);
            if let Some(ref cb) = callback {
                notify("on_extraction_complete", || cb.on_extraction_complete(0, 0));
            }
            info!("Document has no pages; returning empty text");
            return Ok(ExtractionOutput::empty(
                info,
                start.elapsed().as_millis() as u64,
            ));
        }

        // ── Dispatching ──────────────────────────────────────────────────
        let job = PageJob {
            threshold: self.config.threshold,
            timeout: self.config.page_timeout(),
        };
        let engine = Arc::clone(&self.engine);
        debug!("Dispatching {} pages to {} workers", total, workers);
        let mut completed = ReceiverStream::new(pages)
            .map(move |(index, raster)| {
                let unit = tokio::spawn(process_page(Arc::clone(&engine), index, raster, job));
                async move { (index, unit.await) }
            })
            .buffer_unordered(workers);

        // ── Collecting ───────────────────────────────────────────────────
        let mut slots: Vec<Option<PageText>> = vec![None; total];
        while let Some((index, joined)) = completed.next().await {
            let page = match joined {
                Ok(page) => page,
                Err(e) => {
                    let err = PageError::WorkerPanicked {
                        page: index + 1,
                        detail: e.to_string(),
                    };
                    warn!("{} (page text left empty)", err);
                    PageText::failed(index, err, 0)
                }
            };
            report_page(callback.as_deref(), &page, total);

            match slots.get_mut(index) {
                Some(slot) => *slot = Some(page),
                None => warn!(
                    "Discarding result for page {} beyond page count {}",
                    index + 1,
                    total
                ),
            }
        }
        drop(completed);
        finish_render_thread(task.await);

        // ── Joined ───────────────────────────────────────────────────────
        let pages: Vec<PageText> = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    let err = PageError::NotRendered { page: index + 1 };
                    warn!("{} (page text left empty)", err);
                    let page = PageText::failed(index, err, 0);
                    report_page(callback.as_deref(), &page, total);
                    page
                })
            })
            .collect();

        let output = ExtractionOutput::assemble(info, pages, start.elapsed().as_millis() as u64);
        let ExtractionStats {
            text_pages,
            blank_pages,
            failed_pages,
            total_duration_ms,
            ..
        } = output.stats;

        if let Some(ref cb) = callback {
            notify("on_extraction_complete", || {
                cb.on_extraction_complete(total, total - failed_pages)
            });
        }
        info!(
            "Extraction complete: {} pages ({} with text, {} blank, {} failed), {} chars, {}ms",
            total,
            text_pages,
            blank_pages,
            failed_pages,
            output.text.chars().count(),
            total_duration_ms
        );
        Ok(output)
    }

    /// Open `path` and read its [`DocumentInfo`] without running OCR.
    pub async fn inspect(&self, path: impl AsRef<Path>) -> Result<DocumentInfo, ExtractError> {
        let path = input::validate_local(path.as_ref())?;
        render::read_info(Arc::clone(&self.rasterizer), path).await
    }
}

/// Turn the result of a render thread that never opened the document into
/// the fatal error it ended with.
fn open_failure(
    joined: Result<Result<(), ExtractError>, tokio::task::JoinError>,
) -> ExtractError {
    match joined {
        Ok(Err(e)) => e,
        Ok(Ok(())) => ExtractError::Internal("render thread finished without opening the document".into()),
        Err(e) => ExtractError::Internal(format!("Render thread panicked: {}", e)),
    }
}

/// Log how a render thread ended after the document was opened. Pages it
/// never delivered are reported as [`PageError::NotRendered`] by the caller.
fn finish_render_thread(joined: Result<Result<(), ExtractError>, tokio::task::JoinError>) {
    match joined {
        Ok(Ok(())) => debug!("Render thread closed the document"),
        Ok(Err(e)) => warn!("Render thread ended with an error: {}", e),
        Err(e) => error!("Render thread panicked: {}", e),
    }
}

fn report_page(
    callback: Option<&dyn crate::progress::ExtractionProgressCallback>,
    page: &PageText,
    total: usize,
) {
    let Some(cb) = callback else {
        return;
    };
    match &page.error {
        None => notify("on_page_complete", || {
            cb.on_page_complete(page.page_num(), total, page.text.chars().count())
        }),
        Some(e) => notify("on_page_error", || {
            cb.on_page_error(page.page_num(), total, &e.to_string())
        }),
    }
}

/// Run one progress-callback method. A panic inside it is logged and does
/// not unwind into the pipeline.
fn notify(event: &str, f: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        warn!("Progress callback panicked in {}: {}", event, detail);
    }
}

// ── Convenience entry points ─────────────────────────────────────────────

/// Extract the text of `path` with a pdfium + tesseract pipeline.
///
/// Never fails; see [`OcrPipeline::extract`].
///
/// # Example
/// ```rust,no_run
/// use scan2text::{extract_text, ExtractionConfig};
///
/// # #[tokio::main]
/// # async fn main() {
/// let config = ExtractionConfig::default();
/// let text = extract_text("scan.pdf", &config).await;
/// println!("{}", text);
/// # }
/// ```
pub async fn extract_text(path: impl AsRef<Path>, config: &ExtractionConfig) -> String {
    OcrPipeline::new(config.clone()).extract(path).await
}

/// Synchronous wrapper around [`extract_text`].
///
/// Creates a temporary tokio runtime internally. Like [`extract_text`] it
/// never fails; a runtime that cannot be created is logged and yields `""`.
pub fn extract_text_sync(path: impl AsRef<Path>, config: &ExtractionConfig) -> String {
    match tokio::runtime::Runtime::new() {
        Ok(rt) => rt.block_on(extract_text(path, config)),
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            String::new()
        }
    }
}

/// Extract PDF bytes held in memory.
///
/// The bytes are written to a managed [`tempfile`] that is removed when
/// this function returns.
pub async fn extract_from_bytes(
    bytes: &[u8],
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ExtractError> {
    let tmp = input::write_temp_pdf(bytes)?;
    OcrPipeline::new(config.clone()).try_extract(tmp.path()).await
}

/// Extract `path` and write the text to `output_path`.
///
/// Uses atomic write (temp file + rename) so a reader never sees a partial
/// file.
pub async fn extract_to_file(
    path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<ExtractionStats, ExtractError> {
    let output = OcrPipeline::new(config.clone()).try_extract(path).await?;
    write_atomic(output_path.as_ref(), output.text.as_bytes())?;
    Ok(output.stats)
}

/// Write `contents` to `path` through a sibling temp file and a rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), ExtractError> {
    let write_failed = |source| ExtractError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(write_failed)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_failed)?;
    tmp.write_all(contents).map_err(write_failed)?;
    tmp.persist(path).map_err(|e| write_failed(e.error))?;
    Ok(())
}

/// Open `path` and read its [`DocumentInfo`] with the pdfium backend.
///
/// Does not need tesseract.
pub async fn inspect(
    path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<DocumentInfo, ExtractError> {
    OcrPipeline::new(config.clone()).inspect(path).await
}
