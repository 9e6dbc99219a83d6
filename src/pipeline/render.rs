//! PDF rasterisation: open a document and render its pages to `DynamicImage`.
//!
//! ## Why one render thread?
//!
//! A pdfium document handle borrows the library bindings and is not `Send`,
//! so pages of one document cannot be rendered from several threads at
//! once. Rendering therefore happens on a single `spawn_blocking` thread
//! that owns the document for its whole lifetime and hands each bitmap to
//! the OCR workers over a bounded channel. The channel capacity caps how
//! many 300 DPI bitmaps (~35 MB each for A4 RGBA) are alive at once.
//!
//! ## The `PageRasterizer` seam
//!
//! The pipeline only sees [`PageRasterizer`] and [`RasterDocument`]. The
//! production implementation is [`PdfiumRasterizer`]; tests substitute an
//! in-memory document.

use crate::config::ExtractionConfig;
use crate::error::{ExtractError, PageError};
use crate::output::DocumentInfo;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// PDF user space has 72 units per inch.
const POINTS_PER_INCH: f32 = 72.0;

/// Cap on either rendered dimension, independent of DPI. An A0 poster at
/// 300 DPI would otherwise allocate ~560 MB for one page.
pub const MAX_RENDERED_EDGE: i32 = 10_000;

/// An opened document whose pages can be rendered one at a time.
pub trait RasterDocument {
    /// Number of pages in the document.
    fn page_count(&self) -> usize;

    /// Render the page at 0-based `index` at `dpi`.
    fn rasterize(&self, index: usize, dpi: u32) -> Result<DynamicImage, PageError>;

    /// Page count plus whatever metadata the backend exposes.
    fn info(&self) -> DocumentInfo {
        DocumentInfo::with_page_count(self.page_count())
    }
}

/// Opens PDF documents for rasterisation.
///
/// The document only lives for the duration of `visit`; it is closed when
/// `with_document` returns, on success and on error alike.
pub trait PageRasterizer: Send + Sync {
    /// Open `path` and hand the document to `visit`.
    ///
    /// Fails with a fatal [`ExtractError`] when the document cannot be
    /// opened; `visit` is not called in that case.
    fn with_document(
        &self,
        path: &Path,
        visit: &mut dyn FnMut(&dyn RasterDocument),
    ) -> Result<(), ExtractError>;
}

// ── pdfium backend ───────────────────────────────────────────────────────

/// [`PageRasterizer`] backed by the pdfium library.
///
/// The library is bound on every `with_document` call, inside the thread
/// that uses it, so the rasterizer itself holds no pdfium state.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRasterizer {
    library_path: Option<PathBuf>,
    password: Option<String>,
}

impl PdfiumRasterizer {
    pub fn new(library_path: Option<PathBuf>, password: Option<String>) -> Self {
        Self {
            library_path,
            password,
        }
    }

    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self::new(config.pdfium_library_path.clone(), config.password.clone())
    }

    /// Bind pdfium: explicit path, then `PDFIUM_LIB_PATH`, then the working
    /// directory, then the system library.
    fn bind(&self) -> Result<Pdfium, ExtractError> {
        let explicit = self
            .library_path
            .clone()
            .or_else(|| std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from));

        let bindings = match explicit {
            Some(path) => {
                let lib = if path.is_dir() {
                    path.join(Pdfium::pdfium_platform_library_name())
                } else {
                    path
                };
                debug!("Binding pdfium from {}", lib.display());
                Pdfium::bind_to_library(&lib)
            }
            None => Pdfium::bind_to_library(
                PathBuf::from(".").join(Pdfium::pdfium_platform_library_name()),
            )
            .or_else(|_| Pdfium::bind_to_system_library()),
        }
        .map_err(|e| ExtractError::PdfiumBindingFailed(format!("{e:?}")))?;

        Ok(Pdfium::new(bindings))
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn with_document(
        &self,
        path: &Path,
        visit: &mut dyn FnMut(&dyn RasterDocument),
    ) -> Result<(), ExtractError> {
        let pdfium = self.bind()?;
        let password = self.password.as_deref();

        let document = pdfium
            .load_pdf_from_file(path, password)
            .map_err(|e| classify_open_error(path, password.is_some(), format!("{e:?}")))?;

        let doc = PdfiumDocument { document };
        info!("PDF loaded: {} pages", doc.page_count());
        visit(&doc);
        Ok(())
    }
}

/// Map a pdfium load failure onto the fatal error taxonomy.
fn classify_open_error(path: &Path, had_password: bool, detail: String) -> ExtractError {
    if detail.contains("Password") || detail.contains("password") {
        if had_password {
            ExtractError::WrongPassword {
                path: path.to_path_buf(),
            }
        } else {
            ExtractError::PasswordRequired {
                path: path.to_path_buf(),
            }
        }
    } else {
        ExtractError::CorruptPdf {
            path: path.to_path_buf(),
            detail,
        }
    }
}

struct PdfiumDocument<'a> {
    document: PdfDocument<'a>,
}

impl RasterDocument for PdfiumDocument<'_> {
    fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    fn rasterize(&self, index: usize, dpi: u32) -> Result<DynamicImage, PageError> {
        let page_num = index + 1;
        let page = self
            .document
            .pages()
            .get(index as u16)
            .map_err(|e| PageError::RasterisationFailed {
                page: page_num,
                detail: format!("{e:?}"),
            })?;

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(dpi as f32 / POINTS_PER_INCH)
            .set_maximum_width(MAX_RENDERED_EDGE)
            .set_maximum_height(MAX_RENDERED_EDGE);

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| PageError::RasterisationFailed {
                page: page_num,
                detail: format!("{e:?}"),
            })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px at {} DPI",
            page_num,
            image.width(),
            image.height(),
            dpi
        );
        Ok(image)
    }

    fn info(&self) -> DocumentInfo {
        let metadata = self.document.metadata();
        let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
            metadata.get(tag).and_then(|t| {
                let v = t.value().trim().to_string();
                if v.is_empty() {
                    None
                } else {
                    Some(v)
                }
            })
        };

        DocumentInfo {
            page_count: self.page_count(),
            title: get_meta(PdfDocumentMetadataTagType::Title),
            author: get_meta(PdfDocumentMetadataTagType::Author),
            subject: get_meta(PdfDocumentMetadataTagType::Subject),
            creator: get_meta(PdfDocumentMetadataTagType::Creator),
            producer: get_meta(PdfDocumentMetadataTagType::Producer),
            pdf_version: Some(format!("{:?}", self.document.version())),
        }
    }
}

// ── Render thread ────────────────────────────────────────────────────────

/// A rendered page tagged with its 0-based index.
pub(crate) type RenderedPage = (usize, Result<DynamicImage, PageError>);

/// Handles to a running render thread.
pub(crate) struct RenderThread {
    /// Resolves once the document is open; dropped unsent if opening failed.
    pub opened: oneshot::Receiver<DocumentInfo>,
    /// Rendered pages in page order.
    pub pages: mpsc::Receiver<RenderedPage>,
    /// Completes when the document has been closed.
    pub task: JoinHandle<Result<(), ExtractError>>,
}

/// Open `path` on a blocking thread and stream its pages.
///
/// At most `capacity` rendered pages wait in the channel. Rendering stops
/// early when the receiving side is dropped.
pub(crate) fn spawn_render_thread(
    rasterizer: Arc<dyn PageRasterizer>,
    path: PathBuf,
    dpi: u32,
    capacity: usize,
) -> RenderThread {
    let (open_tx, opened) = oneshot::channel();
    let (page_tx, pages) = mpsc::channel(capacity.max(1));

    let task = tokio::task::spawn_blocking(move || {
        let mut open_tx = Some(open_tx);
        rasterizer.with_document(&path, &mut |doc: &dyn RasterDocument| {
            let info = doc.info();
            let total = info.page_count;
            if let Some(tx) = open_tx.take() {
                let _ = tx.send(info);
            }

            for index in 0..total {
                let raster = doc.rasterize(index, dpi);
                if let Err(ref e) = raster {
                    warn!("{}", e);
                }
                if page_tx.blocking_send((index, raster)).is_err() {
                    debug!("Page receiver dropped; stopping render after page {}", index + 1);
                    break;
                }
            }
        })
    });

    RenderThread {
        opened,
        pages,
        task,
    }
}

/// Open a document only to read its [`DocumentInfo`].
pub(crate) async fn read_info(
    rasterizer: Arc<dyn PageRasterizer>,
    path: PathBuf,
) -> Result<DocumentInfo, ExtractError> {
    tokio::task::spawn_blocking(move || {
        let mut info = None;
        rasterizer.with_document(&path, &mut |doc: &dyn RasterDocument| {
            info = Some(doc.info());
        })?;
        info.ok_or_else(|| ExtractError::Internal("document was never opened".into()))
    })
    .await
    .map_err(|e| ExtractError::Internal(format!("Metadata task panicked: {}", e)))?
}
