//! Pipeline behaviour with an in-memory document and a scripted OCR engine.
//!
//! Nothing here needs pdfium or tesseract. Each fake page is a bitmap whose
//! width is its 1-based page number; the scripted engine answers
//! `"page <width>"`, so the text of every segment names the page it came
//! from.

use async_trait::async_trait;
use image::{DynamicImage, GrayImage, Luma};
use scan2text::pipeline::preprocess::PreprocessedImage;
use scan2text::{
    ExtractError, ExtractionConfig, ExtractionProgressCallback, OcrEngine, OcrPipeline, PageError,
    PageRasterizer, RasterDocument, RecognitionError,
};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;

// ── Fakes ────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq)]
enum Page {
    Text,
    Blank,
    Broken,
}

struct FakeDocument {
    pages: Vec<Page>,
}

impl RasterDocument for FakeDocument {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn rasterize(&self, index: usize, _dpi: u32) -> Result<DynamicImage, PageError> {
        let width = index as u32 + 1;
        match self.pages[index] {
            Page::Text => Ok(DynamicImage::ImageLuma8(GrayImage::from_pixel(
                width,
                4,
                Luma([10]),
            ))),
            Page::Blank => Ok(DynamicImage::ImageLuma8(GrayImage::from_pixel(
                width,
                4,
                Luma([240]),
            ))),
            Page::Broken => Err(PageError::RasterisationFailed {
                page: index + 1,
                detail: "unsupported content stream".into(),
            }),
        }
    }
}

struct FakeRasterizer {
    pages: Vec<Page>,
}

impl FakeRasterizer {
    fn new(pages: &[Page]) -> Arc<Self> {
        Arc::new(Self {
            pages: pages.to_vec(),
        })
    }
}

impl PageRasterizer for FakeRasterizer {
    fn with_document(
        &self,
        _path: &Path,
        visit: &mut dyn FnMut(&dyn RasterDocument),
    ) -> Result<(), ExtractError> {
        visit(&FakeDocument {
            pages: self.pages.clone(),
        });
        Ok(())
    }
}

struct CorruptRasterizer;

impl PageRasterizer for CorruptRasterizer {
    fn with_document(
        &self,
        path: &Path,
        _visit: &mut dyn FnMut(&dyn RasterDocument),
    ) -> Result<(), ExtractError> {
        Err(ExtractError::CorruptPdf {
            path: path.to_path_buf(),
            detail: "trailer not found".into(),
        })
    }
}

#[derive(Clone, Copy)]
enum Behaviour {
    Fail,
    Hang,
    Panic,
}

/// Deterministic engine: blank images read as `""`, others as
/// `"page <width>"`. Per-page delays and faults are keyed by page number.
#[derive(Default)]
struct ScriptedEngine {
    delays_ms: HashMap<u32, u64>,
    faults: HashMap<u32, Behaviour>,
    finished: Mutex<Vec<u32>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedEngine {
    fn with_delays(delays: &[(u32, u64)]) -> Self {
        Self {
            delays_ms: delays.iter().copied().collect(),
            ..Default::default()
        }
    }

    fn with_fault(page: u32, behaviour: Behaviour) -> Self {
        Self {
            faults: HashMap::from([(page, behaviour)]),
            ..Default::default()
        }
    }

    fn finish_order(&self) -> Vec<u32> {
        self.finished.lock().unwrap().clone()
    }
}

#[async_trait]
impl OcrEngine for ScriptedEngine {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn recognize(&self, image: PreprocessedImage) -> Result<String, RecognitionError> {
        let page = image.width();
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(ms) = self.delays_ms.get(&page) {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }
        let result = match self.faults.get(&page) {
            Some(Behaviour::Fail) => Err(RecognitionError::Failed {
                status: "exit status: 1".into(),
                stderr: "Error in pixReadMem".into(),
            }),
            Some(Behaviour::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(String::new())
            }
            Some(Behaviour::Panic) => panic!("engine crashed on page {page}"),
            None if image.is_blank() => Ok(String::new()),
            None => Ok(format!("page {page}")),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.finished.lock().unwrap().push(page);
        result
    }
}

/// A file that passes the `%PDF` header check; its content is never parsed.
fn fake_pdf() -> NamedTempFile {
    let mut f = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
    f.write_all(b"%PDF-1.7\n% scanned fixture\n").unwrap();
    f
}

/// Route pipeline logs through the test harness (`--nocapture` shows them).
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("scan2text=debug")
        .with_test_writer()
        .try_init();
}

/// Log sink shared between a scoped subscriber and the test body.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Record pipeline logs for the current thread until the guard drops.
///
/// Only sees events emitted on the test thread, so use it with the
/// current-thread runtime.
fn capture_logs() -> (CapturedLogs, DefaultGuard) {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter("scan2text=debug")
        .with_writer(logs.clone())
        .with_ansi(false)
        .finish();
    (logs, tracing::subscriber::set_default(subscriber))
}

fn config(concurrency: usize) -> ExtractionConfig {
    ExtractionConfig::builder()
        .concurrency(concurrency)
        .build()
        .unwrap()
}

fn pipeline(
    pages: &[Page],
    engine: ScriptedEngine,
    concurrency: usize,
) -> (OcrPipeline, Arc<ScriptedEngine>) {
    let engine = Arc::new(engine);
    let p = OcrPipeline::with_components(
        config(concurrency),
        FakeRasterizer::new(pages),
        engine.clone(),
    );
    (p, engine)
}

// ── Segment count and order ──────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn n_pages_give_n_segments_in_page_order() {
    use Page::Text;
    let (p, _) = pipeline(&[Text; 5], ScriptedEngine::default(), 3);
    let pdf = fake_pdf();

    let text = p.extract(pdf.path()).await;
    let segments: Vec<&str> = text.split('\n').collect();
    assert_eq!(segments, vec!["page 1", "page 2", "page 3", "page 4", "page 5"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn order_survives_reversed_completion() {
    use Page::Text;
    // Earlier pages are slower, so they finish last.
    let engine = ScriptedEngine::with_delays(&[(1, 400), (2, 300), (3, 200), (4, 100), (5, 0)]);
    let (p, engine) = pipeline(&[Text; 5], engine, 5);
    let pdf = fake_pdf();

    let out = p.try_extract(pdf.path()).await.unwrap();
    assert_eq!(out.text, "page 1\npage 2\npage 3\npage 4\npage 5");
    for (i, page) in out.pages.iter().enumerate() {
        assert_eq!(page.index, i);
    }

    let finished = engine.finish_order();
    assert_eq!(finished.len(), 5);
    assert_ne!(finished.first(), Some(&1), "page 1 should not finish first: {finished:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_bounds_pages_in_flight() {
    use Page::Text;
    let delays: Vec<(u32, u64)> = (1..=8).map(|p| (p, 50)).collect();
    let (p, engine) = pipeline(&[Text; 8], ScriptedEngine::with_delays(&delays), 2);
    let pdf = fake_pdf();

    let out = p.try_extract(pdf.path()).await.unwrap();
    assert_eq!(out.pages.len(), 8);
    assert!(engine.max_in_flight.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn blank_middle_page_leaves_empty_segment() {
    use Page::{Blank, Text};
    let (p, _) = pipeline(&[Text, Blank, Text], ScriptedEngine::default(), 2);
    let pdf = fake_pdf();

    let out = p.try_extract(pdf.path()).await.unwrap();
    assert_eq!(out.text, "page 1\n\npage 3");
    assert_eq!(out.stats.blank_pages, 1);
    assert_eq!(out.stats.failed_pages, 0);
}

#[tokio::test]
async fn zero_page_document_is_empty_text() {
    let (p, engine) = pipeline(&[], ScriptedEngine::default(), 2);
    let pdf = fake_pdf();

    assert_eq!(p.extract(pdf.path()).await, "");
    let out = p.try_extract(pdf.path()).await.unwrap();
    assert!(out.pages.is_empty());
    assert_eq!(out.info.page_count, 0);
    assert!(engine.finish_order().is_empty());
}

#[tokio::test]
async fn repeated_extraction_is_identical() {
    use Page::{Blank, Text};
    let (p, _) = pipeline(&[Text, Text, Blank, Text], ScriptedEngine::default(), 4);
    let pdf = fake_pdf();

    let first = p.extract(pdf.path()).await;
    let second = p.extract(pdf.path()).await;
    assert_eq!(first, second);
    assert_eq!(first, "page 1\npage 2\n\npage 4");
}

// ── Page-scoped failures ─────────────────────────────────────────────────────

#[tokio::test]
async fn failed_recognition_empties_only_that_page() {
    use Page::Text;
    let (logs, _guard) = capture_logs();
    let (p, _) = pipeline(&[Text; 3], ScriptedEngine::with_fault(2, Behaviour::Fail), 3);
    let pdf = fake_pdf();

    let out = p.try_extract(pdf.path()).await.unwrap();
    assert_eq!(out.text, "page 1\n\npage 3");
    assert!(matches!(
        out.pages[1].error,
        Some(PageError::RecognitionFailed { page: 2, .. })
    ));
    assert_eq!(out.stats.failed_pages, 1);
    assert_eq!(p.extract(pdf.path()).await, "page 1\n\npage 3");

    let logged = logs.contents();
    assert!(logged.contains("WARN"), "{logged}");
    assert!(logged.contains("page text left empty"), "{logged}");
    assert!(logged.contains("pixReadMem"), "{logged}");
}

#[tokio::test]
async fn render_failure_empties_only_that_page() {
    use Page::{Broken, Text};
    let (p, engine) = pipeline(&[Broken, Text, Text], ScriptedEngine::default(), 2);
    let pdf = fake_pdf();

    let out = p.try_extract(pdf.path()).await.unwrap();
    assert_eq!(out.text, "\npage 2\npage 3");
    assert!(matches!(
        out.pages[0].error,
        Some(PageError::RasterisationFailed { page: 1, .. })
    ));
    // The engine never saw the broken page.
    let mut seen = engine.finish_order();
    seen.sort_unstable();
    assert_eq!(seen, vec![2, 3]);
}

#[tokio::test]
async fn engine_panic_is_contained_to_its_page() {
    use Page::Text;
    let (p, _) = pipeline(&[Text; 3], ScriptedEngine::with_fault(3, Behaviour::Panic), 3);
    let pdf = fake_pdf();

    let out = p.try_extract(pdf.path()).await.unwrap();
    assert_eq!(out.text, "page 1\npage 2\n");
    assert!(matches!(
        out.pages[2].error,
        Some(PageError::WorkerPanicked { page: 3, .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn hung_page_times_out_and_is_left_empty() {
    init_tracing();
    use Page::Text;
    let config = ExtractionConfig::builder()
        .concurrency(3)
        .page_timeout_secs(1)
        .build()
        .unwrap();
    let p = OcrPipeline::with_components(
        config,
        FakeRasterizer::new(&[Text; 3]),
        Arc::new(ScriptedEngine::with_fault(2, Behaviour::Hang)),
    );
    let pdf = fake_pdf();

    let out = tokio::time::timeout(Duration::from_secs(30), p.try_extract(pdf.path()))
        .await
        .expect("a hung page must not block the document")
        .unwrap();
    assert_eq!(out.text, "page 1\n\npage 3");
    assert_eq!(
        out.pages[1].error,
        Some(PageError::Timeout { page: 2, secs: 1 })
    );
}

// ── Fatal paths ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn nonexistent_path_extracts_to_empty_string() {
    let (logs, _guard) = capture_logs();
    let (p, _) = pipeline(&[Page::Text], ScriptedEngine::default(), 1);
    let missing = Path::new("/definitely/not/here/scan.pdf");

    assert_eq!(p.extract(missing).await, "");
    let logged = logs.contents();
    assert!(logged.contains("ERROR"), "{logged}");
    assert!(
        logged.contains("Extraction of '/definitely/not/here/scan.pdf' failed"),
        "{logged}"
    );
    assert!(matches!(
        p.try_extract(missing).await,
        Err(ExtractError::FileNotFound { .. })
    ));
}

#[tokio::test]
async fn non_pdf_file_extracts_to_empty_string() {
    let (logs, _guard) = capture_logs();
    let (p, _) = pipeline(&[Page::Text], ScriptedEngine::default(), 1);
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"PK\x03\x04 this is a zip archive").unwrap();

    assert_eq!(p.extract(file.path()).await, "");
    let logged = logs.contents();
    assert!(logged.contains("ERROR"), "{logged}");
    assert!(
        logged.contains(&format!("Extraction of '{}' failed", file.path().display())),
        "{logged}"
    );
    match p.try_extract(file.path()).await {
        Err(ExtractError::NotAPdf { magic, .. }) => assert_eq!(magic, b"PK\x03\x04"),
        other => panic!("expected NotAPdf, got {other:?}"),
    }
}

#[tokio::test]
async fn unopenable_document_extracts_to_empty_string() {
    let (logs, _guard) = capture_logs();
    let p = OcrPipeline::with_components(
        config(2),
        Arc::new(CorruptRasterizer),
        Arc::new(ScriptedEngine::default()),
    );
    let pdf = fake_pdf();

    assert_eq!(p.extract(pdf.path()).await, "");
    let logged = logs.contents();
    assert!(logged.contains("failed"), "{logged}");
    assert!(logged.contains("trailer not found"), "{logged}");
    assert!(matches!(
        p.try_extract(pdf.path()).await,
        Err(ExtractError::CorruptPdf { .. })
    ));
}

#[tokio::test]
async fn zero_concurrency_in_hand_built_config_still_finishes() {
    use Page::Text;
    let mut config = ExtractionConfig::default();
    config.concurrency = 0;
    let p = OcrPipeline::with_components(
        config,
        FakeRasterizer::new(&[Text, Text]),
        Arc::new(ScriptedEngine::default()),
    );
    let pdf = fake_pdf();

    let text = tokio::time::timeout(Duration::from_secs(5), p.extract(pdf.path()))
        .await
        .expect("extract() returned");
    assert_eq!(text, "page 1\npage 2");
}

// ── Progress and metadata ────────────────────────────────────────────────────

#[derive(Default)]
struct Tally {
    started_with: AtomicUsize,
    completed: AtomicUsize,
    errors: AtomicUsize,
    finished_ok: AtomicUsize,
}

impl ExtractionProgressCallback for Tally {
    fn on_extraction_start(&self, total_pages: usize) {
        self.started_with.store(total_pages, Ordering::SeqCst);
    }

    fn on_page_complete(&self, _page_num: usize, _total: usize, _text_len: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_page_error(&self, _page_num: usize, _total: usize, _error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }

    fn on_extraction_complete(&self, _total_pages: usize, success_count: usize) {
        self.finished_ok.store(success_count, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn progress_callback_sees_every_page() {
    use Page::{Blank, Broken, Text};
    let tally = Arc::new(Tally::default());
    let config = ExtractionConfig::builder()
        .concurrency(2)
        .progress_callback(tally.clone())
        .build()
        .unwrap();
    let p = OcrPipeline::with_components(
        config,
        FakeRasterizer::new(&[Text, Broken, Blank, Text]),
        Arc::new(ScriptedEngine::default()),
    );
    let pdf = fake_pdf();

    p.try_extract(pdf.path()).await.unwrap();
    assert_eq!(tally.started_with.load(Ordering::SeqCst), 4);
    assert_eq!(tally.completed.load(Ordering::SeqCst), 3);
    assert_eq!(tally.errors.load(Ordering::SeqCst), 1);
    assert_eq!(tally.finished_ok.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn inspect_reports_page_count_without_ocr() {
    use Page::Text;
    let (p, engine) = pipeline(&[Text; 4], ScriptedEngine::default(), 2);
    let pdf = fake_pdf();

    let info = p.inspect(pdf.path()).await.unwrap();
    assert_eq!(info.page_count, 4);
    assert!(engine.finish_order().is_empty());
}

struct PanickingCallback;

impl ExtractionProgressCallback for PanickingCallback {
    fn on_page_complete(&self, page_num: usize, _total: usize, _text_len: usize) {
        panic!("progress bar gone on page {page_num}");
    }

    fn on_extraction_complete(&self, _total_pages: usize, _success_count: usize) {
        panic!("progress bar gone at the end");
    }
}

#[tokio::test]
async fn panicking_progress_callback_does_not_abort_extraction() {
    use Page::Text;
    let (logs, _guard) = capture_logs();
    let config = ExtractionConfig::builder()
        .concurrency(2)
        .progress_callback(Arc::new(PanickingCallback))
        .build()
        .unwrap();
    let p = OcrPipeline::with_components(
        config,
        FakeRasterizer::new(&[Text; 3]),
        Arc::new(ScriptedEngine::default()),
    );
    let pdf = fake_pdf();

    let out = p.try_extract(pdf.path()).await.unwrap();
    assert_eq!(out.text, "page 1\npage 2\npage 3");
    assert_eq!(out.stats.failed_pages, 0);
    let logged = logs.contents();
    assert!(logged.contains("Progress callback panicked in on_page_complete"), "{logged}");
}
