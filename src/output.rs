//! Result types returned by the extraction pipeline.

use crate::error::PageError;
use serde::{Deserialize, Serialize};

/// Separator placed between page texts in the assembled document.
pub const PAGE_SEPARATOR: &str = "\n";

/// OCR output for one page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageText {
    /// 0-based page index in the document.
    pub index: usize,
    /// Recognised text; empty for blank or failed pages.
    pub text: String,
    /// Wall-clock time spent preprocessing and recognising the page.
    pub duration_ms: u64,
    /// Why the page produced no text, if it failed.
    pub error: Option<PageError>,
}

impl PageText {
    /// A page whose processing failed; contributes an empty string.
    pub fn failed(index: usize, error: PageError, duration_ms: u64) -> Self {
        Self {
            index,
            text: String::new(),
            duration_ms,
            error: Some(error),
        }
    }

    /// 1-indexed page number.
    pub fn page_num(&self) -> usize {
        self.index + 1
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Basic facts about a PDF, gathered without running OCR.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub page_count: usize,
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub pdf_version: Option<String>,
}

impl DocumentInfo {
    /// Info carrying only a page count.
    pub fn with_page_count(page_count: usize) -> Self {
        Self {
            page_count,
            ..Default::default()
        }
    }
}

/// Aggregate numbers for one extraction run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub total_pages: usize,
    /// Pages that produced non-empty text.
    pub text_pages: usize,
    /// Pages that succeeded but produced no text.
    pub blank_pages: usize,
    /// Pages replaced by an empty string because of a [`PageError`].
    pub failed_pages: usize,
    pub total_duration_ms: u64,
    /// Summed per-page OCR time; exceeds `total_duration_ms` under concurrency.
    pub ocr_duration_ms: u64,
}

impl ExtractionStats {
    pub(crate) fn from_pages(pages: &[PageText], total_duration_ms: u64) -> Self {
        let failed_pages = pages.iter().filter(|p| !p.is_ok()).count();
        let text_pages = pages
            .iter()
            .filter(|p| p.is_ok() && !p.text.trim().is_empty())
            .count();
        Self {
            total_pages: pages.len(),
            text_pages,
            blank_pages: pages.len() - failed_pages - text_pages,
            failed_pages,
            total_duration_ms,
            ocr_duration_ms: pages.iter().map(|p| p.duration_ms).sum(),
        }
    }
}

/// Everything produced by one extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutput {
    /// Page texts joined by [`PAGE_SEPARATOR`] in page order.
    pub text: String,
    /// One entry per page, `pages[i].index == i`.
    pub pages: Vec<PageText>,
    pub info: DocumentInfo,
    pub stats: ExtractionStats,
}

impl ExtractionOutput {
    /// Assemble the output from per-page results already ordered by index.
    pub(crate) fn assemble(info: DocumentInfo, pages: Vec<PageText>, total_duration_ms: u64) -> Self {
        let text = join_pages(&pages);
        let stats = ExtractionStats::from_pages(&pages, total_duration_ms);
        Self {
            text,
            pages,
            info,
            stats,
        }
    }

    /// Output for a document without pages.
    pub(crate) fn empty(info: DocumentInfo, total_duration_ms: u64) -> Self {
        Self::assemble(info, Vec::new(), total_duration_ms)
    }

    /// Errors of all failed pages, in page order.
    pub fn page_errors(&self) -> impl Iterator<Item = &PageError> {
        self.pages.iter().filter_map(|p| p.error.as_ref())
    }
}

/// Join page texts with [`PAGE_SEPARATOR`].
pub fn join_pages(pages: &[PageText]) -> String {
    pages
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join(PAGE_SEPARATOR)
}
