//! Input validation: make sure a path names a readable PDF before pdfium
//! sees it.
//!
//! pdfium reports every open failure as an opaque error code. Checking
//! existence, permissions and the `%PDF` header up front turns the common
//! mistakes (typo in the path, a PNG passed by accident) into precise
//! [`ExtractError`] variants.

use crate::error::ExtractError;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// How far into the file the `%PDF` header may start. Some producers emit
/// junk bytes before it and readers are expected to tolerate up to 1 KiB.
const HEADER_SEARCH_WINDOW: usize = 1024;

const PDF_MAGIC: &[u8] = b"%PDF";

/// Validate a local PDF path: exists, readable, carries a PDF header.
pub fn validate_local(path: &Path) -> Result<PathBuf, ExtractError> {
    if !path.exists() {
        return Err(ExtractError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(ExtractError::PermissionDenied {
                path: path.to_path_buf(),
            });
        }
        Err(_) => {
            return Err(ExtractError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
    };

    let mut head = Vec::with_capacity(HEADER_SEARCH_WINDOW);
    Read::by_ref(&mut file)
        .take(HEADER_SEARCH_WINDOW as u64)
        .read_to_end(&mut head)
        .map_err(|e| ExtractError::CorruptPdf {
            path: path.to_path_buf(),
            detail: format!("cannot read header: {e}"),
        })?;

    if !has_pdf_header(&head) {
        return Err(ExtractError::NotAPdf {
            path: path.to_path_buf(),
            magic: head.iter().take(4).copied().collect(),
        });
    }

    debug!("Validated local PDF: {}", path.display());
    Ok(path.to_path_buf())
}

/// True when `%PDF` occurs within the first bytes of `head`.
pub fn has_pdf_header(head: &[u8]) -> bool {
    head.windows(PDF_MAGIC.len()).any(|w| w == PDF_MAGIC)
}

/// Write in-memory PDF bytes to a managed temporary file.
///
/// The file is deleted when the returned handle is dropped.
pub fn write_temp_pdf(bytes: &[u8]) -> Result<NamedTempFile, ExtractError> {
    let mut tmp = tempfile::Builder::new()
        .prefix("scan2text-")
        .suffix(".pdf")
        .tempfile()
        .map_err(|e| ExtractError::Internal(format!("tempfile: {e}")))?;
    tmp.write_all(bytes)
        .map_err(|e| ExtractError::Internal(format!("tempfile write: {e}")))?;
    tmp.flush()
        .map_err(|e| ExtractError::Internal(format!("tempfile flush: {e}")))?;
    Ok(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_file_not_found() {
        let err = validate_local(Path::new("/definitely/not/here.pdf")).unwrap_err();
        assert!(matches!(err, ExtractError::FileNotFound { .. }));
    }

    #[test]
    fn png_is_not_a_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.pdf");
        std::fs::write(&path, b"\x89PNG\r\n\x1a\n0000").unwrap();

        match validate_local(&path).unwrap_err() {
            ExtractError::NotAPdf { magic, .. } => assert_eq!(magic, b"\x89PNG".to_vec()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_file_is_not_a_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.pdf");
        std::fs::write(&path, b"").unwrap();
        assert!(matches!(
            validate_local(&path).unwrap_err(),
            ExtractError::NotAPdf { .. }
        ));
    }

    #[test]
    fn header_after_leading_junk_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.pdf");
        std::fs::write(&path, b"\r\n\r\n%PDF-1.4\n%%EOF").unwrap();
        assert_eq!(validate_local(&path).unwrap(), path);
    }

    #[test]
    fn temp_pdf_holds_bytes() {
        let tmp = write_temp_pdf(b"%PDF-1.7\n").unwrap();
        let read = std::fs::read(tmp.path()).unwrap();
        assert_eq!(read, b"%PDF-1.7\n");
        assert_eq!(tmp.path().extension().unwrap(), "pdf");
    }
}
