//! Persistent record of processed documents.
//!
//! One JSON file holds an array of [`DocumentRecord`]s. Each record pairs the
//! raw OCR text with its structured rewrite under a sequential ID
//! (`DOC_0001`, `DOC_0002`, …). The whole file is rewritten on every append,
//! atomically, so a crash mid-write leaves the previous version intact.

use crate::error::ExtractError;
use crate::extract::write_atomic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Prefix of document IDs.
pub const ID_PREFIX: &str = "DOC_";

/// Zero-padded width of the numeric part of document IDs.
pub const ID_WIDTH: usize = 4;

/// Default location of the store, relative to the working directory.
pub const DEFAULT_STORE_PATH: &str = "artifacts/extracted_data.json";

/// One processed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub extracted_text: String,
    pub formatted_text: String,
    pub created_at: DateTime<Utc>,
}

/// Next ID after the highest numeric suffix among `existing` IDs that start
/// with `prefix`, zero-padded to `width` digits.
///
/// IDs with another prefix, a non-numeric suffix, or a number with no
/// successor in `u64` are ignored. With no usable ID the sequence starts at 1.
pub fn generate_sequential_id<S: AsRef<str>>(existing: &[S], prefix: &str, width: usize) -> String {
    let next = existing
        .iter()
        .filter_map(|id| id.as_ref().strip_prefix(prefix))
        .filter_map(|n| n.parse::<u64>().ok())
        .filter_map(|n| n.checked_add(1))
        .max()
        .unwrap_or(1);
    format!("{prefix}{next:0width$}")
}

/// JSON-file-backed list of [`DocumentRecord`]s.
#[derive(Debug)]
pub struct RecordStore {
    path: PathBuf,
    records: Vec<DocumentRecord>,
}

impl RecordStore {
    /// Load the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ExtractError> {
        let path = path.into();
        let records = match std::fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => Vec::new(),
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| ExtractError::StoreReadFailed {
                path: path.clone(),
                detail: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No record store at {}; starting empty", path.display());
                Vec::new()
            }
            Err(e) => {
                return Err(ExtractError::StoreReadFailed {
                    path,
                    detail: e.to_string(),
                })
            }
        };
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[DocumentRecord] {
        &self.records
    }

    pub fn get(&self, id: &str) -> Option<&DocumentRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// The ID the next appended record will receive.
    pub fn next_id(&self) -> String {
        let ids: Vec<&str> = self.records.iter().map(|r| r.id.as_str()).collect();
        generate_sequential_id(&ids, ID_PREFIX, ID_WIDTH)
    }

    /// Append a record and persist the store.
    ///
    /// The in-memory list is only updated once the file was written.
    pub fn append(
        &mut self,
        extracted_text: impl Into<String>,
        formatted_text: impl Into<String>,
    ) -> Result<DocumentRecord, ExtractError> {
        let record = DocumentRecord {
            id: self.next_id(),
            extracted_text: extracted_text.into(),
            formatted_text: formatted_text.into(),
            created_at: Utc::now(),
        };

        self.records.push(record.clone());
        if let Err(e) = self.save() {
            self.records.pop();
            return Err(e);
        }
        info!("Saved record {} to {}", record.id, self.path.display());
        Ok(record)
    }

    fn save(&self) -> Result<(), ExtractError> {
        let json = serde_json::to_vec_pretty(&self.records)
            .map_err(|e| ExtractError::Internal(format!("record serialisation: {e}")))?;
        write_atomic(&self.path, &json)
    }
}
