//! Append-only diagnosis ledger persisted as a single JSON document
//!
//! Layout on disk: `{ "<username>": [ {photo_path, timestamp, verdict, rationale}, ... ] }`.
//! Every append rewrites the whole document under one lock, via a temp file
//! and rename so readers never observe a torn write.

use crate::config::LoadError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

type Document = BTreeMap<String, Vec<DiagnosisEntry>>;

/// One recorded classification outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosisEntry {
    pub photo_path: String,
    pub timestamp: String,
    pub verdict: bool,
    pub rationale: String,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("diagnosis requires a username")]
    MissingUsername,
    #[error("ledger write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("ledger serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug)]
pub struct DiagnosisLedger {
    path: PathBuf,
    entries: Mutex<Document>,
}

impl DiagnosisLedger {
    /// Open the ledger at `path`, creating an empty document if the file is
    /// absent or empty. Existing malformed content is an error.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, LoadError> {
        let path = path.into();

        let existing = match std::fs::read(&path) {
            Ok(data) => Some(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(LoadError::io(&path, e)),
        };

        let document = match existing {
            Some(data) if !data.iter().all(u8::is_ascii_whitespace) => {
                serde_json::from_slice::<Document>(&data)
                    .map_err(|e| LoadError::malformed(&path, e))?
            }
            _ => {
                let empty = Document::new();
                write_document(&path, &empty).map_err(|e| match e {
                    LedgerError::Io(source) => LoadError::io(&path, source),
                    other => LoadError::invalid(&path, other.to_string()),
                })?;
                tracing::info!(path = %path.display(), "Initialized empty diagnosis ledger");
                empty
            }
        };

        tracing::info!(
            path = %path.display(),
            users = document.len(),
            "Diagnosis ledger loaded"
        );

        Ok(Self {
            path,
            entries: Mutex::new(document),
        })
    }

    #[allow(dead_code)] // Inspection API
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an entry stamped with the current UTC time and persist the ledger.
    ///
    /// The lock is held across the in-memory append and the file rewrite. On a
    /// failed write the in-memory append is rolled back.
    pub async fn record(
        &self,
        username: &str,
        photo_path: &Path,
        verdict: bool,
        rationale: &str,
    ) -> Result<DiagnosisEntry, LedgerError> {
        if username.trim().is_empty() {
            return Err(LedgerError::MissingUsername);
        }

        let entry = DiagnosisEntry {
            photo_path: photo_path.display().to_string(),
            timestamp: Utc::now().format(TIMESTAMP_FORMAT).to_string(),
            verdict,
            rationale: rationale.to_string(),
        };

        let mut entries = self.entries.lock().await;
        entries
            .entry(username.to_string())
            .or_default()
            .push(entry.clone());

        let snapshot = serde_json::to_vec_pretty(&*entries);
        let written = match snapshot {
            Ok(bytes) => write_bytes(&self.path, bytes).await,
            Err(e) => Err(e.into()),
        };

        if let Err(e) = written {
            if let Some(list) = entries.get_mut(username) {
                list.pop();
                if list.is_empty() {
                    entries.remove(username);
                }
            }
            return Err(e);
        }

        tracing::info!(
            username,
            verdict,
            photo = %entry.photo_path,
            "Diagnosis recorded"
        );
        Ok(entry)
    }

    /// Entries recorded for `username`, oldest first
    #[allow(dead_code)] // Inspection API
    pub async fn entries_for(&self, username: &str) -> Vec<DiagnosisEntry> {
        self.entries
            .lock()
            .await
            .get(username)
            .cloned()
            .unwrap_or_default()
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(ToOwned::to_owned).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_document(path: &Path, document: &Document) -> Result<(), LedgerError> {
    let bytes = serde_json::to_vec_pretty(document)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = temp_path(path);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

async fn write_bytes(path: &Path, bytes: Vec<u8>) -> Result<(), LedgerError> {
    let tmp = temp_path(path);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
