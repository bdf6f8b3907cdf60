//! Folder intake: finds books on disk and hands them to the ingestion queue.

use crate::error::{IngestError, ValidationError};
use crate::extractor::DocumentFormat;
use crate::models::Document;
use crate::pipeline::IngestionOrchestrator;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

pub fn discover_books(folder: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(folder)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(DocumentFormat::from_name)
                .is_some()
        })
        .map(|entry| entry.into_path())
        .collect();

    files.sort_unstable();
    files
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Content-addressed id, so re-ingesting an unchanged file targets the same document.
pub fn document_id_for(bytes: &[u8]) -> String {
    digest_bytes(bytes)[..32].to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedBook {
    pub path: PathBuf,
    pub document_id: String,
    pub job_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedBook {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct FolderReport {
    pub queued: Vec<QueuedBook>,
    pub skipped: Vec<SkippedBook>,
}

/// Uploads and enqueues every book under `folder`. Unreadable files are skipped, not fatal.
pub async fn ingest_folder(folder: &Path, orchestrator: &IngestionOrchestrator) -> Result<FolderReport, IngestError> {
    let files = discover_books(folder);
    if files.is_empty() {
        return Err(ValidationError::new(
            "folder",
            format!("no pdf or djvu files found in {}", folder.display()),
        )
        .into());
    }

    let mut report = FolderReport::default();
    for path in files {
        match submit_file(&path, orchestrator).await {
            Ok(queued) => report.queued.push(queued),
            Err(error) => {
                warn!(path = %path.display(), error = %error, "skipping book");
                report.skipped.push(SkippedBook {
                    path,
                    reason: error.to_string(),
                });
            }
        }
    }

    info!(
        folder = %folder.display(),
        queued = report.queued.len(),
        skipped = report.skipped.len(),
        "folder submitted"
    );
    Ok(report)
}

async fn submit_file(path: &Path, orchestrator: &IngestionOrchestrator) -> Result<QueuedBook, IngestError> {
    let bytes = tokio::fs::read(path).await?;
    let name = path.file_name().and_then(|name| name.to_str()).unwrap_or_default();
    let format = DocumentFormat::from_name(name)
        .ok_or_else(|| ValidationError::new("path", format!("unsupported file {}", path.display())))?;

    let document_id = document_id_for(&bytes);
    let title = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(&document_id)
        .to_string();
    let object_key = format!("books/{document_id}.{}", format.extension());

    let job = orchestrator
        .submit(Document::new(&document_id, title, "unknown"), &object_key, bytes)
        .await?;
    Ok(QueuedBook {
        path: path.to_path_buf(),
        document_id,
        job_id: job.id,
    })
}
