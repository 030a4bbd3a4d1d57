//! Export pipeline: render a selection of articles to a file, record it in
//! the export history and manage the files on disk.
//!
//! A file and its history row appear together: the rendered bytes go to a
//! hidden temp file that is renamed into place, and only then is the history
//! row committed (together with the `exported` flags). If that commit fails
//! the renamed file is removed again.

mod render;

pub use render::analysis_prompt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::settings::Settings;
use crate::storage::{Article, Database, DatabaseError, ExportCommit, ExportRecord};

pub const DEFAULT_EXPORT_LIMIT: i64 = 100;
pub const MAX_EXPORT_LIMIT: i64 = 1000;

const MAX_FILENAME_LEN: usize = 255;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("No articles to export")]
    NothingToExport,
    #[error("Invalid export filename: {0}")]
    InvalidFilename(String),
    #[error("Export not found: {0}")]
    NotFound(String),
    #[error("Export file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Storage(#[from] DatabaseError),
}

// ============================================================================
// Export types
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportType {
    /// Human-readable document for a notebook-style analysis tool
    #[default]
    Notebooklm,
    /// One JSON record per line
    Jsonl,
    /// Bare URL list
    Urls,
}

impl ExportType {
    const ALL: [ExportType; 3] = [ExportType::Notebooklm, ExportType::Jsonl, ExportType::Urls];

    pub fn as_str(self) -> &'static str {
        match self {
            ExportType::Notebooklm => "notebooklm",
            ExportType::Jsonl => "jsonl",
            ExportType::Urls => "urls",
        }
    }

    fn file_prefix(self) -> &'static str {
        match self {
            ExportType::Notebooklm => "notebooklm_export_",
            ExportType::Jsonl => "news_export_",
            ExportType::Urls => "urls_export_",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            ExportType::Jsonl => "jsonl",
            ExportType::Notebooklm | ExportType::Urls => "txt",
        }
    }

    /// Recover the type from a generated filename.
    pub fn from_filename(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| name.starts_with(kind.file_prefix()))
    }
}

// ============================================================================
// Requests and results
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExportRequest {
    pub export_type: ExportType,
    pub unexported_only: bool,
    pub mark_exported: bool,
    pub limit: Option<i64>,
    /// Explicit selection; replaces the recency query when non-empty
    pub article_ids: Option<Vec<i64>>,
}

impl Default for ExportRequest {
    fn default() -> Self {
        Self {
            export_type: ExportType::default(),
            unexported_only: false,
            mark_exported: true,
            limit: None,
            article_ids: None,
        }
    }
}

impl ExportRequest {
    fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_EXPORT_LIMIT)
            .clamp(1, MAX_EXPORT_LIMIT)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportOutcome {
    pub filename: String,
    pub articles_count: usize,
    pub export_type: ExportType,
    pub size: u64,
    pub article_ids: Vec<i64>,
}

/// One export file on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportFile {
    pub filename: String,
    pub size: u64,
    pub created: DateTime<Utc>,
    #[serde(rename = "type")]
    pub file_type: String,
}

/// Accept only plain names of visible files inside the export directory.
pub fn validate_filename(name: &str) -> Result<(), ExportError> {
    let ok = !name.is_empty()
        && name.len() <= MAX_FILENAME_LEN
        && !name.starts_with('.')
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if ok {
        Ok(())
    } else {
        Err(ExportError::InvalidFilename(name.to_owned()))
    }
}

fn not_found(name: &str, e: std::io::Error) -> ExportError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ExportError::NotFound(name.to_owned())
    } else {
        ExportError::Io(e)
    }
}

/// Write `bytes` to `dst` via a hidden temp file and an atomic rename.
///
/// `create_new` on the temp path refuses a pre-planted file or symlink, and
/// the final rename refuses nothing, so callers must pick a fresh `dst`.
fn write_atomic(dst: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let stamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let file_name = dst
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("export");
    let temp_path = dst.with_file_name(format!(".{}.tmp.{:016x}", file_name, stamp));

    let result = (|| {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&temp_path, dst)
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&temp_path);
    }
    result
}

// ============================================================================
// Exporter
// ============================================================================

/// Owns the export directory. Exports and deletes are serialized, from
/// article selection through the history commit, so generated names stay
/// unique, marked exports stay disjoint and a delete never races a write.
#[derive(Debug)]
pub struct Exporter {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl Exporter {
    /// Use `dir` for export files, creating it (owner-only on unix) if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, ExportError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700)) {
                tracing::warn!(path = %dir.display(), error = %e, "Failed to restrict export directory permissions");
            }
        }

        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    async fn select(
        &self,
        db: &Database,
        request: &ExportRequest,
    ) -> Result<Vec<Article>, DatabaseError> {
        match request.article_ids.as_deref() {
            Some(ids) if !ids.is_empty() => {
                db.articles_by_ids(ids, request.unexported_only, request.limit())
                    .await
            }
            _ => {
                db.articles_for_export(request.unexported_only, request.limit())
                    .await
            }
        }
    }

    /// A name not yet used on disk, `{prefix}{timestamp}.{ext}` with a
    /// numeric suffix on the rare same-millisecond collision.
    fn fresh_filename(&self, kind: ExportType, now: DateTime<Utc>) -> String {
        let stem = format!("{}{}", kind.file_prefix(), now.format("%Y%m%d_%H%M%S_%3f"));
        let mut name = format!("{}.{}", stem, kind.extension());
        let mut n = 2;
        while self.dir.join(&name).exists() {
            name = format!("{}_{}.{}", stem, n, kind.extension());
            n += 1;
        }
        name
    }

    /// Render the selected articles into a new file and record it.
    ///
    /// With `mark_exported` every selected article is flagged in the same
    /// transaction that records the history row; on any failure no article
    /// is flagged and no file is left behind.
    pub async fn export(
        &self,
        db: &Database,
        request: &ExportRequest,
    ) -> Result<ExportOutcome, ExportError> {
        // Held from selection to commit so concurrent marking exports
        // never pick the same unexported articles
        let _guard = self.write_lock.lock().await;

        let articles = self.select(db, request).await?;
        if articles.is_empty() {
            return Err(ExportError::NothingToExport);
        }
        let settings = Settings::load(db).await?;
        let body = render::render(request.export_type, &articles, &settings.categories());
        let article_ids: Vec<i64> = articles.iter().map(|a| a.id).collect();

        let now = Utc::now();
        let filename = self.fresh_filename(request.export_type, now);
        let path = self.dir.join(&filename);
        let bytes = body.into_bytes();
        let size = bytes.len() as u64;

        let write_path = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&write_path, &bytes))
            .await
            .map_err(|e| ExportError::Io(std::io::Error::other(e)))??;

        let commit = ExportCommit {
            filename: &filename,
            export_type: request.export_type.as_str(),
            article_ids: &article_ids,
            mark_exported: request.mark_exported,
            export_date: now,
        };
        if let Err(e) = db.commit_export(&commit).await {
            if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                tracing::error!(filename = %filename, error = %remove_err, "Failed to remove unrecorded export file");
            }
            return Err(e.into());
        }

        tracing::info!(
            filename = %filename,
            articles = article_ids.len(),
            export_type = request.export_type.as_str(),
            marked = request.mark_exported,
            "Export written"
        );
        Ok(ExportOutcome {
            filename,
            articles_count: article_ids.len(),
            export_type: request.export_type,
            size,
            article_ids,
        })
    }

    /// Visible files in the export directory, newest first.
    pub async fn list_files(&self) -> Result<Vec<ExportFile>, ExportError> {
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if validate_filename(&name).is_err() {
                continue;
            }
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let created = meta.created().or_else(|_| meta.modified())?;
            let file_type = match ExportType::from_filename(&name) {
                Some(kind) => kind.as_str().to_owned(),
                None => Path::new(&name)
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("unknown")
                    .to_owned(),
            };
            files.push(ExportFile {
                filename: name,
                size: meta.len(),
                created: DateTime::<Utc>::from(created),
                file_type,
            });
        }

        files.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| b.filename.cmp(&a.filename)));
        Ok(files)
    }

    /// Export history from the database, newest first.
    pub async fn history(&self, db: &Database) -> Result<Vec<ExportRecord>, ExportError> {
        Ok(db.list_export_records().await?)
    }

    /// Raw contents of an export file.
    pub async fn read(&self, filename: &str) -> Result<Vec<u8>, ExportError> {
        validate_filename(filename)?;
        tokio::fs::read(self.dir.join(filename))
            .await
            .map_err(|e| not_found(filename, e))
    }

    /// Remove an export file and its history row.
    ///
    /// Both go or neither does: a storage failure leaves the file on disk,
    /// and a failed file removal keeps the row. A file that is not on disk
    /// is `NotFound`, even when a stale history row for it is cleaned up on
    /// the way.
    pub async fn delete(&self, db: &Database, filename: &str) -> Result<(), ExportError> {
        validate_filename(filename)?;
        let _guard = self.write_lock.lock().await;

        let path = self.dir.join(filename);
        let (had_record, removed) = db
            .delete_export_with(filename, tokio::fs::remove_file(&path))
            .await?;

        match removed {
            Ok(()) => {
                if !had_record {
                    tracing::warn!(filename = %filename, "Deleted export file had no history row");
                }
                tracing::info!(filename = %filename, "Export deleted");
                Ok(())
            }
            Err(e) => {
                if had_record && e.kind() == std::io::ErrorKind::NotFound {
                    tracing::warn!(filename = %filename, "Removed history row of a missing export file");
                }
                Err(not_found(filename, e))
            }
        }
    }
}
