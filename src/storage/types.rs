use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::util::truncate_chars;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("Database is locked by another process. Stop it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A stored row could not be mapped back into a domain value
    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Sources
// ============================================================================

/// Closed set of source kinds. The wire name doubles as the stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Rss,
    Reddit,
    Scraper,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Rss => "rss",
            SourceKind::Reddit => "reddit",
            SourceKind::Scraper => "scraper",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rss" => Ok(SourceKind::Rss),
            "reddit" => Ok(SourceKind::Reddit),
            "scraper" => Ok(SourceKind::Scraper),
            other => Err(format!("unknown source type '{}'", other)),
        }
    }
}

/// A configured news source.
#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SourceKind,
    pub url: String,
    pub enabled: bool,
    /// Kind-specific options (`subreddit`, `selectors`), free-form
    pub config: serde_json::Value,
    pub last_fetched: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Internal row type for source queries; `into_source()` parses the kind and config.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SourceDbRow {
    pub id: i64,
    pub name: String,
    pub kind: String,
    pub url: String,
    pub enabled: bool,
    pub config: Option<String>,
    pub last_fetched: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SourceDbRow {
    pub(crate) fn into_source(self) -> Result<Source, DatabaseError> {
        let kind = self.kind.parse::<SourceKind>().map_err(|e| {
            DatabaseError::CorruptRow(format!("source {}: {}", self.id, e))
        })?;
        let config = match self.config.as_deref() {
            None | Some("") => serde_json::Value::Object(Default::default()),
            Some(raw) => serde_json::from_str(raw).map_err(|e| {
                DatabaseError::CorruptRow(format!("source {} config: {}", self.id, e))
            })?,
        };
        Ok(Source {
            id: self.id,
            name: self.name,
            kind,
            url: self.url,
            enabled: self.enabled,
            config,
            last_fetched: self.last_fetched,
            created_at: self.created_at,
        })
    }
}

/// Fields for registering a source
#[derive(Debug, Clone, Deserialize)]
pub struct NewSource {
    pub name: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: SourceKind,
    pub url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
}

fn default_kind() -> SourceKind {
    SourceKind::Rss
}

fn default_enabled() -> bool {
    true
}

/// Partial update; `None` leaves the column untouched
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceUpdate {
    pub name: Option<String>,
    pub url: Option<String>,
    pub enabled: Option<bool>,
    pub config: Option<serde_json::Value>,
}

impl SourceUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.url.is_none() && self.enabled.is_none() && self.config.is_none()
    }
}

// ============================================================================
// Articles
// ============================================================================

const MAX_DESCRIPTION_CHARS: usize = 1000;
const MAX_CONTENT_CHARS: usize = 10_000;
const MAX_AUTHOR_CHARS: usize = 200;

/// A source item reduced to the canonical shape before dedup.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedArticle {
    pub title: String,
    pub description: String,
    pub content: String,
    pub author: String,
    pub url: String,
    pub published_date: Option<DateTime<Utc>>,
}

impl NormalizedArticle {
    /// Trim and cap the raw fields. Items without a title or url are dropped.
    pub fn new(
        title: &str,
        description: &str,
        content: &str,
        author: &str,
        url: &str,
        published_date: Option<DateTime<Utc>>,
    ) -> Option<Self> {
        let title = title.trim();
        let url = url.trim();
        if title.is_empty() || url.is_empty() {
            return None;
        }
        Some(Self {
            title: title.to_owned(),
            description: truncate_chars(description.trim(), MAX_DESCRIPTION_CHARS).into_owned(),
            content: truncate_chars(content.trim(), MAX_CONTENT_CHARS).into_owned(),
            author: truncate_chars(author.trim(), MAX_AUTHOR_CHARS).into_owned(),
            url: url.to_owned(),
            published_date,
        })
    }
}

/// Stored article joined with its source name
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub content: Option<String>,
    pub author: Option<String>,
    pub url: String,
    pub published_date: Option<DateTime<Utc>>,
    pub source_id: Option<i64>,
    pub source_name: Option<String>,
    pub collected_at: DateTime<Utc>,
    pub category: Option<String>,
    pub exported: bool,
}

/// Outcome of a single ingest call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ingested {
    pub created: bool,
    pub article_id: i64,
}

/// Filters for article listing. Ordering is always most-recent-first.
#[derive(Debug, Clone, Default)]
pub struct ArticleQuery {
    pub search: Option<String>,
    pub category: Option<String>,
    pub source_id: Option<i64>,
    pub exported: Option<bool>,
    pub limit: i64,
    pub offset: i64,
}

// ============================================================================
// Summaries, Exports, Stats
// ============================================================================

/// Immutable AI digest over a set of articles
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub id: i64,
    pub article_ids: Vec<i64>,
    pub category: Option<String>,
    pub output_format: String,
    pub summary_text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SummaryDbRow {
    pub id: i64,
    pub article_ids: String,
    pub category: Option<String>,
    pub output_format: String,
    pub summary_text: String,
    pub created_at: DateTime<Utc>,
}

impl SummaryDbRow {
    pub(crate) fn into_summary(self) -> Result<Summary, DatabaseError> {
        let article_ids = serde_json::from_str(&self.article_ids).map_err(|e| {
            DatabaseError::CorruptRow(format!("summary {} article_ids: {}", self.id, e))
        })?;
        Ok(Summary {
            id: self.id,
            article_ids,
            category: self.category,
            output_format: self.output_format,
            summary_text: self.summary_text,
            created_at: self.created_at,
        })
    }
}

/// Export history entry; one per export file on disk
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ExportRecord {
    pub id: i64,
    pub articles_count: i64,
    pub export_date: DateTime<Utc>,
    pub filename: String,
    pub export_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct DayCount {
    pub date: String,
    pub count: i64,
}

/// Aggregate counts over persisted state, recomputed per call
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub total_articles: i64,
    pub exported_articles: i64,
    pub active_sources: i64,
    pub total_summaries: i64,
    pub by_category: BTreeMap<String, i64>,
    pub articles_by_day: Vec<DayCount>,
}
