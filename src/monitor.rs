//! Collection orchestration.
//!
//! A pass fetches every enabled source through a bounded worker pool, feeds
//! the items through URL dedup, stamps `last_fetched` on each source and
//! then categorizes what was new. One source failing never stops the rest.
//!
//! At most one pass runs at a time. The collection gate decides what a
//! request does when the slot is taken:
//!
//! | request            | slot busy                       |
//! |--------------------|---------------------------------|
//! | manual full pass   | joins the running pass          |
//! | scheduled tick     | skipped                         |
//! | single source      | waits for the slot, then runs   |
//!
//! Passes run in spawned tasks, so a caller that goes away (an HTTP client
//! disconnecting) never cancels a pass half way.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::{Arc, Mutex as StdMutex};
use thiserror::Error;
use tokio::sync::{watch, Mutex};

use crate::ai::{categorize_articles, CategorizeReport, LlmClient};
use crate::collect::{fetch_source, Fetcher};
use crate::settings::Settings;
use crate::storage::{Database, DatabaseError, Source};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Source not found: {0}")]
    SourceNotFound(i64),
    #[error(transparent)]
    Storage(#[from] DatabaseError),
    #[error("Collection pass failed: {0}")]
    PassFailed(String),
    #[error("Collection pass aborted before finishing")]
    Aborted,
}

/// What asked for a full pass; decides the behavior on a busy slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Manual,
    Scheduled,
}

// ============================================================================
// Reports
// ============================================================================

/// Outcome for one source within a pass.
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source_id: i64,
    pub source: String,
    /// Items the adapter returned
    pub fetched: usize,
    /// Items that were not already stored
    pub new: usize,
    pub errors: Vec<String>,
    #[serde(skip)]
    new_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionReport {
    pub total_fetched: usize,
    pub total_collected: usize,
    pub sources_processed: usize,
    pub results: Vec<SourceReport>,
    /// Present when auto-categorization ran on this pass's new articles
    pub categorization: Option<CategorizeReport>,
    pub timestamp: DateTime<Utc>,
    /// True when this caller attached to a pass someone else started
    pub joined_in_flight: bool,
}

type PassOutcome = Option<Result<CollectionReport, String>>;

// ============================================================================
// Collection gate
// ============================================================================

/// Single-slot lock shared by every kind of collection.
#[derive(Default)]
struct CollectionGate {
    /// Set while a full pass is in flight; joiners wait on the receiver
    in_flight: StdMutex<Option<watch::Receiver<PassOutcome>>>,
    /// Held for the duration of any pass, full or single-source
    running: Mutex<()>,
}

impl CollectionGate {
    fn is_busy(&self) -> bool {
        self.in_flight.lock().map(|s| s.is_some()).unwrap_or(false) || self.running.try_lock().is_err()
    }
}

/// Clears the in-flight slot when a pass task ends, including by panic.
struct SlotGuard {
    monitor: Arc<Inner>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.monitor.gate.in_flight.lock() {
            slot.take();
        }
    }
}

// ============================================================================
// Monitor
// ============================================================================

struct Inner {
    db: Database,
    fetcher: Fetcher,
    ai: Option<LlmClient>,
    concurrency: usize,
    gate: CollectionGate,
}

/// Owns collection for the process. Cheap to clone.
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<Inner>,
}

impl Monitor {
    pub fn new(db: Database, fetcher: Fetcher, ai: Option<LlmClient>, concurrency: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                fetcher,
                ai,
                concurrency: concurrency.max(1),
                gate: CollectionGate::default(),
            }),
        }
    }

    pub fn db(&self) -> &Database {
        &self.inner.db
    }

    pub fn ai(&self) -> Option<&LlmClient> {
        self.inner.ai.as_ref()
    }

    /// True while any pass (full or single-source) holds the slot.
    pub fn is_collecting(&self) -> bool {
        self.inner.gate.is_busy()
    }

    /// Run a full pass over every enabled source.
    ///
    /// Returns `Ok(None)` only for a scheduled tick that found the slot busy.
    pub async fn collect_all(
        &self,
        trigger: Trigger,
    ) -> Result<Option<CollectionReport>, MonitorError> {
        let (mut rx, joined) = {
            let mut slot = self
                .inner
                .gate
                .in_flight
                .lock()
                .map_err(|_| MonitorError::Aborted)?;

            match slot.as_ref() {
                Some(_) if trigger == Trigger::Scheduled => {
                    tracing::info!("Scheduled collection skipped: a pass is already running");
                    return Ok(None);
                }
                Some(running) => (running.clone(), true),
                None => {
                    let (tx, rx) = watch::channel(None);
                    *slot = Some(rx.clone());
                    self.spawn_pass(tx);
                    (rx, false)
                }
            }
        };

        if joined {
            tracing::info!("Collection requested while a pass is running; joining it");
        }

        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| MonitorError::Aborted)?
            .clone();

        match outcome {
            Some(Ok(mut report)) => {
                report.joined_in_flight = joined;
                Ok(Some(report))
            }
            Some(Err(message)) => Err(MonitorError::PassFailed(message)),
            None => Err(MonitorError::Aborted),
        }
    }

    /// Start a full pass without waiting for it.
    ///
    /// Returns `false` when a pass was already running; that pass is left to
    /// finish and no second one is queued.
    pub fn collect_in_background(&self) -> bool {
        if self.is_collecting() {
            return false;
        }
        let monitor = self.clone();
        tokio::spawn(async move {
            if let Err(e) = monitor.collect_all(Trigger::Manual).await {
                tracing::warn!(error = %e, "Background collection failed");
            }
        });
        true
    }

    /// Collect a single source, waiting for the slot if a pass is running.
    pub async fn collect_source(&self, source_id: i64) -> Result<CollectionReport, MonitorError> {
        let source = self
            .inner
            .db
            .get_source(source_id)
            .await?
            .ok_or(MonitorError::SourceNotFound(source_id))?;

        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let _running = inner.gate.running.lock().await;
            inner.run(vec![source]).await
        });

        match task.await {
            Ok(result) => Ok(result?),
            Err(e) => {
                tracing::error!(error = %e, source_id, "Single-source collection task failed");
                Err(MonitorError::Aborted)
            }
        }
    }

    fn spawn_pass(&self, tx: watch::Sender<PassOutcome>) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let guard = SlotGuard {
                monitor: inner.clone(),
            };
            let running = inner.gate.running.lock().await;

            let outcome = match inner.db.enabled_sources().await {
                Ok(sources) => inner.run(sources).await.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            if let Err(message) = &outcome {
                tracing::error!(error = %message, "Collection pass failed");
            }

            // Free the slot before publishing so late arrivals start a new pass
            drop(running);
            drop(guard);
            let _ = tx.send(Some(outcome));
        });
    }
}

impl Inner {
    async fn run(&self, sources: Vec<Source>) -> Result<CollectionReport, DatabaseError> {
        let settings = Settings::load(&self.db).await?;
        let cap = settings.max_articles_per_fetch();

        tracing::info!(sources = sources.len(), cap, "Collection pass started");

        let mut results: Vec<SourceReport> = stream::iter(sources)
            .map(|source| async move { self.collect_one(&source, cap).await })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        results.sort_by_key(|r| r.source_id);

        let new_ids: Vec<i64> = results.iter().flat_map(|r| r.new_ids.iter().copied()).collect();
        let categorization = self.categorize_new(&settings, &new_ids).await;

        let report = CollectionReport {
            total_fetched: results.iter().map(|r| r.fetched).sum(),
            total_collected: new_ids.len(),
            sources_processed: results.len(),
            results,
            categorization,
            timestamp: Utc::now(),
            joined_in_flight: false,
        };

        tracing::info!(
            sources = report.sources_processed,
            fetched = report.total_fetched,
            new = report.total_collected,
            failed_sources = report.results.iter().filter(|r| !r.errors.is_empty()).count(),
            "Collection pass finished"
        );
        Ok(report)
    }

    /// Fetch, dedup and stamp one source. Never fails: problems are recorded
    /// in the report's `errors`.
    async fn collect_one(&self, source: &Source, cap: usize) -> SourceReport {
        let mut report = SourceReport {
            source_id: source.id,
            source: source.name.clone(),
            fetched: 0,
            new: 0,
            errors: Vec::new(),
            new_ids: Vec::new(),
        };

        match fetch_source(&self.fetcher, source, cap).await {
            Ok(items) => {
                report.fetched = items.len();
                for item in &items {
                    match self.db.ingest_article(item, Some(source.id)).await {
                        Ok(ingested) if ingested.created => {
                            report.new_ids.push(ingested.article_id);
                        }
                        Ok(ingested) => {
                            tracing::debug!(url = %item.url, article_id = ingested.article_id, "Duplicate article skipped");
                        }
                        Err(e) => {
                            tracing::warn!(source_id = source.id, url = %item.url, error = %e, "Failed to store article");
                            report.errors.push(format!("store {}: {}", item.url, e));
                        }
                    }
                }
                report.new = report.new_ids.len();
            }
            Err(e) => {
                tracing::warn!(source_id = source.id, source = %source.name, error = %e, "Source fetch failed");
                report.errors.push(e.to_string());
            }
        }

        if let Err(e) = self.db.mark_source_fetched(source.id, Utc::now()).await {
            tracing::warn!(source_id = source.id, error = %e, "Failed to update last_fetched");
            report.errors.push(format!("last_fetched: {}", e));
        }

        tracing::debug!(
            source_id = source.id,
            fetched = report.fetched,
            new = report.new,
            "Source collected"
        );
        report
    }

    async fn categorize_new(&self, settings: &Settings, ids: &[i64]) -> Option<CategorizeReport> {
        if ids.is_empty() || !settings.auto_categorize() {
            return None;
        }
        let Some(client) = self.ai.as_ref() else {
            tracing::debug!("Auto-categorization skipped: AI not configured");
            return None;
        };

        let articles = match self.db.articles_by_ids(ids, false, ids.len() as i64).await {
            Ok(articles) => articles,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load new articles for categorization");
                return None;
            }
        };
        Some(categorize_articles(&self.db, client, settings, articles, false).await)
    }
}
