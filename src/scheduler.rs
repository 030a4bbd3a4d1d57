//! Periodic collection.
//!
//! `Scheduler` is an owned state machine with two states, stopped and
//! running. While running, a background task sleeps for the configured
//! interval and then asks the [`Monitor`] for a scheduled pass. The interval
//! is re-read from the settings store before every wait, and a settings
//! change wakes the task so the new interval counts from now.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};

use crate::monitor::{Monitor, Trigger};
use crate::settings::Settings;

/// Scheduler state as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub next_collection: Option<DateTime<Utc>>,
    pub interval_minutes: Option<u64>,
}

struct Running {
    stop: oneshot::Sender<()>,
    /// Distinguishes this run from a later start after a stop
    generation: u64,
    next_collection: DateTime<Utc>,
    interval_minutes: u64,
}

#[derive(Default)]
struct State {
    running: Option<Running>,
    generation: u64,
}

#[derive(Clone)]
pub struct Scheduler {
    monitor: Monitor,
    state: Arc<Mutex<State>>,
    wake: Arc<Notify>,
    /// Length of one interval unit; a minute outside tests
    minute: Duration,
}

fn next_after(period: Duration) -> DateTime<Utc> {
    let step = chrono::Duration::from_std(period).unwrap_or_else(|_| chrono::Duration::minutes(60));
    Utc::now() + step
}

impl Scheduler {
    pub fn new(monitor: Monitor) -> Self {
        Self {
            monitor,
            state: Arc::new(Mutex::new(State::default())),
            wake: Arc::new(Notify::new()),
            minute: Duration::from_secs(60),
        }
    }

    /// Shrink the interval unit so ticks happen in test time.
    #[cfg(test)]
    fn with_minute(mut self, minute: Duration) -> Self {
        self.minute = minute;
        self
    }

    /// Interval in minutes, read fresh from the settings store.
    async fn current_interval(&self) -> u64 {
        match Settings::load(self.monitor.db()).await {
            Ok(settings) => settings.schedule_interval_minutes(),
            Err(e) => {
                let fallback = Settings::default().schedule_interval_minutes();
                tracing::warn!(error = %e, "Failed to read schedule interval, using default");
                fallback
            }
        }
    }

    fn period(&self, minutes: u64) -> Duration {
        self.minute
            .saturating_mul(u32::try_from(minutes).unwrap_or(u32::MAX))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A panic while holding this lock leaves plain data behind; keep going
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn status(&self) -> SchedulerStatus {
        let state = self.lock();
        match &state.running {
            Some(run) => SchedulerStatus {
                running: true,
                next_collection: Some(run.next_collection),
                interval_minutes: Some(run.interval_minutes),
            },
            None => SchedulerStatus {
                running: false,
                next_collection: None,
                interval_minutes: None,
            },
        }
    }

    /// Move to running. Starting a running scheduler changes nothing.
    pub async fn start(&self) -> SchedulerStatus {
        if self.lock().running.is_some() {
            return self.status();
        }
        let interval = self.current_interval().await;

        let (stop_tx, stop_rx) = oneshot::channel();
        let generation = {
            let mut state = self.lock();
            // Another caller may have won the race while the interval was read
            if state.running.is_some() {
                drop(state);
                return self.status();
            }
            state.generation += 1;
            state.running = Some(Running {
                stop: stop_tx,
                generation: state.generation,
                next_collection: next_after(self.period(interval)),
                interval_minutes: interval,
            });
            state.generation
        };

        let task = self.clone();
        tokio::spawn(async move { task.run(generation, interval, stop_rx).await });

        tracing::info!(interval_minutes = interval, "Scheduler started");
        self.status()
    }

    /// Move to stopped, cancelling the pending tick. Returns whether it was running.
    ///
    /// A pass that already started keeps going to completion.
    pub fn stop(&self) -> bool {
        let taken = self.lock().running.take();
        match taken {
            Some(run) => {
                let _ = run.stop.send(());
                tracing::info!("Scheduler stopped");
                true
            }
            None => false,
        }
    }

    /// Recompute the pending wait from the current settings.
    pub fn settings_changed(&self) {
        if self.lock().running.is_some() {
            self.wake.notify_one();
        }
    }

    fn record_next(&self, generation: u64, interval: u64) {
        let mut state = self.lock();
        if let Some(run) = state.running.as_mut().filter(|r| r.generation == generation) {
            run.next_collection = next_after(self.period(interval));
            run.interval_minutes = interval;
        }
    }

    async fn run(&self, generation: u64, first: u64, mut stop: oneshot::Receiver<()>) {
        let mut interval = first;
        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = self.wake.notified() => {
                    interval = self.current_interval().await;
                    self.record_next(generation, interval);
                    tracing::info!(interval_minutes = interval, "Schedule interval reloaded");
                    continue;
                }
                _ = tokio::time::sleep(self.period(interval)) => {}
            }

            tracing::info!("Scheduled collection starting");
            tokio::select! {
                _ = &mut stop => break,
                result = self.monitor.collect_all(Trigger::Scheduled) => match result {
                    Ok(Some(report)) => tracing::info!(
                        new = report.total_collected,
                        fetched = report.total_fetched,
                        "Scheduled collection finished"
                    ),
                    Ok(None) => {}
                    Err(e) => tracing::warn!(error = %e, "Scheduled collection failed"),
                },
            }

            interval = self.current_interval().await;
            self.record_next(generation, interval);
        }
        tracing::debug!(generation, "Scheduler task exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::{Fetcher, RetryPolicy};
    use crate::storage::{Database, NewSource, SourceKind};
    use std::collections::BTreeMap;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEST_MINUTE: Duration = Duration::from_millis(50);

    async fn scheduler() -> (Scheduler, Database) {
        let db = Database::open(":memory:").await.unwrap();
        let fetcher = Fetcher::new(Duration::from_secs(5)).unwrap();
        let monitor = Monitor::new(db.clone(), fetcher, None, 1);
        (Scheduler::new(monitor), db)
    }

    /// Scheduler over one RSS source served by `server`, ticking every
    /// `interval` test minutes.
    async fn scheduler_with_feed(server: &MockServer, interval: u64) -> (Scheduler, Database) {
        let body = r#"<?xml version="1.0"?><rss version="2.0"><channel><title>T</title>
            <item><title>One</title><link>https://a.example/1</link></item>
            <item><title>Two</title><link>https://a.example/2</link></item>
            </channel></rss>"#;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;

        let db = Database::open(":memory:").await.unwrap();
        db.create_source(&NewSource {
            name: "Feed".into(),
            kind: SourceKind::Rss,
            url: format!("{}/feed", server.uri()),
            enabled: true,
            config: None,
        })
        .await
        .unwrap();
        set_interval(&db, interval).await;

        let fetcher = Fetcher::new(Duration::from_secs(5))
            .unwrap()
            .with_retry_policy(RetryPolicy {
                max_retries: 0,
                base_delay: Duration::from_millis(1),
            });
        let monitor = Monitor::new(db.clone(), fetcher, None, 1);
        (Scheduler::new(monitor).with_minute(TEST_MINUTE), db)
    }

    async fn set_interval(db: &Database, minutes: u64) {
        let mut settings = db.get_settings().await.unwrap();
        settings.insert("schedule_interval".into(), minutes.to_string());
        db.replace_settings(&settings).await.unwrap();
    }

    async fn hits(server: &MockServer) -> usize {
        server.received_requests().await.map_or(0, |r| r.len())
    }

    #[tokio::test]
    async fn test_starts_stopped() {
        let (scheduler, _db) = scheduler().await;
        let status = scheduler.status();
        assert!(!status.running);
        assert!(status.next_collection.is_none());
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_reports_next_run() {
        let (scheduler, _db) = scheduler().await;

        let first = scheduler.start().await;
        assert!(first.running);
        assert_eq!(first.interval_minutes, Some(60));
        let next = first.next_collection.unwrap();
        assert!(next > Utc::now() + chrono::Duration::minutes(59));

        let second = scheduler.start().await;
        assert!(second.running);
        assert_eq!(second.next_collection, Some(next));

        assert!(scheduler.stop());
    }

    #[tokio::test]
    async fn test_stop_then_stop_again() {
        let (scheduler, _db) = scheduler().await;
        scheduler.start().await;

        assert!(scheduler.stop());
        assert!(!scheduler.status().running);
        assert!(scheduler.status().next_collection.is_none());
        assert!(!scheduler.stop());
    }

    #[tokio::test]
    async fn test_interval_change_reschedules_running_scheduler() {
        let (scheduler, db) = scheduler().await;
        scheduler.start().await;

        let mut settings = db.get_settings().await.unwrap();
        settings.insert("schedule_interval".into(), "5".into());
        db.replace_settings(&settings).await.unwrap();
        scheduler.settings_changed();

        let mut status = scheduler.status();
        for _ in 0..100 {
            if status.interval_minutes == Some(5) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            status = scheduler.status();
        }
        assert_eq!(status.interval_minutes, Some(5));
        assert!(status.next_collection.unwrap() < Utc::now() + chrono::Duration::minutes(6));
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_tick_collects_after_interval() {
        let server = MockServer::start().await;
        let (scheduler, db) = scheduler_with_feed(&server, 1).await;

        let status = scheduler.start().await;
        assert_eq!(status.interval_minutes, Some(1));
        assert_eq!(db.stats().await.unwrap().total_articles, 0);

        let mut total = 0;
        for _ in 0..300 {
            total = db.stats().await.unwrap().total_articles;
            if total == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(total, 2);
        assert!(hits(&server).await >= 1);
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_next_tick_uses_interval_read_after_pass() {
        let server = MockServer::start().await;
        let (scheduler, db) = scheduler_with_feed(&server, 1).await;
        scheduler.start().await;

        for _ in 0..300 {
            if hits(&server).await >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(hits(&server).await >= 1);

        // No wake-up: only the re-read after a pass can pick this up
        set_interval(&db, 100).await;

        let mut status = scheduler.status();
        for _ in 0..300 {
            if status.interval_minutes == Some(100) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            status = scheduler.status();
        }
        assert_eq!(status.interval_minutes, Some(100));
        let after_reload = hits(&server).await;

        // Eight old intervals pass without a tick under the new one
        tokio::time::sleep(TEST_MINUTE * 8).await;
        assert_eq!(hits(&server).await, after_reload);
        assert!(status.next_collection.unwrap() > Utc::now() + chrono::Duration::seconds(4));
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_invalid_interval_falls_back_to_default() {
        let (scheduler, db) = scheduler().await;
        let mut settings: BTreeMap<String, String> = db.get_settings().await.unwrap();
        settings.insert("schedule_interval".into(), "soon".into());
        db.replace_settings(&settings).await.unwrap();

        let status = scheduler.start().await;
        assert_eq!(status.interval_minutes, Some(60));
        scheduler.stop();
    }
}
