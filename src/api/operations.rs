use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use super::{optional_json, ApiError, ApiResult, AppState};
use crate::ai::{categorize_pending, CategorizeReport};
use crate::monitor::{CollectionReport, Trigger};
use crate::scheduler::SchedulerStatus;
use crate::settings::{normalize_input, SCHEDULE_INTERVAL};
use crate::storage::Stats;

const DEFAULT_CATEGORIZE_LIMIT: i64 = 100;
const MAX_CATEGORIZE_LIMIT: i64 = 500;

// ============================================================================
// Stats
// ============================================================================

#[derive(Serialize)]
pub(super) struct StatsResponse {
    #[serde(flatten)]
    stats: Stats,
    scheduler_running: bool,
    next_collection: Option<chrono::DateTime<chrono::Utc>>,
}

pub(super) async fn stats(State(state): State<AppState>) -> ApiResult<Json<StatsResponse>> {
    let stats = state.db.stats().await?;
    let scheduler = state.scheduler.status();
    Ok(Json(StatsResponse {
        stats,
        scheduler_running: scheduler.running,
        next_collection: scheduler.next_collection,
    }))
}

// ============================================================================
// Collection and categorization
// ============================================================================

pub(super) async fn collect_background(
    State(state): State<AppState>,
) -> (StatusCode, Json<Value>) {
    if state.monitor.collect_in_background() {
        (
            StatusCode::ACCEPTED,
            Json(json!({ "message": "Collection started for all sources", "started": true })),
        )
    } else {
        (
            StatusCode::ACCEPTED,
            Json(json!({ "message": "Collection already in progress", "started": false })),
        )
    }
}

/// Run a full pass and answer with its report; joins a pass already running.
pub(super) async fn collect_sync(
    State(state): State<AppState>,
) -> ApiResult<Json<CollectionReport>> {
    state
        .monitor
        .collect_all(Trigger::Manual)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Collection was skipped"))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CategorizeBody {
    force: bool,
    limit: Option<i64>,
}

/// Body is optional; an empty POST categorizes pending articles.
pub(super) async fn categorize(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<CategorizeReport>> {
    let body: CategorizeBody = optional_json(&body)?;
    let client = state.monitor.ai().ok_or_else(|| {
        ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "AI service is not configured")
    })?;
    let limit = body
        .limit
        .unwrap_or(DEFAULT_CATEGORIZE_LIMIT)
        .clamp(1, MAX_CATEGORIZE_LIMIT);

    let report = categorize_pending(&state.db, client, body.force, limit).await?;
    Ok(Json(report))
}

// ============================================================================
// Scheduler
// ============================================================================

pub(super) async fn scheduler_status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status())
}

pub(super) async fn scheduler_start(State(state): State<AppState>) -> Json<Value> {
    let status = state.scheduler.start().await;
    Json(json!({ "message": "Scheduler started", "status": status }))
}

pub(super) async fn scheduler_stop(State(state): State<AppState>) -> Json<Value> {
    let was_running = state.scheduler.stop();
    Json(json!({
        "message": "Scheduler stopped",
        "was_running": was_running,
        "status": state.scheduler.status(),
    }))
}

// ============================================================================
// Settings
// ============================================================================

pub(super) async fn get_settings(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let settings = state.db.get_settings().await?;
    Ok(Json(json!({ "settings": settings })))
}

#[derive(Debug, Deserialize)]
pub(super) struct SettingsBody {
    settings: BTreeMap<String, Value>,
}

/// Replace the whole settings map. Keys absent from the body are removed.
///
/// A changed interval reschedules a running scheduler from now.
pub(super) async fn put_settings(
    State(state): State<AppState>,
    Json(body): Json<SettingsBody>,
) -> ApiResult<Json<Value>> {
    let settings = normalize_input(body.settings)?;
    let previous = state.db.get_settings().await?;
    state.db.replace_settings(&settings).await?;
    tracing::info!(keys = settings.len(), "Settings replaced");

    if previous.get(SCHEDULE_INTERVAL) != settings.get(SCHEDULE_INTERVAL) {
        state.scheduler.settings_changed();
    }

    Ok(Json(json!({
        "message": "Settings updated successfully",
        "settings": settings,
    })))
}
