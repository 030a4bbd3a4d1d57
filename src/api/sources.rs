use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use super::{ApiError, ApiResult, AppState};
use crate::collect::validate_source;
use crate::monitor::CollectionReport;
use crate::storage::{NewSource, Source, SourceUpdate};

pub(super) async fn list(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let sources = state.db.list_sources().await?;
    Ok(Json(json!({ "sources": sources })))
}

pub(super) async fn create(
    State(state): State<AppState>,
    Json(new): Json<NewSource>,
) -> ApiResult<Json<Value>> {
    validate_source(&new.name, new.kind, &new.url, new.config.as_ref())?;
    let source = state.db.create_source(&new).await?;
    tracing::info!(source_id = source.id, name = %source.name, kind = %source.kind, "Source created");

    Ok(Json(json!({
        "id": source.id,
        "message": "Source created successfully",
        "source": source,
    })))
}

pub(super) async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(update): Json<SourceUpdate>,
) -> ApiResult<Json<Value>> {
    if update.is_empty() {
        return Err(ApiError::bad_request("No updates provided"));
    }
    let existing = state
        .db
        .get_source(id)
        .await?
        .ok_or_else(|| source_not_found(id))?;

    // Validate the source as it will look after the update
    validate_source(
        update.name.as_deref().unwrap_or(&existing.name),
        existing.kind,
        update.url.as_deref().unwrap_or(&existing.url),
        Some(update.config.as_ref().unwrap_or(&existing.config)),
    )?;

    let source: Source = state
        .db
        .update_source(id, &update)
        .await?
        .ok_or_else(|| source_not_found(id))?;
    tracing::info!(source_id = id, "Source updated");

    Ok(Json(json!({
        "message": "Source updated successfully",
        "source": source,
    })))
}

pub(super) async fn remove(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    if !state.db.delete_source(id).await? {
        return Err(source_not_found(id));
    }
    tracing::info!(source_id = id, "Source deleted");
    Ok(Json(json!({ "message": "Source deleted successfully" })))
}

/// Collect one source now; waits for a running pass to finish first.
pub(super) async fn collect(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<CollectionReport>> {
    Ok(Json(state.monitor.collect_source(id).await?))
}

fn source_not_found(id: i64) -> ApiError {
    ApiError::not_found(format!("Source {} not found", id))
}
