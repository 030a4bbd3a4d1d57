use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};

use super::{optional_json, ApiResult, AppState};
use crate::ai::{parse_structured, summarize as run_summary, OutputFormat, SummarizeRequest};
use crate::export::{analysis_prompt, ExportRequest};
use crate::settings::Settings;

// ============================================================================
// Summaries
// ============================================================================

pub(super) async fn summarize(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Value>> {
    let request: SummarizeRequest = optional_json(&body)?;
    let summary = run_summary(&state.db, state.monitor.ai(), &request).await?;

    let mut response = json!({
        "summary_id": summary.id,
        "id": summary.id,
        "summary_text": summary.summary_text,
        "article_count": summary.article_ids.len(),
        "category": summary.category,
        "format": summary.output_format,
        "created_at": summary.created_at,
    });
    if request.output_format == OutputFormat::Json {
        // Unparseable model output is still a stored summary; only the
        // structured view is omitted
        match parse_structured(&summary.summary_text) {
            Some(parsed) => response["summary_json"] = parsed,
            None => tracing::warn!(summary_id = summary.id, "Summary body is not valid JSON"),
        }
    }
    Ok(Json(response))
}

pub(super) async fn summaries(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let summaries = state.db.list_summaries().await?;
    Ok(Json(json!({ "summaries": summaries })))
}

/// Analysis prompt that goes along with an interchange export.
pub(super) async fn notebooklm_prompt(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let settings = Settings::load(&state.db).await?;
    Ok(Json(json!({ "prompt": analysis_prompt(&settings.categories()) })))
}

// ============================================================================
// Exports
// ============================================================================

pub(super) async fn export(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Value>> {
    let request: ExportRequest = optional_json(&body)?;
    let outcome = state.exporter.export(&state.db, &request).await?;

    Ok(Json(json!({
        "message": format!("Exported {} articles", outcome.articles_count),
        "filename": outcome.filename,
        "articles_count": outcome.articles_count,
        "export_type": outcome.export_type,
        "size": outcome.size,
    })))
}

pub(super) async fn list_exports(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let files = state.exporter.list_files().await?;
    let history = state.exporter.history(&state.db).await?;
    Ok(Json(json!({ "files": files, "history": history })))
}

pub(super) async fn download_export(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let bytes = state.exporter.read(&filename).await?;
    // Names are validated to a safe character set before reaching here
    let disposition = format!("attachment; filename=\"{}\"", filename);
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_owned()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    ))
}

pub(super) async fn delete_export(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<Json<Value>> {
    state.exporter.delete(&state.db, &filename).await?;
    Ok(Json(json!({ "message": format!("Export {} deleted", filename) })))
}
