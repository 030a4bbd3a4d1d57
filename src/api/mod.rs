//! HTTP surface, mounted under `/api`.
//!
//! Handlers are thin: they parse the request, call one domain operation and
//! shape the JSON. Domain errors convert into [`ApiError`].

mod articles;
mod error;
mod operations;
mod reports;
mod sources;

pub use error::ApiError;

use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::export::Exporter;
use crate::monitor::Monitor;
use crate::scheduler::Scheduler;
use crate::storage::Database;

/// Shared handles for every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub monitor: Monitor,
    pub scheduler: Scheduler,
    pub exporter: Arc<Exporter>,
}

pub type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/", get(root))
        .route("/stats", get(operations::stats))
        .route("/articles", get(articles::list))
        .route("/articles/categories", get(articles::categories))
        .route("/articles/{id}", get(articles::get))
        .route("/sources", get(sources::list).post(sources::create))
        .route(
            "/sources/{id}",
            put(sources::update).delete(sources::remove),
        )
        .route("/sources/{id}/collect", post(sources::collect))
        .route("/collect", post(operations::collect_background))
        .route("/collect/sync", post(operations::collect_sync))
        .route("/categorize", post(operations::categorize))
        .route("/scheduler/status", get(operations::scheduler_status))
        .route("/scheduler/start", post(operations::scheduler_start))
        .route("/scheduler/stop", post(operations::scheduler_stop))
        .route(
            "/settings",
            get(operations::get_settings).put(operations::put_settings),
        )
        .route("/summarize", post(reports::summarize))
        .route("/summaries", get(reports::summaries))
        .route("/notebooklm/prompt", get(reports::notebooklm_prompt))
        .route("/export", post(reports::export))
        .route("/exports", get(reports::list_exports))
        .route(
            "/exports/{filename}",
            get(reports::download_export).delete(reports::delete_export),
        );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api", api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Parse an optional JSON body; an empty body yields the defaults.
fn optional_json<T: DeserializeOwned + Default>(body: &[u8]) -> ApiResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request(format!("Invalid request body: {}", e)))
}

async fn root() -> Json<Value> {
    Json(json!({
        "message": "Tech News Monitor API",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
