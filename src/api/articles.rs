use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ApiError, ApiResult, AppState};
use crate::settings::Settings;
use crate::storage::{Article, ArticleQuery, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

#[derive(Debug, Deserialize)]
pub(super) struct ListParams {
    search: Option<String>,
    category: Option<String>,
    source_id: Option<i64>,
    exported: Option<bool>,
    limit: Option<i64>,
    offset: Option<i64>,
}

pub(super) async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Value>> {
    let query = ArticleQuery {
        search: params.search,
        category: params.category,
        source_id: params.source_id,
        exported: params.exported,
        limit: params.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        offset: params.offset.unwrap_or(0).max(0),
    };
    let (articles, total) = state.db.query_articles(&query).await?;

    Ok(Json(json!({
        "articles": articles,
        "total": total,
        "limit": query.limit,
        "offset": query.offset,
    })))
}

pub(super) async fn get(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Article>> {
    state
        .db
        .get_article(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Article {} not found", id)))
}

/// The configured vocabulary, then any other category already in use.
pub(super) async fn categories(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let mut categories = Settings::load(&state.db).await?.categories();
    for used in state.db.article_categories().await? {
        if !categories.contains(&used) {
            categories.push(used);
        }
    }
    Ok(Json(json!({ "categories": categories })))
}
