use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::cache::CacheStats;
use crate::models::WarmRequest;
use crate::pipeline::{WarmReport, DEFAULT_WARM_QUESTIONS};
use crate::query_log::QueryLog;
use crate::state::AppState;

const DEFAULT_LOG_LIMIT: usize = 20;

/// GET /api/cache/stats
pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.pipeline.cache().stats())
}

/// POST /api/cache/clear
pub async fn clear_cache(State(state): State<AppState>) -> StatusCode {
    state.pipeline.cache().clear();
    StatusCode::NO_CONTENT
}

/// POST /api/cache/warm — seed the cache from a question list.
pub async fn warm_cache(
    State(state): State<AppState>,
    body: Option<Json<WarmRequest>>,
) -> Json<WarmReport> {
    let questions: Vec<String> = body
        .and_then(|Json(req)| req.questions)
        .filter(|q| !q.is_empty())
        .unwrap_or_else(|| {
            DEFAULT_WARM_QUESTIONS
                .iter()
                .map(|q| q.to_string())
                .collect()
        });

    tracing::info!("Warming cache with {} questions", questions.len());
    Json(state.pipeline.warm_cache(&questions).await)
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
}

/// GET /api/logs — most recent query logs first.
pub async fn list_logs(
    State(state): State<AppState>,
    Query(params): Query<LogsQuery>,
) -> Json<Vec<QueryLog>> {
    let limit = params.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    Json(state.pipeline.logs().recent(limit))
}

/// GET /api/logs/{id}
pub async fn get_log(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<QueryLog>, (StatusCode, String)> {
    state
        .pipeline
        .logs()
        .get(&id)
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, format!("Query log {id} not found")))
}
