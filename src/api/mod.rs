pub mod admin;
pub mod ask;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/ask", post(ask::ask))
        .route("/api/ask/stream", post(ask::ask_stream))
        .route("/api/cache/stats", get(admin::cache_stats))
        .route("/api/cache/clear", post(admin::clear_cache))
        .route("/api/cache/warm", post(admin::warm_cache))
        .route("/api/logs", get(admin::list_logs))
        .route("/api/logs/{id}", get(admin::get_log))
        .with_state(state)
}
