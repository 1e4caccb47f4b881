use axum::{
    Json, Router,
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;

use crate::handlers::{scanner, stream};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/scanner/start", post(scanner::start_scan))
        .route("/api/scanner/jobs", get(scanner::list_jobs))
        .route("/api/scanner/jobs/{scan_id}", get(scanner::get_job))
        .route(
            "/api/scanner/jobs/{scan_id}/details",
            get(scanner::job_details),
        )
        .route("/api/scanner/jobs/{scan_id}/pause", post(scanner::pause_job))
        .route(
            "/api/scanner/jobs/{scan_id}/resume",
            post(scanner::resume_job),
        )
        .route("/api/scanner/jobs/{scan_id}/stop", post(scanner::stop_job))
        .route(
            "/api/scanner/jobs/{scan_id}/cancel",
            post(scanner::cancel_job),
        )
        .route(
            "/api/scanner/jobs/{scan_id}/stream",
            get(stream::stream_scan_events),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
