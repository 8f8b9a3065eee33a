use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use questline_core::health::{healthz, readyz};
use questline_core::middleware::{propagate_request_id_layer, request_id_layer};

use crate::handlers::{
    export_job::{create_export_job, download_export_job, get_export_job},
    parts::receive_part,
};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Export jobs
        .route("/users/me/export-jobs", post(create_export_job))
        .route("/users/me/export-jobs/{job_id}", get(get_export_job))
        .route(
            "/users/me/export-jobs/{job_id}/download",
            get(download_export_job),
        )
        // Internal part delivery
        .route(
            "/internal/export-jobs/{job_id}/parts/{service}",
            post(receive_part),
        )
        .layer(propagate_request_id_layer())
        .layer(TraceLayer::new_for_http())
        .layer(request_id_layer())
        .with_state(state)
}
