use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use uuid::Uuid;

use crate::error::ExportServiceError;
use crate::state::AppState;
use crate::usecase::receive_part::ReceivePartUseCase;

const TOKEN_HEADER: &str = "x-internal-token";

/// Validate the shared secret on `/internal/*` routes. These sit behind the
/// service mesh, never the gateway, so the header is the whole story.
fn verify_internal_token(headers: &HeaderMap, expected: &str) -> Result<(), ExportServiceError> {
    let presented = headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ExportServiceError::InvalidInternalToken)?;
    if presented != expected {
        return Err(ExportServiceError::InvalidInternalToken);
    }
    Ok(())
}

// ── POST /internal/export-jobs/{job_id}/parts/{service} ──────────────────────

/// Direct part delivery for collaborators that call back over HTTP instead of
/// publishing an event. Semantics match the event path: idempotent per
/// (job, service).
pub async fn receive_part(
    State(state): State<AppState>,
    Path((job_id, service)): Path<(Uuid, String)>,
    headers: HeaderMap,
    Json(payload): Json<serde_json::Value>,
) -> Result<StatusCode, ExportServiceError> {
    verify_internal_token(&headers, &state.internal_token)?;
    let usecase = ReceivePartUseCase {
        jobs: state.job_repo(),
        blob: state.blob.clone(),
    };
    usecase.execute(job_id, &service, payload).await?;
    Ok(StatusCode::OK)
}
