use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Serialize;
use uuid::Uuid;

use questline_core::identity::IdentityHeaders;

use crate::domain::types::ExportJob;
use crate::error::ExportServiceError;
use crate::state::AppState;
use crate::usecase::export_job::{
    CreateExportJobUseCase, DownloadExportUseCase, GetExportJobUseCase,
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportJobResponse {
    pub job_id: String,
    pub status: String,
    #[serde(serialize_with = "questline_core::serde::to_rfc3339_ms")]
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(serialize_with = "questline_core::serde::to_rfc3339_ms")]
    pub expires_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl From<ExportJob> for ExportJobResponse {
    fn from(job: ExportJob) -> Self {
        Self {
            job_id: job.id.to_string(),
            status: job.status.as_str().to_owned(),
            created_at: job.created_at,
            expires_at: job.expires_at,
            failure_reason: job.failure_reason,
        }
    }
}

// ── POST /users/me/export-jobs ───────────────────────────────────────────────

pub async fn create_export_job(
    identity: IdentityHeaders,
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<ExportJobResponse>), ExportServiceError> {
    let usecase = CreateExportJobUseCase {
        jobs: state.job_repo(),
        blob: state.blob.clone(),
        source: state.part_source(),
        services: state.part_services.clone(),
        job_ttl: state.job_ttl,
    };
    let job = usecase.execute(identity.user_id).await?;
    // 202: the saga continues after the response; the caller polls status.
    Ok((StatusCode::ACCEPTED, Json(job.into())))
}

// ── GET /users/me/export-jobs/{job_id} ───────────────────────────────────────

pub async fn get_export_job(
    identity: IdentityHeaders,
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<ExportJobResponse>, ExportServiceError> {
    let usecase = GetExportJobUseCase {
        jobs: state.job_repo(),
    };
    let job = usecase.execute(identity.user_id, job_id).await?;
    Ok(Json(job.into()))
}

// ── GET /users/me/export-jobs/{job_id}/download ──────────────────────────────

#[derive(Serialize)]
pub struct DownloadResponse {
    pub url: String,
}

pub async fn download_export_job(
    identity: IdentityHeaders,
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<DownloadResponse>, ExportServiceError> {
    let usecase = DownloadExportUseCase {
        jobs: state.job_repo(),
        blob: state.blob.clone(),
        presign_ttl: state.presign_ttl,
    };
    let url = usecase.execute(identity.user_id, job_id).await?;
    Ok(Json(DownloadResponse { url }))
}
