use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Export service domain error variants.
#[derive(Debug, thiserror::Error)]
pub enum ExportServiceError {
    #[error("export job not found")]
    JobNotFound,
    #[error("export archive not ready")]
    NotReady,
    /// A collaborator delivered a part for a service this job does not
    /// expect: a deployment/config bug, not a business error.
    #[error("no such part: {service}")]
    UnknownPart { service: String },
    #[error("invalid internal token")]
    InvalidInternalToken,
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl ExportServiceError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JobNotFound => "JOB_NOT_FOUND",
            Self::NotReady => "NOT_READY",
            Self::UnknownPart { .. } => "UNKNOWN_PART",
            Self::InvalidInternalToken => "INVALID_INTERNAL_TOKEN",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

impl IntoResponse for ExportServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::JobNotFound => StatusCode::NOT_FOUND,
            Self::NotReady => StatusCode::CONFLICT,
            Self::UnknownPart { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidInternalToken => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // Log 500s only — tower-http TraceLayer already records method/uri/status for all
        // requests. 4xx are expected client errors; logging them here would be noise.
        match &self {
            Self::Internal(e) => {
                tracing::error!(error = %e, kind = "INTERNAL", "internal error");
            }
            Self::UnknownPart { service } => {
                // Loud on purpose: an unexpected service name means the
                // fan-out configuration disagrees between services.
                tracing::error!(service = %service, kind = "UNKNOWN_PART", "unexpected export part");
            }
            _ => {}
        }
        let body = serde_json::json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        (status, axum::Json(body)).into_response()
    }
}
