use axum::Json;
use axum::http::StatusCode;
use serde_json::json;

/// Handler for `GET /healthz`. Liveness only: the process is up.
pub async fn healthz() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

/// Handler for `GET /readyz`. Default readiness is liveness; services with
/// startup dependencies mount their own handler instead.
pub async fn readyz() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(json!({ "status": "ready" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn healthz_returns_ok_body() {
        let (status, Json(body)) = healthz().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn readyz_returns_ready_body() {
        let (status, Json(body)) = readyz().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
    }
}
