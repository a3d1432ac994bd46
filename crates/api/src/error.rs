use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use swarm_core::SwarmError;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Swarm(#[from] SwarmError),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, details) = match &self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), None),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            ApiError::Swarm(SwarmError::UnsupportedReportFormat(format)) => (
                StatusCode::BAD_REQUEST,
                "Unsupported report format".to_string(),
                Some(format!("format '{format}' is not one of html, json, xml, csv")),
            ),
            ApiError::Swarm(SwarmError::ReportGenerationFailure(msg)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Report generation failed".to_string(),
                Some(msg.clone()),
            ),
            ApiError::Swarm(SwarmError::StoreUnavailable(msg)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Coordination store unavailable".to_string(),
                Some(msg.clone()),
            ),
            ApiError::Swarm(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                Some(err.to_string()),
            ),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                Some(msg.clone()),
            ),
        };

        if status.is_server_error() {
            error!(status = status.as_u16(), "API error: {}", self);
        }

        let body = match details {
            Some(details) => json!({ "error": message, "details": details }),
            None => json!({ "error": message }),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;

    use super::*;

    async fn body_of(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_not_found_body() {
        let (status, body) = body_of(ApiError::NotFound("Result not found".to_string())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "error": "Result not found" }));
    }

    #[tokio::test]
    async fn test_report_errors_map_to_status() {
        let (status, body) =
            body_of(SwarmError::UnsupportedReportFormat("pdf".to_string()).into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Unsupported report format");

        let (status, body) =
            body_of(SwarmError::ReportGenerationFailure("disk full".to_string()).into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Report generation failed");
        assert_eq!(body["details"], "disk full");
    }
}
