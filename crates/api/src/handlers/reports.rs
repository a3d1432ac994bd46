use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::reports::ReportMeta;
use crate::routes::AppState;

fn default_format() -> String {
    "html".to_string()
}

fn default_include_details() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateReportRequest {
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_include_details")]
    pub include_details: bool,
}

impl Default for GenerateReportRequest {
    fn default() -> Self {
        Self {
            format: default_format(),
            include_details: default_include_details(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedReport {
    pub report_id: String,
    pub download_url: String,
    #[serde(flatten)]
    pub report: ReportMeta,
}

/// An empty body generates a detailed HTML report
pub async fn generate_report(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<GeneratedReport>> {
    let request = if body.is_empty() {
        GenerateReportRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid report request: {e}")))?
    };
    let meta = state
        .reports
        .generate(&request.format, request.include_details)
        .await?;
    Ok(Json(GeneratedReport {
        report_id: meta.id.clone(),
        download_url: format!("/api/reports/{}/download", meta.id),
        report: meta,
    }))
}

pub async fn list_reports(State(state): State<AppState>) -> Json<Vec<ReportMeta>> {
    Json(state.reports.list().await)
}

pub async fn download_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let (meta, bytes) = state
        .reports
        .read(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Report not found".to_string()))?;
    Ok((
        [
            (header::CONTENT_TYPE, meta.mime_type),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", meta.filename),
            ),
        ],
        bytes,
    ))
}
