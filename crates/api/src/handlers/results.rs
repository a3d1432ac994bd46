use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::aggregator::{
    CoverageReport, CurrentMetrics, FilteredResults, PerformanceStatistics, ResultEntry,
    DEFAULT_PAGE_LIMIT,
};
use crate::error::{ApiError, ApiResult};
use crate::routes::AppState;

const RECENT_RESULTS: usize = 10;

#[derive(Debug, Default, Deserialize)]
pub struct ResultsQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
    pub status: Option<String>,
    pub category: Option<String>,
}

pub async fn get_metrics(State(state): State<AppState>) -> Json<CurrentMetrics> {
    Json(state.aggregator.current_metrics().await)
}

pub async fn list_results(
    State(state): State<AppState>,
    Query(query): Query<ResultsQuery>,
) -> Json<FilteredResults> {
    Json(
        state
            .aggregator
            .filtered_results(
                query.status.as_deref(),
                query.category.as_deref(),
                query.page.unwrap_or(1),
                query.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
            )
            .await,
    )
}

pub async fn get_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ResultEntry>> {
    state
        .aggregator
        .result(&id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Result not found".to_string()))
}

pub async fn realtime_stats(State(state): State<AppState>) -> Json<Value> {
    let aggregator = &state.aggregator;
    Json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "metrics": aggregator.current_metrics().await,
        "activeNodes": aggregator.active_nodes().await,
        "recentResults": aggregator.recent_results(RECENT_RESULTS).await,
    }))
}

pub async fn coverage_report(State(state): State<AppState>) -> Json<CoverageReport> {
    Json(state.aggregator.coverage_report().await)
}

pub async fn performance_stats(State(state): State<AppState>) -> Json<PerformanceStatistics> {
    Json(state.aggregator.performance_statistics().await)
}
