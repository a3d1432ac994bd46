use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;

use crate::routes::AppState;

/// Process-wide metrics recorder in Prometheus text format. Empty when no
/// recorder is installed.
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = state
        .recorder
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default();
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}
