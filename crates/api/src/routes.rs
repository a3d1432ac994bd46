use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use swarm_core::CoordinationStore;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;

use crate::aggregator::ResultAggregator;
use crate::handlers::{
    health::{dashboard, health_check},
    metrics::prometheus_metrics,
    reports::{download_report, generate_report, list_reports},
    results::{
        coverage_report, get_metrics, get_result, list_results, performance_stats, realtime_stats,
    },
};
use crate::middleware::{cors_layer, request_logging, trace_layer};
use crate::reports::ReportGenerator;

/// Shared state of the reporting API
#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<ResultAggregator>,
    pub reports: Arc<ReportGenerator>,
    pub store: Arc<dyn CoordinationStore>,
    pub recorder: Option<PrometheusHandle>,
}

pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(dashboard))
        .route("/health", get(health_check))
        .route("/metrics", get(prometheus_metrics))
        .route("/api/metrics", get(get_metrics))
        .route("/api/results", get(list_results))
        .route("/api/results/{id}", get(get_result))
        .route("/api/stats/realtime", get(realtime_stats))
        .route("/api/coverage", get(coverage_report))
        .route("/api/performance", get(performance_stats))
        .route("/api/reports", get(list_reports))
        .route("/api/reports/generate", post(generate_report))
        .route("/api/reports/{id}/download", get(download_report))
        .with_state(state)
}

/// Routes plus request logging, tracing and (optionally) permissive CORS
pub fn create_app(state: AppState, cors_enabled: bool) -> Router {
    let router = create_routes(state)
        .layer(axum::middleware::from_fn(request_logging))
        .layer(trace_layer());
    if cors_enabled {
        router.layer(cors_layer())
    } else {
        router
    }
}

pub async fn serve(
    app: Router,
    bind_address: &str,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_address).await?;
    info!(address = %bind_address, "Reporting API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await?;
    info!("Reporting API stopped");
    Ok(())
}
