use std::fmt::Write;
use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use swarm_core::MetricSample;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::metrics_collector::MetricsCollector;

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Prometheus text exposition of the latest sample of every series.
///
/// Series names map `.` to `_` under `namespace`; sample tags become labels.
/// Samples sharing a name must be adjacent so each family gets one
/// HELP/TYPE header.
pub fn render(samples: &[MetricSample], namespace: &str) -> String {
    let mut out = String::new();
    let mut current: Option<&str> = None;
    for sample in samples {
        let prom_name = format!("{}_{}", namespace, sample.name.replace('.', "_"));
        // writing into a String cannot fail
        if current != Some(sample.name.as_str()) {
            let _ = writeln!(out, "# HELP {prom_name} {}", sample.name);
            let _ = writeln!(out, "# TYPE {prom_name} gauge");
            current = Some(sample.name.as_str());
        }
        let labels = sample
            .tags
            .iter()
            .map(|(key, value)| format!("{key}=\"{}\"", value.replace('"', "\\\"")))
            .collect::<Vec<_>>()
            .join(",");
        let _ = writeln!(out, "{prom_name}{{{labels}}} {}", sample.value);
    }
    out
}

#[derive(Clone)]
pub struct PrometheusExporter {
    collector: Arc<MetricsCollector>,
    namespace: String,
    recorder: Option<PrometheusHandle>,
}

impl PrometheusExporter {
    pub fn new(
        collector: Arc<MetricsCollector>,
        namespace: impl Into<String>,
        recorder: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            collector,
            namespace: namespace.into(),
            recorder,
        }
    }

    /// Collector series followed by whatever the global recorder holds
    pub async fn render(&self) -> String {
        let samples = self.collector.all_latest_samples().await;
        let mut body = render(&samples, &self.namespace);
        if let Some(recorder) = &self.recorder {
            body.push_str(&recorder.render());
        }
        body
    }

    /// Router serving the exposition at `path`; everything else is 404
    pub fn router(self, path: &str) -> Router {
        Router::new()
            .route(path, get(metrics_handler))
            .with_state(self)
    }

    pub async fn serve(
        self,
        bind_address: &str,
        path: &str,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let listener = TcpListener::bind(bind_address).await?;
        info!(address = %bind_address, path, "Prometheus exporter listening");
        let app = self.router(path);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await
            .map_err(|e| {
                error!("Prometheus exporter failed: {}", e);
                anyhow::anyhow!(e)
            })
    }
}

async fn metrics_handler(State(exporter): State<PrometheusExporter>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, CONTENT_TYPE)], exporter.render().await)
}
