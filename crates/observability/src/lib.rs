//! Monitoring for swarm nodes: periodic metric collection, threshold
//! alerting with cooldown, peer health checks, the Prometheus exporter and
//! process-wide logging setup.

pub mod alerting;
pub mod health_checker;
pub mod metrics_collector;
pub mod prometheus;
pub mod telemetry;

pub use alerting::{
    sinks_from_config, AlertManager, AlertSink, AlertSummary, LogSink, StoreSink, WebhookSink,
};
pub use health_checker::HealthChecker;
pub use metrics_collector::{test_statistics, MetricsCollector, MonitoringData, TestStatistics};
pub use prometheus::PrometheusExporter;
pub use telemetry::{init_logging, install_metrics_recorder, LogFormat, LoggingConfig};
