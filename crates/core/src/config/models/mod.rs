pub mod api_observability;
pub mod app_config;
pub mod dispatcher_worker;
pub mod store;

pub use api_observability::{
    AggregationConfig, AggregationMode, AlertSinkKind, AlertThresholds, ApiConfig,
    MonitoringConfig, PrometheusConfig, ReportsConfig,
};
pub use app_config::AppConfig;
pub use dispatcher_worker::{
    NodeConfig, PartitionConfig, PartitionStrategy, RegistryConfig, WorkerConfig,
};
pub use store::{StoreBackend, StoreConfig};
