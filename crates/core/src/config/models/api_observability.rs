use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_webhook_url() -> Option<String> {
    std::env::var("ALERT_WEBHOOK_URL")
        .ok()
        .filter(|url| !url.is_empty())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind_address: String,
    pub cors_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8087".to_string(),
            cors_enabled: true,
        }
    }
}

impl ApiConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_address.is_empty() {
            return Err(anyhow::anyhow!("API bind address must not be empty"));
        }
        self.bind_address
            .parse::<std::net::SocketAddr>()
            .map_err(|e| anyhow::anyhow!("invalid API bind address {}: {e}", self.bind_address))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMode {
    #[default]
    Realtime,
    Batch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub mode: AggregationMode,
    pub batch_interval_seconds: u64,
    pub batch_size: usize,
    pub results_poll_timeout_seconds: u64,
    pub failures_poll_timeout_seconds: u64,
    pub error_backoff_seconds: u64,
    pub history_size: usize,
    pub sample_interval_seconds: u64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            mode: AggregationMode::Realtime,
            batch_interval_seconds: 10,
            batch_size: 100,
            results_poll_timeout_seconds: 5,
            failures_poll_timeout_seconds: 1,
            error_backoff_seconds: 5,
            history_size: 3600,
            sample_interval_seconds: 1,
        }
    }
}

impl AggregationConfig {
    pub fn batch_interval(&self) -> Duration {
        Duration::from_secs(self.batch_interval_seconds)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 || self.batch_interval_seconds == 0 {
            return Err(anyhow::anyhow!(
                "batch size and batch interval must be greater than 0"
            ));
        }
        if self.history_size == 0 || self.sample_interval_seconds == 0 {
            return Err(anyhow::anyhow!(
                "history size and sample interval must be greater than 0"
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportsConfig {
    pub directory: PathBuf,
    /// Gzip generated reports
    pub compression: bool,
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("/app/reports"),
            compression: true,
        }
    }
}

impl ReportsConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.directory.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("reports directory must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertThresholds {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub test_failure_rate: f64,
    pub response_time: f64,
    pub error_rate: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            cpu_usage: 80.0,
            memory_usage: 85.0,
            test_failure_rate: 10.0,
            response_time: 5000.0,
            error_rate: 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlertSinkKind {
    Log,
    Store,
    Webhook,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrometheusConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub path: String,
    pub namespace: String,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:9091".to_string(),
            path: "/metrics".to_string(),
            namespace: "swarm_test".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub collection_interval_seconds: u64,
    pub retention_hours: u64,
    pub persisted_samples: usize,
    pub persisted_ttl_seconds: u64,
    pub thresholds: AlertThresholds,
    pub alert_cooldown_seconds: u64,
    pub sinks: Vec<AlertSinkKind>,
    #[serde(default = "default_webhook_url")]
    pub webhook_url: Option<String>,
    pub probe_url: String,
    pub probe_timeout_seconds: u64,
    pub disk_path: PathBuf,
    pub prometheus: PrometheusConfig,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            collection_interval_seconds: 5,
            retention_hours: 24,
            persisted_samples: 1000,
            persisted_ttl_seconds: 86_400,
            thresholds: AlertThresholds::default(),
            alert_cooldown_seconds: 300,
            sinks: vec![AlertSinkKind::Log, AlertSinkKind::Store, AlertSinkKind::Webhook],
            webhook_url: default_webhook_url(),
            probe_url: "http://app-server:8086/health".to_string(),
            probe_timeout_seconds: 5,
            disk_path: PathBuf::from("/"),
            prometheus: PrometheusConfig::default(),
        }
    }
}

impl MonitoringConfig {
    pub fn collection_interval(&self) -> Duration {
        Duration::from_secs(self.collection_interval_seconds)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours * 3600)
    }

    pub fn alert_cooldown(&self) -> Duration {
        Duration::from_secs(self.alert_cooldown_seconds)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.collection_interval_seconds == 0 {
            return Err(anyhow::anyhow!("collection interval must be greater than 0"));
        }
        if self.retention_hours == 0 {
            return Err(anyhow::anyhow!("metric retention must be greater than 0"));
        }
        if self.prometheus.enabled && !self.prometheus.path.starts_with('/') {
            return Err(anyhow::anyhow!(
                "prometheus path must start with '/': {}",
                self.prometheus.path
            ));
        }
        if self.prometheus.namespace.is_empty() {
            return Err(anyhow::anyhow!("prometheus namespace must not be empty"));
        }
        Ok(())
    }
}
