use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    api_observability::{AggregationConfig, ApiConfig, MonitoringConfig, ReportsConfig},
    dispatcher_worker::{NodeConfig, PartitionConfig, RegistryConfig, WorkerConfig},
    store::StoreConfig,
};

/// Full configuration of one swarm process
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub node: NodeConfig,
    pub store: StoreConfig,
    pub registry: RegistryConfig,
    pub partition: PartitionConfig,
    pub worker: WorkerConfig,
    pub aggregation: AggregationConfig,
    pub reports: ReportsConfig,
    pub monitoring: MonitoringConfig,
    pub api: ApiConfig,
}

impl AppConfig {
    /// Load configuration from a config file and environment variables
    ///
    /// Load order:
    /// 1. Built-in defaults (every section implements `Default`)
    /// 2. Config file (TOML), when one is found
    /// 3. Environment overrides, prefix `SWARM`, nested keys separated by `__`
    ///    (e.g. `SWARM_STORE__HOST=redis`)
    ///
    /// An explicit `config_path` that does not exist is an error; the
    /// default search paths are optional.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("config file not found: {}", path));
            }
        } else {
            let default_paths = ["config/swarm.toml", "swarm.toml", "/etc/swarm/config.toml"];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("SWARM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("failed to build configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("failed to parse TOML config")?;

        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize config as TOML")
    }

    pub fn validate(&self) -> Result<()> {
        self.node.validate().context("invalid node configuration")?;
        self.store.validate().context("invalid store configuration")?;
        self.registry
            .validate()
            .context("invalid registry configuration")?;
        self.partition
            .validate()
            .context("invalid partition configuration")?;
        self.worker.validate().context("invalid worker configuration")?;
        self.aggregation
            .validate()
            .context("invalid aggregation configuration")?;
        self.reports
            .validate()
            .context("invalid reports configuration")?;
        self.monitoring
            .validate()
            .context("invalid monitoring configuration")?;
        self.api.validate().context("invalid API configuration")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::{PartitionStrategy, StoreBackend};
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.partition.group_size, 10);
        assert_eq!(config.api.bind_address, "0.0.0.0:8087");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let toml_str = r#"
            [node]
            node_id = "manager-1"
            is_manager = true

            [store]
            backend = "memory"

            [partition]
            strategy = "size-based"
            group_size = 4
        "#;

        let config = AppConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.node.node_id, "manager-1");
        assert!(config.node.is_manager);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.partition.strategy, PartitionStrategy::SizeBased);
        assert_eq!(config.partition.group_size, 4);
        assert_eq!(config.registry.heartbeat_ttl_seconds, 120);
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = AppConfig::default();
        config.node.node_id = "worker-7".to_string();
        config.monitoring.webhook_url = None;

        let serialized = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&serialized).unwrap();
        assert_eq!(parsed.node.node_id, "worker-7");
        assert_eq!(parsed.monitoring.thresholds, config.monitoring.thresholds);
    }

    #[test]
    fn test_invalid_toml_rejected() {
        let toml_str = r#"
            [partition]
            group_size = 0
        "#;
        assert!(AppConfig::from_toml(toml_str).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[node]\nnode_id = \"worker-file\"\n\n[worker]\nunit_timeout_seconds = 42"
        )
        .unwrap();

        let config = AppConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.node.node_id, "worker-file");
        assert_eq!(config.worker.unit_timeout_seconds, 42);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(Some("/nonexistent/swarm.toml")).is_err());
    }
}
