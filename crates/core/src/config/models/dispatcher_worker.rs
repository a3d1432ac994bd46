use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn env_or(name: &str, fallback: impl FnOnce() -> String) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(fallback)
}

/// Identity of this process within the fleet
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node_id: String,
    pub service_id: String,
    pub task_id: String,
    pub is_manager: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: env_or("SWARM_NODE_ID", || {
                hostname::get()
                    .ok()
                    .and_then(|h| h.into_string().ok())
                    .unwrap_or_else(|| "unknown".to_string())
            }),
            service_id: env_or("SWARM_SERVICE_ID", || "unknown".to_string()),
            task_id: env_or("SWARM_TASK_ID", || "unknown".to_string()),
            is_manager: std::env::var("NODE_ROLE").map(|r| r == "manager").unwrap_or(false),
        }
    }
}

impl NodeConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.node_id.is_empty() {
            return Err(anyhow::anyhow!("node_id must not be empty"));
        }
        if self.node_id.contains(':') {
            return Err(anyhow::anyhow!(
                "node_id must not contain ':' (used as key separator): {}",
                self.node_id
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub heartbeat_interval_seconds: u64,
    pub heartbeat_ttl_seconds: u64,
    pub liveness_window_seconds: u64,
    pub health_check_interval_seconds: u64,
    pub unhealthy_after_seconds: u64,
    pub register_retry_attempts: u32,
    pub register_retry_delay_seconds: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_seconds: 10,
            heartbeat_ttl_seconds: 120,
            liveness_window_seconds: 60,
            health_check_interval_seconds: 30,
            unhealthy_after_seconds: 120,
            register_retry_attempts: 3,
            register_retry_delay_seconds: 2,
        }
    }
}

impl RegistryConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn heartbeat_ttl(&self) -> Duration {
        Duration::from_secs(self.heartbeat_ttl_seconds)
    }

    pub fn liveness_window(&self) -> Duration {
        Duration::from_secs(self.liveness_window_seconds)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds)
    }

    pub fn unhealthy_after(&self) -> Duration {
        Duration::from_secs(self.unhealthy_after_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.heartbeat_interval_seconds == 0 {
            return Err(anyhow::anyhow!("heartbeat interval must be greater than 0"));
        }
        if self.heartbeat_ttl_seconds <= self.heartbeat_interval_seconds {
            return Err(anyhow::anyhow!(
                "heartbeat TTL ({}s) must exceed the heartbeat interval ({}s)",
                self.heartbeat_ttl_seconds,
                self.heartbeat_interval_seconds
            ));
        }
        if self.liveness_window_seconds == 0 || self.health_check_interval_seconds == 0 {
            return Err(anyhow::anyhow!(
                "liveness window and health check interval must be greater than 0"
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PartitionStrategy {
    #[default]
    RoundRobin,
    SizeBased,
    DependencyAware,
}

impl PartitionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionStrategy::RoundRobin => "round-robin",
            PartitionStrategy::SizeBased => "size-based",
            PartitionStrategy::DependencyAware => "dependency-aware",
        }
    }
}

impl fmt::Display for PartitionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PartitionStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round-robin" | "round_robin" => Ok(PartitionStrategy::RoundRobin),
            "size-based" | "size_based" => Ok(PartitionStrategy::SizeBased),
            "dependency-aware" | "dependency_aware" => Ok(PartitionStrategy::DependencyAware),
            other => Err(anyhow::anyhow!("unknown partition strategy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    pub strategy: PartitionStrategy,
    pub group_size: usize,
    /// Root holding one sub-directory per category
    pub test_root: PathBuf,
    pub categories: Vec<String>,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            strategy: PartitionStrategy::RoundRobin,
            group_size: 10,
            test_root: PathBuf::from("/app/tests"),
            categories: ["unit", "integration", "e2e", "performance", "security"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }
}

impl PartitionConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.group_size == 0 {
            return Err(anyhow::anyhow!("group_size must be greater than 0"));
        }
        if self.categories.is_empty() {
            return Err(anyhow::anyhow!("at least one test category is required"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub poll_timeout_seconds: u64,
    pub error_backoff_seconds: u64,
    pub unit_timeout_seconds: u64,
    pub shutdown_grace_seconds: u64,
    pub working_dir: PathBuf,
    pub max_tasks: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_timeout_seconds: 5,
            error_backoff_seconds: 5,
            unit_timeout_seconds: 300,
            shutdown_grace_seconds: 60,
            working_dir: PathBuf::from("/app"),
            max_tasks: 10,
        }
    }
}

impl WorkerConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_seconds)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_seconds)
    }

    pub fn unit_timeout(&self) -> Duration {
        Duration::from_secs(self.unit_timeout_seconds)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("poll timeout must be greater than 0"));
        }
        if self.unit_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("unit timeout must be greater than 0"));
        }
        if self.max_tasks == 0 {
            return Err(anyhow::anyhow!("max_tasks must be greater than 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(
            "size-based".parse::<PartitionStrategy>().unwrap(),
            PartitionStrategy::SizeBased
        );
        assert_eq!(
            "dependency_aware".parse::<PartitionStrategy>().unwrap(),
            PartitionStrategy::DependencyAware
        );
        assert!("random".parse::<PartitionStrategy>().is_err());
    }

    #[test]
    fn test_registry_defaults_are_consistent() {
        let config = RegistryConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(10));
        assert_eq!(config.liveness_window(), Duration::from_secs(60));
    }

    #[test]
    fn test_registry_rejects_ttl_below_interval() {
        let config = RegistryConfig {
            heartbeat_interval_seconds: 30,
            heartbeat_ttl_seconds: 20,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_node_id_rejects_separator() {
        let config = NodeConfig {
            node_id: "a:b".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
