use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use swarm_core::{AlertSeverity, CoordinationStore, SwarmResult};
use swarm_dispatcher::NodeRegistry;
use swarm_infrastructure::keys::NODES_KEY;
use swarm_infrastructure::SystemProbe;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::alerting::AlertManager;

const DISK_USAGE_LIMIT: f64 = 90.0;

/// Periodic peer and local system checks that raise alerts
pub struct HealthChecker {
    node_id: String,
    store: Arc<dyn CoordinationStore>,
    registry: NodeRegistry,
    probe: Arc<dyn SystemProbe>,
    alerts: Arc<AlertManager>,
    disk_path: PathBuf,
}

impl HealthChecker {
    pub fn new(
        node_id: impl Into<String>,
        store: Arc<dyn CoordinationStore>,
        registry: NodeRegistry,
        probe: Arc<dyn SystemProbe>,
        alerts: Arc<AlertManager>,
        disk_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            store,
            registry,
            probe,
            alerts,
            disk_path: disk_path.into(),
        }
    }

    /// Flags every registered peer whose heartbeat is older than the
    /// unhealthy threshold or has expired. Returns the flagged node ids.
    pub async fn check_nodes(&self) -> SwarmResult<Vec<String>> {
        let limit = self.registry.config().unhealthy_after();
        let mut node_ids = self.store.hkeys(NODES_KEY).await?;
        node_ids.sort();

        let mut unhealthy = Vec::new();
        for node_id in node_ids.into_iter().filter(|id| *id != self.node_id) {
            let reason = match self.registry.heartbeat_age(&node_id).await? {
                Some(age) if age > limit => "Heartbeat timeout",
                Some(_) => continue,
                None => "Heartbeat expired",
            };
            warn!(node_id = %node_id, reason, "Node is unhealthy");
            self.alerts
                .trigger(
                    AlertSeverity::Critical,
                    &format!("Node {node_id} is unhealthy"),
                    json!({ "nodeId": node_id, "reason": reason }),
                )
                .await;
            unhealthy.push(node_id);
        }
        Ok(unhealthy)
    }

    /// Store reachability and local disk headroom
    pub async fn check_system(&self) {
        if let Err(e) = self.store.ping().await {
            self.alerts
                .trigger(
                    AlertSeverity::Critical,
                    "System error detected",
                    json!({ "error": e.to_string() }),
                )
                .await;
            return;
        }

        match self.probe.disk_usage(&self.disk_path) {
            Ok(usage) if usage > DISK_USAGE_LIMIT => {
                self.alerts
                    .trigger(
                        AlertSeverity::Warning,
                        "High disk usage",
                        json!({ "diskUsage": usage, "threshold": DISK_USAGE_LIMIT }),
                    )
                    .await;
            }
            Ok(usage) => debug!(disk_usage = usage, "Disk usage within limits"),
            Err(e) => warn!("Failed to read disk usage: {}", e),
        }
    }

    pub async fn check(&self) {
        if let Err(e) = self.check_nodes().await {
            error!("Node health check failed: {}", e);
        }
        self.check_system().await;
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = interval(self.registry.config().health_check_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(node_id = %self.node_id, "Health checks started");

        loop {
            tokio::select! {
                _ = ticker.tick() => self.check().await,
                _ = shutdown_rx.recv() => {
                    info!(node_id = %self.node_id, "Health checks shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use swarm_core::config::{AlertThresholds, RegistryConfig};
    use swarm_core::now_millis;
    use swarm_infrastructure::keys::heartbeat_key;
    use swarm_infrastructure::{HostSnapshot, InMemoryStore};

    use super::*;

    struct DiskProbe(f64);

    impl SystemProbe for DiskProbe {
        fn snapshot(&self) -> SwarmResult<HostSnapshot> {
            Ok(HostSnapshot {
                hostname: "h".to_string(),
                platform: "linux".to_string(),
                cpus: 1,
                total_memory: 1,
                free_memory: 1,
                load_average: [0.0; 3],
                uptime_seconds: 0.0,
            })
        }

        fn cpu_usage(&self) -> SwarmResult<f64> {
            Ok(0.0)
        }

        fn disk_usage(&self, _path: &Path) -> SwarmResult<f64> {
            Ok(self.0)
        }
    }

    fn checker(store: Arc<InMemoryStore>, disk: f64) -> HealthChecker {
        let registry = NodeRegistry::new(store.clone(), RegistryConfig::default());
        let alerts = Arc::new(AlertManager::new(
            "monitor",
            "svc",
            AlertThresholds::default(),
            Duration::from_secs(300),
            Vec::new(),
        ));
        HealthChecker::new("monitor", store, registry, Arc::new(DiskProbe(disk)), alerts, "/")
    }

    async fn beat(store: &InMemoryStore, node_id: &str, age_ms: i64) {
        store.hset(NODES_KEY, node_id, "{}").await.unwrap();
        store
            .set_ex(
                &heartbeat_key(node_id),
                &(now_millis() - age_ms).to_string(),
                Duration::from_secs(120),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stale_and_expired_peers_are_flagged() {
        let store = Arc::new(InMemoryStore::new());
        beat(&store, "fresh", 5_000).await;
        beat(&store, "stale", 121_000).await;
        beat(&store, "monitor", 500_000).await;
        store.hset(NODES_KEY, "gone", "{}").await.unwrap();
        let checker = checker(store, 10.0);

        let unhealthy = checker.check_nodes().await.unwrap();
        assert_eq!(unhealthy, vec!["gone", "stale"]);

        let alerts = checker.alerts.recent(10).await;
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[1].message, "Node stale is unhealthy");
        assert_eq!(alerts[1].severity, AlertSeverity::Critical);
        assert_eq!(alerts[1].metadata["reason"], "Heartbeat timeout");
    }

    #[tokio::test]
    async fn test_high_disk_usage_warns() {
        let store = Arc::new(InMemoryStore::new());
        let checker = checker(store, 95.0);

        checker.check_system().await;
        let alerts = checker.alerts.recent(10).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].message, "High disk usage");
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);
    }

    #[tokio::test]
    async fn test_store_outage_is_critical() {
        let store = Arc::new(InMemoryStore::new());
        store.set_offline(true);
        let checker = checker(store, 95.0);

        checker.check().await;
        let alerts = checker.alerts.recent(10).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].message, "System error detected");
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
    }
}
