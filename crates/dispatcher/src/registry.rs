use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use swarm_core::config::{NodeConfig, RegistryConfig};
use swarm_core::{
    is_live, now_millis, CoordinationStore, NodeDescriptor, NodeStatus, NodeStatusSnapshot, SwarmError,
    SwarmResult, REGISTERED_STATUS,
};
use swarm_infrastructure::keys::{heartbeat_key, status_key, NODES_KEY};
use swarm_infrastructure::SystemProbe;
use tokio::sync::broadcast;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Running/completed test counters a node publishes with every heartbeat
#[derive(Debug, Default)]
pub struct NodeActivity {
    running: AtomicUsize,
    completed: AtomicUsize,
}

impl NodeActivity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unit_started(&self) {
        self.running.fetch_add(1, Ordering::SeqCst);
    }

    pub fn unit_finished(&self) {
        // saturating: a finish without a start must not wrap
        let _ = self
            .running
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)));
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

/// Builds this process's registry descriptor from config and host facts
pub fn describe_node(node: &NodeConfig, probe: &dyn SystemProbe) -> SwarmResult<NodeDescriptor> {
    let host = probe.snapshot()?;
    Ok(NodeDescriptor {
        node_id: node.node_id.clone(),
        service_id: node.service_id.clone(),
        task_id: node.task_id.clone(),
        is_manager: node.is_manager,
        hostname: host.hostname,
        platform: host.platform,
        cpus: host.cpus,
        total_memory: host.total_memory,
        free_memory: host.free_memory,
        load_average: host.load_average,
        registered_at: Utc::now(),
        status: REGISTERED_STATUS.to_string(),
    })
}

/// Membership view over the coordination store.
///
/// A node is a member while its descriptor sits in `swarm:nodes`; it is
/// *alive* only while its heartbeat key exists and is younger than the
/// liveness window.
#[derive(Clone)]
pub struct NodeRegistry {
    store: Arc<dyn CoordinationStore>,
    config: RegistryConfig,
}

impl NodeRegistry {
    pub fn new(store: Arc<dyn CoordinationStore>, config: RegistryConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Stores the descriptor and writes a first heartbeat, retrying with a
    /// growing delay. The caller treats a final failure as non-fatal: the
    /// heartbeat loop re-registers once the store is reachable.
    pub async fn register(&self, descriptor: &NodeDescriptor) -> SwarmResult<()> {
        let payload = serde_json::to_string(descriptor)?;
        let attempts = self.config.register_retry_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let result = async {
                self.store
                    .hset(NODES_KEY, &descriptor.node_id, &payload)
                    .await?;
                self.write_heartbeat(&descriptor.node_id).await
            }
            .await;

            match result {
                Ok(()) => {
                    info!(
                        node_id = %descriptor.node_id,
                        role = ?descriptor.role(),
                        hostname = %descriptor.hostname,
                        "Node registered"
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        node_id = %descriptor.node_id,
                        "Node registration failed (attempt {}/{}): {}",
                        attempt,
                        attempts,
                        e
                    );
                    last_error = Some(e);
                    if attempt < attempts {
                        let delay = self.config.register_retry_delay_seconds * attempt as u64;
                        sleep(Duration::from_secs(delay)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            SwarmError::StoreUnavailable("node registration failed".to_string())
        }))
    }

    pub async fn is_registered(&self, node_id: &str) -> SwarmResult<bool> {
        Ok(self.store.hget(NODES_KEY, node_id).await?.is_some())
    }

    async fn write_heartbeat(&self, node_id: &str) -> SwarmResult<()> {
        self.store
            .set_ex(
                &heartbeat_key(node_id),
                &now_millis().to_string(),
                self.config.heartbeat_ttl(),
            )
            .await
    }

    /// Refreshes the heartbeat key and the status hash
    pub async fn heartbeat(&self, node_id: &str, snapshot: &NodeStatusSnapshot) -> SwarmResult<()> {
        self.write_heartbeat(node_id).await?;
        self.store
            .hset_multiple(&status_key(node_id), &snapshot.to_fields())
            .await?;
        debug!(
            node_id,
            running = snapshot.running_tests,
            completed = snapshot.completed_tests,
            "Heartbeat sent"
        );
        Ok(())
    }

    /// Every descriptor in the registry, sorted by node id. Malformed entries
    /// are skipped.
    pub async fn list_registered(&self) -> SwarmResult<Vec<NodeDescriptor>> {
        let entries = self.store.hgetall(NODES_KEY).await?;
        let mut nodes: Vec<NodeDescriptor> = entries
            .into_iter()
            .filter_map(|(node_id, raw)| match serde_json::from_str(&raw) {
                Ok(descriptor) => Some(descriptor),
                Err(e) => {
                    warn!(node_id = %node_id, "Skipping malformed node descriptor: {}", e);
                    None
                }
            })
            .collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(nodes)
    }

    /// Age of the last heartbeat; `None` when the key is absent or unreadable
    pub async fn heartbeat_age(&self, node_id: &str) -> SwarmResult<Option<Duration>> {
        let Some(raw) = self.store.get(&heartbeat_key(node_id)).await? else {
            return Ok(None);
        };
        let Ok(beat_ms) = raw.parse::<i64>() else {
            warn!(node_id, value = %raw, "Unreadable heartbeat value");
            return Ok(None);
        };
        let age_ms = (now_millis() - beat_ms).max(0) as u64;
        Ok(Some(Duration::from_millis(age_ms)))
    }

    /// Registered nodes whose heartbeat age is within the liveness window
    pub async fn list_active(&self) -> SwarmResult<Vec<NodeDescriptor>> {
        let window = self.config.liveness_window();
        let mut active = Vec::new();
        for node in self.list_registered().await? {
            match self.heartbeat_age(&node.node_id).await? {
                Some(age) if is_live(age, window) => active.push(node),
                Some(age) => debug!(node_id = %node.node_id, ?age, "Node heartbeat is stale"),
                None => debug!(node_id = %node.node_id, "Node has no heartbeat"),
            }
        }
        Ok(active)
    }

    pub async fn list_active_workers(&self) -> SwarmResult<Vec<NodeDescriptor>> {
        Ok(self
            .list_active()
            .await?
            .into_iter()
            .filter(|node| !node.is_manager)
            .collect())
    }

    pub async fn node_status(&self, node_id: &str) -> SwarmResult<NodeStatus> {
        let has_descriptor = self.is_registered(node_id).await?;
        let ever_heartbeated = self.store.hlen(&status_key(node_id)).await? > 0;
        let age = self.heartbeat_age(node_id).await?;
        Ok(NodeStatus::derive(
            has_descriptor,
            ever_heartbeated,
            age,
            self.config.liveness_window(),
        ))
    }

    pub async fn status_snapshot(&self, node_id: &str) -> SwarmResult<Option<NodeStatusSnapshot>> {
        let fields = self.store.hgetall(&status_key(node_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(NodeStatusSnapshot::from_fields(&fields)))
    }

    pub async fn deregister(&self, node_id: &str) -> SwarmResult<()> {
        self.store.hdel(NODES_KEY, node_id).await?;
        self.store.del(&heartbeat_key(node_id)).await?;
        self.store.del(&status_key(node_id)).await?;
        info!(node_id, "Node deregistered");
        Ok(())
    }
}

/// Periodic heartbeat for one node, independent of queue activity
pub struct HeartbeatService {
    registry: NodeRegistry,
    descriptor: NodeDescriptor,
    probe: Arc<dyn SystemProbe>,
    activity: Arc<NodeActivity>,
}

impl HeartbeatService {
    pub fn new(
        registry: NodeRegistry,
        descriptor: NodeDescriptor,
        probe: Arc<dyn SystemProbe>,
        activity: Arc<NodeActivity>,
    ) -> Self {
        Self {
            registry,
            descriptor,
            probe,
            activity,
        }
    }

    fn snapshot(&self) -> NodeStatusSnapshot {
        let (load_average, free_memory) = match self.probe.snapshot() {
            Ok(host) => (host.load_average, host.free_memory),
            Err(e) => {
                debug!("Host snapshot unavailable for heartbeat: {}", e);
                (self.descriptor.load_average, self.descriptor.free_memory)
            }
        };
        NodeStatusSnapshot {
            load_average,
            free_memory,
            running_tests: self.activity.running(),
            completed_tests: self.activity.completed(),
            last_heartbeat: Utc::now(),
        }
    }

    /// One heartbeat tick; re-registers when the descriptor has vanished
    pub async fn beat(&self) -> SwarmResult<()> {
        let node_id = &self.descriptor.node_id;
        if !self.registry.is_registered(node_id).await? {
            warn!(node_id = %node_id, "Descriptor missing from registry, re-registering");
            self.registry.register(&self.descriptor).await?;
        }
        self.registry.heartbeat(node_id, &self.snapshot()).await
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = interval(self.registry.config().heartbeat_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(node_id = %self.descriptor.node_id, "Heartbeat loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.beat().await {
                        error!(node_id = %self.descriptor.node_id, "Heartbeat failed: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!(node_id = %self.descriptor.node_id, "Heartbeat loop shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_counters() {
        let activity = NodeActivity::new();
        activity.unit_started();
        activity.unit_started();
        activity.unit_finished();
        assert_eq!(activity.running(), 1);
        assert_eq!(activity.completed(), 1);

        activity.unit_finished();
        activity.unit_finished();
        assert_eq!(activity.running(), 0);
        assert_eq!(activity.completed(), 3);
    }
}
