use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::json;
use swarm_core::config::MonitoringConfig;
use swarm_core::{
    decode_json, merge_coverage, now_millis, Coverage, CoordinationStore, GroupReport, MetricSample,
    NodeDescriptor, NodeStatusSnapshot, SwarmResult, TestStatus,
};
use swarm_dispatcher::NodeRegistry;
use swarm_infrastructure::keys::{heartbeat_key, metrics_key, status_key, task_queue_key, RESULTS_KEY};
use swarm_infrastructure::SystemProbe;
use tokio::sync::{broadcast, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::alerting::{AlertManager, AlertSummary};

/// Totals derived from the reports still sitting on the results list
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestStatistics {
    pub total_tests: u64,
    pub passed_tests: u64,
    pub failed_tests: u64,
    pub success_rate: f64,
    pub average_test_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage_percentage: Option<f64>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn test_statistics(reports: &[GroupReport]) -> TestStatistics {
    let mut stats = TestStatistics::default();
    let mut total_duration = 0u64;
    let mut coverage = Coverage::new();

    for result in reports.iter().flat_map(|r| r.results.iter()) {
        stats.total_tests += 1;
        total_duration += result.duration;
        match result.status {
            TestStatus::Passed => stats.passed_tests += 1,
            TestStatus::Failed => stats.failed_tests += 1,
            _ => {}
        }
        if let Some(unit_coverage) = &result.coverage {
            merge_coverage(&mut coverage, unit_coverage);
        }
    }

    if stats.total_tests > 0 {
        stats.success_rate = round2(stats.passed_tests as f64 / stats.total_tests as f64 * 100.0);
        stats.average_test_time = round2(total_duration as f64 / stats.total_tests as f64);
    }

    let (covered, total) = coverage
        .values()
        .fold((0u64, 0u64), |(c, t), file| (c + file.lines.covered, t + file.lines.total));
    if total > 0 {
        stats.coverage_percentage = Some(round2(covered as f64 / total as f64 * 100.0));
    }
    stats
}

/// Series identity: metric name plus the node the value describes
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SeriesKey {
    name: String,
    node_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringData {
    pub node_id: String,
    pub service_id: String,
    pub uptime: u64,
    pub timestamp: i64,
    pub status: String,
    pub metrics: BTreeMap<String, MetricSample>,
    /// Per-node gauges keyed by node id, then metric name
    pub nodes: BTreeMap<String, BTreeMap<String, f64>>,
    pub alerts: Vec<swarm_core::Alert>,
    pub summary: MonitoringSummary,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringSummary {
    pub total_metrics: usize,
    #[serde(flatten)]
    pub alerts: AlertSummary,
}

/// Periodic sampling of system, test, node and application metrics.
///
/// Samples live in per-name, per-node series trimmed to the retention
/// window, are mirrored into `metrics` gauges and persisted per category to
/// `metrics:{category}:{node}`. Node gauges cover every registered node,
/// not just the collecting one.
pub struct MetricsCollector {
    node_id: String,
    service_id: String,
    store: Arc<dyn CoordinationStore>,
    registry: NodeRegistry,
    probe: Arc<dyn SystemProbe>,
    http: reqwest::Client,
    alerts: Arc<AlertManager>,
    config: MonitoringConfig,
    max_tasks: usize,
    series: RwLock<BTreeMap<SeriesKey, VecDeque<MetricSample>>>,
    started: Instant,
}

impl MetricsCollector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: impl Into<String>,
        service_id: impl Into<String>,
        store: Arc<dyn CoordinationStore>,
        registry: NodeRegistry,
        probe: Arc<dyn SystemProbe>,
        http: reqwest::Client,
        alerts: Arc<AlertManager>,
        config: MonitoringConfig,
        max_tasks: usize,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            service_id: service_id.into(),
            store,
            registry,
            probe,
            http,
            alerts,
            config,
            max_tasks: max_tasks.max(1),
            series: RwLock::new(BTreeMap::new()),
            started: Instant::now(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn alerts(&self) -> &Arc<AlertManager> {
        &self.alerts
    }

    /// Records a sample describing the collecting node
    pub async fn record(&self, name: &str, value: f64, timestamp: i64) {
        let node_id = self.node_id.clone();
        let service_id = self.service_id.clone();
        self.record_for(name, &node_id, &service_id, value, timestamp).await;
    }

    async fn record_for(&self, name: &str, node_id: &str, service_id: &str, value: f64, timestamp: i64) {
        let sample = MetricSample::new(name, value, timestamp)
            .with_tag("node_id", node_id)
            .with_tag("service_id", service_id);
        let cutoff = timestamp - self.config.retention().as_millis() as i64;
        let key = SeriesKey {
            name: name.to_string(),
            node_id: node_id.to_string(),
        };

        {
            let mut series = self.series.write().await;
            let samples = series.entry(key).or_default();
            samples.push_back(sample);
            while samples.front().is_some_and(|s| s.timestamp <= cutoff) {
                samples.pop_front();
            }
        }

        metrics::gauge!(name.replace('.', "_"), "node_id" => node_id.to_string()).set(value);
    }

    /// Drops per-node series of nodes that left the registry
    async fn forget_departed(&self, registered: &BTreeSet<&str>) {
        self.series.write().await.retain(|key, _| {
            !key.name.starts_with("node.")
                || key.node_id == self.node_id
                || registered.contains(key.node_id.as_str())
        });
    }

    async fn persist(&self, category: &str, payload: serde_json::Value) -> SwarmResult<()> {
        let key = metrics_key(category, &self.node_id);
        self.store.lpush(&key, &payload.to_string()).await?;
        self.store
            .ltrim(&key, 0, self.config.persisted_samples as isize)
            .await?;
        self.store
            .expire(&key, std::time::Duration::from_secs(self.config.persisted_ttl_seconds))
            .await?;
        Ok(())
    }

    pub async fn collect_system_metrics(&self) -> SwarmResult<()> {
        let timestamp = now_millis();
        let host = self.probe.snapshot()?;
        let cpu_usage = self.probe.cpu_usage()?;
        let memory_usage = host.memory_usage_percent();
        let disk_usage = self.probe.disk_usage(&self.config.disk_path).unwrap_or_else(|e| {
            warn!("Failed to read disk usage: {}", e);
            0.0
        });
        let load_average = host.load_average[0];

        self.record("system.cpu_usage", cpu_usage, timestamp).await;
        self.record("system.memory_usage", memory_usage, timestamp).await;
        self.record("system.disk_usage", disk_usage, timestamp).await;
        self.record("system.load_average", load_average, timestamp).await;
        self.record("system.uptime", host.uptime_seconds, timestamp).await;

        self.persist(
            "system",
            json!({
                "cpu_usage": cpu_usage,
                "memory_usage": memory_usage,
                "disk_usage": disk_usage,
                "load_average": load_average,
                "uptime": host.uptime_seconds,
                "timestamp": timestamp,
            }),
        )
        .await
    }

    pub async fn collect_test_metrics(&self) -> SwarmResult<()> {
        let timestamp = now_millis();
        let raw = self.store.lrange(RESULTS_KEY, 0, -1).await?;
        let reports: Vec<GroupReport> = raw
            .iter()
            .filter_map(|payload| match decode_json(payload) {
                Ok(report) => Some(report),
                Err(e) => {
                    debug!("Skipping malformed result payload: {}", e);
                    None
                }
            })
            .collect();
        let stats = test_statistics(&reports);

        self.record("test.total_tests", stats.total_tests as f64, timestamp).await;
        self.record("test.passed_tests", stats.passed_tests as f64, timestamp).await;
        self.record("test.failed_tests", stats.failed_tests as f64, timestamp).await;
        self.record("test.test_success_rate", stats.success_rate, timestamp).await;
        self.record("test.average_test_time", stats.average_test_time, timestamp).await;
        if let Some(coverage) = stats.coverage_percentage {
            self.record("test.coverage_percentage", coverage, timestamp).await;
        }

        let mut payload = serde_json::to_value(&stats)?;
        payload["timestamp"] = json!(timestamp);
        self.persist("test", payload).await
    }

    /// Queue depth, capacity and last heartbeat for every registered node,
    /// plus the count of nodes whose heartbeat is within the liveness window.
    pub async fn collect_node_metrics(&self) -> SwarmResult<()> {
        let timestamp = now_millis();
        let registered = self.registry.list_registered().await?;
        let active_nodes = self.registry.list_active().await?.len();

        let mut nodes = Vec::with_capacity(registered.len());
        for node in &registered {
            nodes.push(self.collect_one_node(node, timestamp).await?);
        }
        let ids: BTreeSet<&str> = registered.iter().map(|n| n.node_id.as_str()).collect();
        self.forget_departed(&ids).await;

        self.record("node.active_nodes", active_nodes as f64, timestamp).await;
        let queued: u64 = nodes
            .iter()
            .filter_map(|n| n["task_queue_length"].as_u64())
            .sum();

        self.persist(
            "node",
            json!({
                "active_nodes": active_nodes,
                "registered_nodes": registered.len(),
                "queued_groups": queued,
                "nodes": nodes,
                "timestamp": timestamp,
            }),
        )
        .await
    }

    async fn collect_one_node(
        &self,
        node: &NodeDescriptor,
        timestamp: i64,
    ) -> SwarmResult<serde_json::Value> {
        let queue_length = self.store.llen(&task_queue_key(&node.node_id)).await?;
        let last_heartbeat = self
            .store
            .get(&heartbeat_key(&node.node_id))
            .await?
            .and_then(|raw| raw.parse::<i64>().ok());
        let status = self.store.hgetall(&status_key(&node.node_id)).await?;
        let running = NodeStatusSnapshot::from_fields(&status).running_tests;
        let capacity = (running as f64 / self.max_tasks as f64 * 100.0).round();

        let (id, service) = (node.node_id.as_str(), node.service_id.as_str());
        self.record_for("node.task_queue_length", id, service, queue_length as f64, timestamp)
            .await;
        self.record_for("node.node_capacity", id, service, capacity, timestamp)
            .await;
        if let Some(heartbeat) = last_heartbeat {
            self.record_for("node.node_heartbeat", id, service, heartbeat as f64, timestamp)
                .await;
        }

        Ok(json!({
            "node_id": id,
            "task_queue_length": queue_length,
            "node_capacity": capacity,
            "last_heartbeat": last_heartbeat,
        }))
    }

    /// Probes the application health endpoint. Any transport error or a
    /// status of 400 and above counts as a 100% error rate.
    pub async fn collect_application_metrics(&self) -> SwarmResult<()> {
        let timestamp = now_millis();
        let started = Instant::now();
        let probe = self
            .http
            .get(&self.config.probe_url)
            .timeout(self.config.probe_timeout())
            .send()
            .await;
        let response_time = started.elapsed().as_millis() as f64;

        let (status, error_rate) = match probe {
            Ok(response) => {
                let status = response.status().as_u16();
                (status, if status >= 400 { 100.0 } else { 0.0 })
            }
            Err(e) => {
                debug!(url = %self.config.probe_url, "Application probe failed: {}", e);
                (0, 100.0)
            }
        };

        self.record("application.response_time", response_time, timestamp).await;
        self.record("application.error_rate", error_rate, timestamp).await;

        self.persist(
            "application",
            json!({
                "responseTime": response_time,
                "errorRate": error_rate,
                "status": status,
                "healthy": error_rate == 0.0,
                "timestamp": timestamp,
            }),
        )
        .await
    }

    /// One collection pass. A failing category keeps its previous values and
    /// does not stop the others. Alerts only see values sampled in this pass.
    pub async fn collect_all(&self) {
        let pass_started = now_millis();
        let categories = [
            ("system", self.collect_system_metrics().await),
            ("test", self.collect_test_metrics().await),
            ("node", self.collect_node_metrics().await),
            ("application", self.collect_application_metrics().await),
        ];
        for (category, outcome) in categories {
            if let Err(e) = outcome {
                metrics::counter!("swarm_metrics_collection_errors_total", "category" => category)
                    .increment(1);
                warn!(category = category, "Metrics collection failed: {}", e);
            }
        }

        let fresh = self.latest_since(pass_started).await;
        let fired = self.alerts.evaluate(&fresh).await;
        if !fired.is_empty() {
            debug!(alerts = fired.len(), "Threshold alerts raised");
        }
    }

    /// Latest value of every series describing the collecting node
    pub async fn latest(&self) -> BTreeMap<String, f64> {
        self.latest_since(i64::MIN).await
    }

    async fn latest_since(&self, since: i64) -> BTreeMap<String, f64> {
        self.latest_samples()
            .await
            .into_iter()
            .filter(|(_, sample)| sample.timestamp >= since)
            .map(|(name, sample)| (name, sample.value))
            .collect()
    }

    pub async fn latest_samples(&self) -> BTreeMap<String, MetricSample> {
        self.series
            .read()
            .await
            .iter()
            .filter(|(key, _)| key.node_id == self.node_id)
            .filter_map(|(key, samples)| samples.back().map(|s| (key.name.clone(), s.clone())))
            .collect()
    }

    /// Latest sample of every series for every node, ordered by name then node
    pub async fn all_latest_samples(&self) -> Vec<MetricSample> {
        self.series
            .read()
            .await
            .values()
            .filter_map(|samples| samples.back().cloned())
            .collect()
    }

    /// Latest `node.*` gauges keyed by node id, then metric name
    pub async fn node_latest(&self) -> BTreeMap<String, BTreeMap<String, f64>> {
        let mut nodes: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
        for (key, samples) in self.series.read().await.iter() {
            if !key.name.starts_with("node.") {
                continue;
            }
            if let Some(sample) = samples.back() {
                nodes
                    .entry(key.node_id.clone())
                    .or_default()
                    .insert(key.name.clone(), sample.value);
            }
        }
        nodes
    }

    pub async fn series(&self, name: &str) -> Vec<MetricSample> {
        let key = SeriesKey {
            name: name.to_string(),
            node_id: self.node_id.clone(),
        };
        self.series
            .read()
            .await
            .get(&key)
            .map(|samples| samples.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn monitoring_data(&self) -> MonitoringData {
        let metrics = self.latest_samples().await;
        MonitoringData {
            node_id: self.node_id.clone(),
            service_id: self.service_id.clone(),
            uptime: self.started.elapsed().as_millis() as u64,
            timestamp: now_millis(),
            status: "running".to_string(),
            summary: MonitoringSummary {
                total_metrics: metrics.len(),
                alerts: self.alerts.summary().await,
            },
            metrics,
            nodes: self.node_latest().await,
            alerts: self.alerts.recent(50).await,
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = interval(self.config.collection_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            node_id = %self.node_id,
            interval_secs = self.config.collection_interval_seconds,
            "Metrics collection started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => self.collect_all().await,
                _ = shutdown_rx.recv() => {
                    info!(node_id = %self.node_id, "Metrics collection shutting down");
                    break;
                }
            }
        }
    }
}
