use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use swarm_core::config::{AlertSinkKind, AlertThresholds, MonitoringConfig};
use swarm_core::{push_json, Alert, AlertSeverity, CoordinationStore, SwarmError, SwarmResult};
use swarm_infrastructure::keys::ALERTS_KEY;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Retained alert history, both in memory and in the store list
const ALERT_HISTORY: usize = 1000;

/// Delivery channel for triggered alerts
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, alert: &Alert) -> SwarmResult<()>;
}

/// Writes alerts to the tracing log at a level matching their severity
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, alert: &Alert) -> SwarmResult<()> {
        match alert.severity {
            AlertSeverity::Info => {
                info!(alert_id = %alert.id, metadata = %alert.metadata, "ALERT: {}", alert.message)
            }
            AlertSeverity::Warning => {
                warn!(alert_id = %alert.id, metadata = %alert.metadata, "ALERT: {}", alert.message)
            }
            AlertSeverity::Critical | AlertSeverity::Emergency => {
                error!(alert_id = %alert.id, severity = %alert.severity, metadata = %alert.metadata, "ALERT: {}", alert.message)
            }
        }
        Ok(())
    }
}

/// Pushes alerts onto the shared `swarm:alerts` list
pub struct StoreSink {
    store: Arc<dyn CoordinationStore>,
}

impl StoreSink {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AlertSink for StoreSink {
    fn name(&self) -> &'static str {
        "store"
    }

    async fn deliver(&self, alert: &Alert) -> SwarmResult<()> {
        push_json(self.store.as_ref(), ALERTS_KEY, alert).await?;
        self.store.ltrim(ALERTS_KEY, 0, ALERT_HISTORY as isize).await
    }
}

/// POSTs the alert as JSON to an external endpoint
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, alert: &Alert) -> SwarmResult<()> {
        let response = self
            .client
            .post(&self.url)
            .json(alert)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SwarmError::AlertSinkFailure {
                sink: self.name().to_string(),
                message: e.to_string(),
            })?;
        debug!(alert_id = %alert.id, status = %response.status(), "Webhook alert sent");
        Ok(())
    }
}

/// Builds the configured sinks. The webhook sink is skipped without a URL.
pub fn sinks_from_config(
    config: &MonitoringConfig,
    store: Arc<dyn CoordinationStore>,
    client: reqwest::Client,
) -> Vec<Arc<dyn AlertSink>> {
    let mut sinks: Vec<Arc<dyn AlertSink>> = Vec::new();
    for kind in &config.sinks {
        match kind {
            AlertSinkKind::Log => sinks.push(Arc::new(LogSink)),
            AlertSinkKind::Store => sinks.push(Arc::new(StoreSink::new(store.clone()))),
            AlertSinkKind::Webhook => match &config.webhook_url {
                Some(url) if !url.is_empty() => {
                    sinks.push(Arc::new(WebhookSink::new(client.clone(), url.clone())))
                }
                _ => debug!("Webhook sink configured without ALERT_WEBHOOK_URL, skipping"),
            },
        }
    }
    sinks
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AlertSummary {
    pub total_alerts: usize,
    pub active_alerts: usize,
}

/// Threshold evaluation, cooldown-based deduplication and fan-out to sinks
pub struct AlertManager {
    node_id: String,
    service_id: String,
    thresholds: AlertThresholds,
    cooldown: Duration,
    sinks: Vec<Arc<dyn AlertSink>>,
    cooldowns: RwLock<HashMap<String, Instant>>,
    history: RwLock<VecDeque<Alert>>,
}

impl AlertManager {
    pub fn new(
        node_id: impl Into<String>,
        service_id: impl Into<String>,
        thresholds: AlertThresholds,
        cooldown: Duration,
        sinks: Vec<Arc<dyn AlertSink>>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            service_id: service_id.into(),
            thresholds,
            cooldown,
            sinks,
            cooldowns: RwLock::new(HashMap::new()),
            history: RwLock::new(VecDeque::new()),
        }
    }

    pub fn thresholds(&self) -> &AlertThresholds {
        &self.thresholds
    }

    /// Dedup keys still inside their cooldown as of the last trigger
    pub async fn cooling_down(&self) -> usize {
        self.cooldowns.read().await.len()
    }

    /// Emits an alert unless one with the same severity and message fired
    /// within the cooldown. Returns the emitted alert. Expired cooldown
    /// entries are dropped on every call.
    pub async fn trigger(
        &self,
        severity: AlertSeverity,
        message: &str,
        metadata: serde_json::Value,
    ) -> Option<Alert> {
        let key = swarm_core::dedup_key(severity, message);
        {
            let mut cooldowns = self.cooldowns.write().await;
            let now = Instant::now();
            cooldowns.retain(|_, last| now.duration_since(*last) < self.cooldown);
            if cooldowns.contains_key(&key) {
                debug!(dedup_key = %key, "Alert suppressed by cooldown");
                return None;
            }
            cooldowns.insert(key, now);
        }

        let alert = Alert::new(severity, message, metadata, &self.node_id, &self.service_id);
        {
            let mut history = self.history.write().await;
            history.push_back(alert.clone());
            while history.len() > ALERT_HISTORY {
                history.pop_front();
            }
        }
        metrics::counter!("swarm_alerts_triggered_total", "severity" => severity.as_str()).increment(1);

        for sink in &self.sinks {
            if let Err(e) = sink.deliver(&alert).await {
                let failure = match e {
                    failure @ SwarmError::AlertSinkFailure { .. } => failure,
                    other => SwarmError::AlertSinkFailure {
                        sink: sink.name().to_string(),
                        message: other.to_string(),
                    },
                };
                error!(alert_id = %alert.id, "{}", failure);
            }
        }

        if severity == AlertSeverity::Emergency {
            error!(alert_id = %alert.id, node_id = %self.node_id, "Emergency alert triggered: {}", alert.message);
        }

        Some(alert)
    }

    /// Checks the latest metric values against the thresholds. A breach is
    /// strictly greater than its threshold. The failure rate is only
    /// considered once tests have been recorded.
    pub async fn evaluate(&self, latest: &BTreeMap<String, f64>) -> Vec<Alert> {
        let mut checks = Vec::new();
        let value = |name: &str| latest.get(name).copied();

        if let Some(cpu) = value("system.cpu_usage") {
            checks.push(("CPU usage", cpu, self.thresholds.cpu_usage));
        }
        if let Some(memory) = value("system.memory_usage") {
            checks.push(("Memory usage", memory, self.thresholds.memory_usage));
        }
        if let (Some(total), Some(success_rate)) =
            (value("test.total_tests"), value("test.test_success_rate"))
        {
            if total > 0.0 {
                checks.push((
                    "Test failure rate",
                    100.0 - success_rate,
                    self.thresholds.test_failure_rate,
                ));
            }
        }
        if let Some(response_time) = value("application.response_time") {
            checks.push(("Response time", response_time, self.thresholds.response_time));
        }
        if let Some(error_rate) = value("application.error_rate") {
            checks.push(("Error rate", error_rate, self.thresholds.error_rate));
        }

        let mut fired = Vec::new();
        for (metric, value, threshold) in checks {
            if value > threshold {
                let message = format!("{metric} threshold exceeded");
                let metadata = json!({ "metric": metric, "value": value, "threshold": threshold });
                if let Some(alert) = self.trigger(AlertSeverity::Warning, &message, metadata).await {
                    fired.push(alert);
                }
            }
        }
        fired
    }

    /// Newest last
    pub async fn recent(&self, limit: usize) -> Vec<Alert> {
        let history = self.history.read().await;
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    pub async fn summary(&self) -> AlertSummary {
        let history = self.history.read().await;
        AlertSummary {
            total_alerts: history.len(),
            active_alerts: history.iter().filter(|a| !a.resolved).count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use swarm_infrastructure::InMemoryStore;

    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn deliver(&self, alert: &Alert) -> SwarmResult<()> {
            self.seen.lock().unwrap().push(alert.message.clone());
            Ok(())
        }
    }

    struct BrokenSink;

    #[async_trait]
    impl AlertSink for BrokenSink {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn deliver(&self, _alert: &Alert) -> SwarmResult<()> {
            Err(SwarmError::StoreUnavailable("offline".into()))
        }
    }

    fn manager(sinks: Vec<Arc<dyn AlertSink>>) -> AlertManager {
        AlertManager::new(
            "node-1",
            "svc-1",
            AlertThresholds::default(),
            Duration::from_secs(300),
            sinks,
        )
    }

    fn metrics(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_cpu_breaches_inside_cooldown_alert_once() {
        let sink = Arc::new(RecordingSink::default());
        let alerts = manager(vec![sink.clone()]);

        let first = alerts.evaluate(&metrics(&[("system.cpu_usage", 92.0)])).await;
        tokio::time::advance(Duration::from_secs(5)).await;
        let second = alerts.evaluate(&metrics(&[("system.cpu_usage", 95.0)])).await;

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(first[0].severity, AlertSeverity::Warning);
        assert_eq!(first[0].message, "CPU usage threshold exceeded");
        assert_eq!(first[0].metadata["value"], 92.0);
        assert_eq!(first[0].metadata["threshold"], 80.0);
        assert_eq!(sink.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_alert_fires_again_after_cooldown() {
        let alerts = manager(Vec::new());
        assert!(alerts
            .trigger(AlertSeverity::Critical, "Node w1 is unhealthy", json!({}))
            .await
            .is_some());

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(alerts
            .trigger(AlertSeverity::Critical, "Node w1 is unhealthy", json!({}))
            .await
            .is_none());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(alerts
            .trigger(AlertSeverity::Critical, "Node w1 is unhealthy", json!({}))
            .await
            .is_some());

        // a different severity is a different dedup key
        assert!(alerts
            .trigger(AlertSeverity::Warning, "Node w1 is unhealthy", json!({}))
            .await
            .is_some());
        assert_eq!(alerts.summary().await.total_alerts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_cooldowns_are_dropped() {
        let alerts = manager(Vec::new());
        for node in ["w1", "w2", "w3"] {
            alerts
                .trigger(AlertSeverity::Critical, &format!("Node {node} is unhealthy"), json!({}))
                .await;
        }
        assert_eq!(alerts.cooling_down().await, 3);

        tokio::time::advance(Duration::from_secs(301)).await;
        alerts
            .trigger(AlertSeverity::Warning, "CPU usage threshold exceeded", json!({}))
            .await;
        assert_eq!(alerts.cooling_down().await, 1);
    }

    #[tokio::test]
    async fn test_threshold_is_strictly_greater() {
        let alerts = manager(Vec::new());
        let fired = alerts
            .evaluate(&metrics(&[
                ("system.cpu_usage", 80.0),
                ("system.memory_usage", 85.5),
                ("application.response_time", 5000.0),
                ("application.error_rate", 100.0),
            ]))
            .await;

        let messages: Vec<&str> = fired.iter().map(|a| a.message.as_str()).collect();
        assert_eq!(
            messages,
            vec!["Memory usage threshold exceeded", "Error rate threshold exceeded"]
        );
    }

    #[tokio::test]
    async fn test_failure_rate_requires_recorded_tests() {
        let alerts = manager(Vec::new());
        let none = alerts
            .evaluate(&metrics(&[("test.total_tests", 0.0), ("test.test_success_rate", 0.0)]))
            .await;
        assert!(none.is_empty());

        let fired = alerts
            .evaluate(&metrics(&[("test.total_tests", 10.0), ("test.test_success_rate", 70.0)]))
            .await;
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].message, "Test failure rate threshold exceeded");
        assert_eq!(fired[0].metadata["value"], 30.0);
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_block_others() {
        let sink = Arc::new(RecordingSink::default());
        let alerts = manager(vec![Arc::new(BrokenSink), sink.clone()]);

        let alert = alerts
            .trigger(AlertSeverity::Emergency, "Store lost", json!({}))
            .await;
        assert!(alert.is_some());
        assert_eq!(*sink.seen.lock().unwrap(), vec!["Store lost".to_string()]);
    }

    #[tokio::test]
    async fn test_store_sink_pushes_to_alert_list() {
        let store = Arc::new(InMemoryStore::new());
        let alerts = manager(vec![Arc::new(StoreSink::new(store.clone()))]);

        alerts
            .trigger(AlertSeverity::Warning, "High disk usage", json!({"diskUsage": 95.0}))
            .await
            .unwrap();

        let raw = store.lrange(ALERTS_KEY, 0, -1).await.unwrap();
        assert_eq!(raw.len(), 1);
        let stored: Alert = serde_json::from_str(&raw[0]).unwrap();
        assert_eq!(stored.message, "High disk usage");
        assert_eq!(stored.node_id, "node-1");
    }

    #[test]
    fn test_webhook_sink_skipped_without_url() {
        let store: Arc<dyn CoordinationStore> = Arc::new(InMemoryStore::new());
        let config = MonitoringConfig {
            webhook_url: None,
            ..Default::default()
        };
        let sinks = sinks_from_config(&config, store.clone(), reqwest::Client::new());
        let names: Vec<&str> = sinks.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["log", "store"]);

        let config = MonitoringConfig {
            webhook_url: Some("http://hooks.local/alert".to_string()),
            ..Default::default()
        };
        assert_eq!(sinks_from_config(&config, store, reqwest::Client::new()).len(), 3);
    }

    #[tokio::test]
    async fn test_recent_returns_newest_last() {
        let alerts = manager(Vec::new());
        for i in 0..5 {
            alerts
                .trigger(AlertSeverity::Info, &format!("event {i}"), json!({}))
                .await;
        }
        let recent: Vec<String> = alerts.recent(2).await.into_iter().map(|a| a.message).collect();
        assert_eq!(recent, vec!["event 3", "event 4"]);
    }
}
