use std::fmt;

use chrono::{DateTime, Utc};
use rand::distr::{Alphanumeric, SampleString};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
    Emergency,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
            AlertSeverity::Emergency => "emergency",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub severity: AlertSeverity,
    pub message: String,
    pub metadata: serde_json::Value,
    pub node_id: String,
    pub service_id: String,
    pub timestamp: DateTime<Utc>,
    pub resolved: bool,
}

impl Alert {
    pub fn new(
        severity: AlertSeverity,
        message: impl Into<String>,
        metadata: serde_json::Value,
        node_id: &str,
        service_id: &str,
    ) -> Self {
        let timestamp = Utc::now();
        let suffix = Alphanumeric
            .sample_string(&mut rand::rng(), 9)
            .to_lowercase();
        Self {
            id: format!("{}-{}-{}", severity, timestamp.timestamp_millis(), suffix),
            severity,
            message: message.into(),
            metadata,
            node_id: node_id.to_string(),
            service_id: service_id.to_string(),
            timestamp,
            resolved: false,
        }
    }

    pub fn dedup_key(&self) -> String {
        dedup_key(self.severity, &self.message)
    }
}

/// Cooldown key shared by every alert with the same severity and message
pub fn dedup_key(severity: AlertSeverity, message: &str) -> String {
    format!("{severity}-{message}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_alert_id_format() {
        let alert = Alert::new(
            AlertSeverity::Warning,
            "CPU usage threshold exceeded",
            json!({"value": 92.0}),
            "node-1",
            "svc-1",
        );

        let parts: Vec<&str> = alert.id.splitn(3, '-').collect();
        assert_eq!(parts[0], "warning");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
        assert!(!alert.resolved);
        assert_eq!(alert.dedup_key(), "warning-CPU usage threshold exceeded");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(AlertSeverity::Emergency > AlertSeverity::Critical);
        assert!(AlertSeverity::Warning > AlertSeverity::Info);
    }
}
