use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `status` a descriptor carries from the moment it is registered
pub const REGISTERED_STATUS: &str = "ready";

/// Liveness boundary shared by the registry and status derivation: a
/// heartbeat exactly `window` old still counts as alive.
pub fn is_live(heartbeat_age: Duration, window: Duration) -> bool {
    heartbeat_age <= window
}

/// Node descriptor stored in the `swarm:nodes` registry hash
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeDescriptor {
    pub node_id: String,
    pub service_id: String,
    pub task_id: String,
    pub is_manager: bool,
    pub hostname: String,
    pub platform: String,
    pub cpus: usize,
    pub total_memory: u64,
    pub free_memory: u64,
    pub load_average: [f64; 3],
    pub registered_at: DateTime<Utc>,
    pub status: String,
}

impl NodeDescriptor {
    pub fn role(&self) -> NodeRole {
        if self.is_manager {
            NodeRole::Manager
        } else {
            NodeRole::Worker
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Manager,
    Worker,
}

/// Logical lifecycle derived from the registry and heartbeat keys.
///
/// ```text
/// Registering → Active → (heartbeat lapse) → Suspected → (TTL expiry) → Removed
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Registering,
    Active,
    Suspected,
    Removed,
}

impl NodeStatus {
    /// `heartbeat_age` is `None` when the heartbeat key is absent.
    /// A descriptor that was never heartbeated is still registering; one
    /// whose heartbeat key expired has been removed from the fleet.
    pub fn derive(
        has_descriptor: bool,
        ever_heartbeated: bool,
        heartbeat_age: Option<Duration>,
        liveness_window: Duration,
    ) -> Self {
        if !has_descriptor {
            return NodeStatus::Removed;
        }
        match heartbeat_age {
            Some(age) if is_live(age, liveness_window) => NodeStatus::Active,
            Some(_) => NodeStatus::Suspected,
            None if ever_heartbeated => NodeStatus::Removed,
            None => NodeStatus::Registering,
        }
    }
}

/// Per-node status hash written next to every heartbeat (`swarm:status:{id}`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatusSnapshot {
    pub load_average: [f64; 3],
    pub free_memory: u64,
    pub running_tests: usize,
    pub completed_tests: usize,
    pub last_heartbeat: DateTime<Utc>,
}

impl NodeStatusSnapshot {
    pub fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            (
                "loadAverage".to_string(),
                format!(
                    "{},{},{}",
                    self.load_average[0], self.load_average[1], self.load_average[2]
                ),
            ),
            ("freeMemory".to_string(), self.free_memory.to_string()),
            ("runningTests".to_string(), self.running_tests.to_string()),
            ("completedTests".to_string(), self.completed_tests.to_string()),
            ("lastHeartbeat".to_string(), self.last_heartbeat.to_rfc3339()),
        ]
    }

    /// Lenient parse; missing or malformed fields fall back to zero values.
    pub fn from_fields(fields: &HashMap<String, String>) -> Self {
        let parse_usize = |name: &str| {
            fields
                .get(name)
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(0)
        };

        let mut load_average = [0.0; 3];
        if let Some(raw) = fields.get("loadAverage") {
            for (slot, part) in load_average.iter_mut().zip(raw.split(',')) {
                *slot = part.trim().parse().unwrap_or(0.0);
            }
        }

        Self {
            load_average,
            free_memory: fields
                .get("freeMemory")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            running_tests: parse_usize("runningTests"),
            completed_tests: parse_usize("completedTests"),
            last_heartbeat: fields
                .get("lastHeartbeat")
                .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(Utc::now),
        }
    }
}
