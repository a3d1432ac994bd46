//! Coordination-store key layout shared by every node.

/// Hash: node id -> JSON `NodeDescriptor`
pub const NODES_KEY: &str = "swarm:nodes";
/// List of JSON `GroupReport`s
pub const RESULTS_KEY: &str = "swarm:results";
/// List of JSON `FailureReport`s
pub const FAILURES_KEY: &str = "swarm:failures";
/// List of JSON `Alert`s, newest first
pub const ALERTS_KEY: &str = "swarm:alerts";

/// String key holding the last heartbeat (epoch ms); expires with the TTL
pub fn heartbeat_key(node_id: &str) -> String {
    format!("swarm:heartbeat:{node_id}")
}

/// Hash with the node's periodic status snapshot
pub fn status_key(node_id: &str) -> String {
    format!("swarm:status:{node_id}")
}

/// Per-node FIFO of JSON `TaskGroup`s
pub fn task_queue_key(node_id: &str) -> String {
    format!("swarm:tasks:{node_id}")
}

pub fn metrics_key(category: &str, node_id: &str) -> String {
    format!("metrics:{category}:{node_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(heartbeat_key("w1"), "swarm:heartbeat:w1");
        assert_eq!(status_key("w1"), "swarm:status:w1");
        assert_eq!(task_queue_key("w1"), "swarm:tasks:w1");
        assert_eq!(metrics_key("system", "w1"), "metrics:system:w1");
    }
}
