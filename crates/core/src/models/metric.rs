use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One sampled value of a named series, timestamp in epoch milliseconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl MetricSample {
    pub fn new(name: impl Into<String>, value: f64, timestamp: i64) -> Self {
        Self {
            name: name.into(),
            value,
            timestamp,
            tags: BTreeMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Series are grouped by the prefix before the first `.`
    pub fn category(&self) -> &str {
        self.name.split('.').next().unwrap_or(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_prefix() {
        let sample = MetricSample::new("system.cpu_usage", 12.5, 0).with_tag("node_id", "n1");
        assert_eq!(sample.category(), "system");
        assert_eq!(sample.tags["node_id"], "n1");
        assert_eq!(MetricSample::new("uptime", 1.0, 0).category(), "uptime");
    }
}
