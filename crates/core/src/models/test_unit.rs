use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single test file discovered for a distribution round
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TestUnit {
    pub path: String,
    pub category: String,
    /// Heuristic estimate in milliseconds
    pub estimated_duration: u64,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl TestUnit {
    pub fn new(path: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            category: category.into(),
            estimated_duration: 0,
            dependencies: Vec::new(),
        }
    }

    pub fn with_estimate(mut self, estimated_duration: u64) -> Self {
        self.estimated_duration = estimated_duration;
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    /// Browser tests run under playwright instead of jest
    pub fn uses_playwright(&self) -> bool {
        self.path.contains("e2e") || self.dependencies.iter().any(|d| d == "playwright")
    }
}

/// A set of test units assigned to one node for one round
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskGroup {
    pub id: String,
    pub node_id: String,
    pub tests: Vec<TestUnit>,
    pub priority: u32,
    pub estimated_duration: u64,
    pub assigned_at: DateTime<Utc>,
}

impl TaskGroup {
    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}
