use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::coverage::Coverage;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    Error,
    Skipped,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
            TestStatus::Error => "error",
            TestStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "passed" => Ok(TestStatus::Passed),
            "failed" => Ok(TestStatus::Failed),
            "error" => Ok(TestStatus::Error),
            "skipped" => Ok(TestStatus::Skipped),
            other => Err(format!("unknown test status: {other}")),
        }
    }
}

/// Outcome of one test unit, timestamps in epoch milliseconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub path: String,
    pub category: String,
    pub status: TestStatus,
    pub duration: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<Coverage>,
    pub start_time: i64,
    pub end_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub node_id: String,
    pub hostname: String,
    pub load_average: [f64; 3],
    pub free_memory: u64,
}

/// Aggregate record pushed to the results channel once a group completes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GroupReport {
    pub task_id: String,
    pub node_id: String,
    #[serde(default)]
    pub results: Vec<TestResult>,
    pub total_duration: u64,
    pub start_time: i64,
    pub end_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_info: Option<NodeInfo>,
}

impl GroupReport {
    pub fn count(&self, status: TestStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }
}

/// Record pushed to the failures channel when a whole group aborts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FailureReport {
    pub task_id: String,
    pub node_id: String,
    pub status: String,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    pub reported_at: DateTime<Utc>,
}

impl FailureReport {
    pub fn new(task_id: &str, node_id: &str, error: impl Into<String>, stack: Option<String>) -> Self {
        Self {
            task_id: task_id.to_string(),
            node_id: node_id.to_string(),
            status: "failed".to_string(),
            error: error.into(),
            stack,
            reported_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse() {
        assert_eq!("PASSED".parse::<TestStatus>().unwrap(), TestStatus::Passed);
        assert_eq!("error".parse::<TestStatus>().unwrap(), TestStatus::Error);
        assert!("flaky".parse::<TestStatus>().is_err());
    }

    #[test]
    fn test_group_report_accepts_minimal_json() {
        let json = r#"{
            "taskId": "task-1-0",
            "nodeId": "worker-1",
            "results": [
                {"path": "a.test.js", "category": "unit", "status": "passed",
                 "duration": 12, "startTime": 1, "endTime": 13}
            ],
            "totalDuration": 12,
            "startTime": 1,
            "endTime": 13
        }"#;

        let report: GroupReport = serde_json::from_str(json).unwrap();
        assert_eq!(report.count(TestStatus::Passed), 1);
        assert!(report.node_info.is_none());
    }

    #[test]
    fn test_failure_report_defaults() {
        let failure = FailureReport::new("task-1-0", "worker-1", "boom", None);
        assert_eq!(failure.status, "failed");

        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["taskId"], "task-1-0");
        assert!(json.get("stack").is_none());
    }
}
