use std::path::PathBuf;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use swarm_core::config::WorkerConfig;
use swarm_core::{Coverage, SwarmError, SwarmResult, TestUnit};
use tokio::process::Command;
use tracing::{debug, warn};

static COVERAGE_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""coverage":\s*\{"#).expect("valid coverage regex"));
static COVERAGE_LAZY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)"coverage":\s*(\{.*?\})"#).expect("valid coverage regex"));

/// What one external test command produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub coverage: Option<Coverage>,
    pub exit_code: Option<i32>,
}

/// Executes a single test unit
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run(&self, unit: &TestUnit) -> SwarmResult<ExecutionOutcome>;
}

/// Program, arguments and extra environment for one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

pub fn build_command(unit: &TestUnit) -> CommandSpec {
    if unit.uses_playwright() {
        CommandSpec {
            program: "npx".to_string(),
            args: vec![
                "playwright".to_string(),
                "test".to_string(),
                unit.path.clone(),
                "--reporter=json".to_string(),
            ],
            env: vec![
                (
                    "PLAYWRIGHT_BROWSERS_PATH".to_string(),
                    "/opt/playwright/browsers".to_string(),
                ),
                ("PLAYWRIGHT_SKIP_BROWSER_DOWNLOAD".to_string(), "1".to_string()),
            ],
        }
    } else {
        CommandSpec {
            program: "npx".to_string(),
            args: vec![
                "jest".to_string(),
                unit.path.clone(),
                "--json".to_string(),
                "--coverage".to_string(),
            ],
            env: Vec::new(),
        }
    }
}

/// Pulls the `"coverage": {...}` object out of runner output.
///
/// The object is parsed as a JSON stream from its opening brace so nested
/// objects survive; the lazy pattern is only a fallback for flat objects.
/// Anything unparsable yields `None`.
pub fn extract_coverage(output: &str) -> Option<Coverage> {
    let found = COVERAGE_START.find(output)?;
    let from_brace = &output[found.end() - 1..];

    let mut stream = serde_json::Deserializer::from_str(from_brace).into_iter::<Coverage>();
    if let Some(Ok(coverage)) = stream.next() {
        return Some(coverage);
    }

    let captured = COVERAGE_LAZY.captures(output)?.get(1)?;
    match serde_json::from_str::<Coverage>(captured.as_str()) {
        Ok(coverage) => Some(coverage),
        Err(e) => {
            debug!("Coverage block present but unparsable: {}", e);
            None
        }
    }
}

/// Runs units as child processes (`npx jest` / `npx playwright`)
pub struct CommandTestRunner {
    working_dir: PathBuf,
    timeout: Duration,
}

impl CommandTestRunner {
    pub fn new(working_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            working_dir: working_dir.into(),
            timeout,
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.working_dir.clone(), config.unit_timeout())
    }

    /// Spawns `spec` and waits for it under the hard timeout. The child is
    /// killed when the wait is abandoned.
    pub async fn execute(&self, spec: &CommandSpec, path: &str) -> SwarmResult<ExecutionOutcome> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let child = cmd.spawn().map_err(|e| {
            SwarmError::TestExecution(format!("failed to spawn {} for {}: {}", spec.program, path, e))
        })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(path = %path, timeout_secs = self.timeout.as_secs(), "Test unit timed out, killed");
                return Err(SwarmError::UnitExecutionTimeout {
                    path: path.to_string(),
                    timeout_secs: self.timeout.as_secs(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let success = output.status.success();

        Ok(ExecutionOutcome {
            success,
            coverage: extract_coverage(&stdout),
            error: if success || stderr.trim().is_empty() {
                None
            } else {
                Some(stderr)
            },
            output: stdout,
            exit_code: output.status.code(),
        })
    }
}

#[async_trait]
impl TestRunner for CommandTestRunner {
    async fn run(&self, unit: &TestUnit) -> SwarmResult<ExecutionOutcome> {
        let spec = build_command(unit);
        debug!(path = %unit.path, program = %spec.program, args = ?spec.args, "Running test unit");
        self.execute(&spec, &unit.path).await
    }
}
