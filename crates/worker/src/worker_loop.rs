use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use swarm_core::config::WorkerConfig;
use swarm_core::{
    decode_json, now_millis, push_json, CoordinationStore, FailureReport, GroupReport, NodeInfo,
    SwarmError, SwarmResult, TaskGroup, TestResult, TestStatus,
};
use swarm_dispatcher::{NodeActivity, NodeRegistry};
use swarm_infrastructure::keys::{task_queue_key, FAILURES_KEY, RESULTS_KEY};
use swarm_infrastructure::SystemProbe;
use tokio::sync::{broadcast, RwLock};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::runner::TestRunner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Executing,
    Reporting,
    Stopping,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Idle => "idle",
            WorkerState::Executing => "executing",
            WorkerState::Reporting => "reporting",
            WorkerState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Consumes this node's task queue and reports results.
///
/// ```text
/// Idle ──brpop──▶ Executing ──▶ Reporting ──▶ Idle
///   └──────────── shutdown ───────────────▶ Stopping
/// ```
pub struct WorkerLoop {
    node_id: String,
    store: Arc<dyn CoordinationStore>,
    registry: NodeRegistry,
    runner: Arc<dyn TestRunner>,
    probe: Arc<dyn SystemProbe>,
    activity: Arc<NodeActivity>,
    config: WorkerConfig,
    state: RwLock<WorkerState>,
}

impl WorkerLoop {
    pub fn new(
        node_id: impl Into<String>,
        store: Arc<dyn CoordinationStore>,
        registry: NodeRegistry,
        runner: Arc<dyn TestRunner>,
        probe: Arc<dyn SystemProbe>,
        activity: Arc<NodeActivity>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            store,
            registry,
            runner,
            probe,
            activity,
            config,
            state: RwLock::new(WorkerState::Idle),
        }
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    async fn set_state(&self, state: WorkerState) {
        *self.state.write().await = state;
    }

    /// Waits up to the poll timeout for the next group. Payloads that do not
    /// decode are reported on the failures channel and skipped.
    async fn next_group(&self) -> SwarmResult<Option<TaskGroup>> {
        let queue = task_queue_key(&self.node_id);
        let Some(raw) = self.store.brpop(&queue, self.config.poll_timeout()).await? else {
            return Ok(None);
        };

        match decode_json::<TaskGroup>(&raw) {
            Ok(group) => Ok(Some(group)),
            Err(e) => {
                let task_id = serde_json::from_str::<serde_json::Value>(&raw)
                    .ok()
                    .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(str::to_string))
                    .unwrap_or_else(|| "unknown".to_string());
                error!(node_id = %self.node_id, task_id = %task_id, "Malformed task group: {}", e);
                self.report_failure(&task_id, &e).await?;
                Ok(None)
            }
        }
    }

    async fn report_failure(&self, task_id: &str, err: &SwarmError) -> SwarmResult<()> {
        let failure = FailureReport::new(task_id, &self.node_id, err.to_string(), Some(format!("{err:?}")));
        push_json(self.store.as_ref(), FAILURES_KEY, &failure).await?;
        Ok(())
    }

    /// Runs every unit of `group` serially. Unit errors are recorded on the
    /// unit and never abort the group.
    pub async fn execute_group(&self, group: &TaskGroup) -> GroupReport {
        self.set_state(WorkerState::Executing).await;
        info!(
            node_id = %self.node_id,
            task_id = %group.id,
            tests = group.len(),
            "Executing task group"
        );

        let group_start = now_millis();
        let mut results = Vec::with_capacity(group.len());

        for unit in &group.tests {
            self.activity.unit_started();
            let start_time = now_millis();
            let outcome = self.runner.run(unit).await;
            let end_time = now_millis();
            self.activity.unit_finished();

            let duration = (end_time - start_time).max(0) as u64;
            let result = match outcome {
                Ok(outcome) => TestResult {
                    path: unit.path.clone(),
                    category: unit.category.clone(),
                    status: if outcome.success {
                        TestStatus::Passed
                    } else {
                        TestStatus::Failed
                    },
                    duration,
                    output: Some(outcome.output),
                    error: outcome.error,
                    coverage: outcome.coverage,
                    start_time,
                    end_time,
                },
                Err(e) => {
                    warn!(node_id = %self.node_id, path = %unit.path, "Test unit errored: {}", e);
                    TestResult {
                        path: unit.path.clone(),
                        category: unit.category.clone(),
                        status: TestStatus::Error,
                        duration,
                        output: None,
                        error: Some(e.to_string()),
                        coverage: None,
                        start_time,
                        end_time,
                    }
                }
            };
            debug!(path = %result.path, status = %result.status, duration_ms = result.duration, "Test unit finished");
            results.push(result);
        }

        let end_time = now_millis();
        GroupReport {
            task_id: group.id.clone(),
            node_id: self.node_id.clone(),
            results,
            total_duration: (end_time - group_start).max(0) as u64,
            start_time: group_start,
            end_time,
            reported_at: Some(Utc::now()),
            node_info: self.node_info(),
        }
    }

    fn node_info(&self) -> Option<NodeInfo> {
        match self.probe.snapshot() {
            Ok(host) => Some(NodeInfo {
                node_id: self.node_id.clone(),
                hostname: host.hostname,
                load_average: host.load_average,
                free_memory: host.free_memory,
            }),
            Err(e) => {
                debug!("Host snapshot unavailable for report: {}", e);
                None
            }
        }
    }

    /// Executes a group and publishes its report; a failed publish is
    /// reported on the failures channel instead.
    async fn handle_group(&self, group: TaskGroup) -> SwarmResult<()> {
        let report = self.execute_group(&group).await;

        self.set_state(WorkerState::Reporting).await;
        let outcome = push_json(self.store.as_ref(), RESULTS_KEY, &report).await;
        self.set_state(WorkerState::Idle).await;

        match outcome {
            Ok(_) => {
                info!(
                    node_id = %self.node_id,
                    task_id = %group.id,
                    passed = report.count(TestStatus::Passed),
                    failed = report.count(TestStatus::Failed),
                    errors = report.count(TestStatus::Error),
                    duration_ms = report.total_duration,
                    "Task group completed"
                );
                Ok(())
            }
            Err(e) => {
                let failure = SwarmError::GroupExecutionFailure {
                    task_id: group.id.clone(),
                    message: e.to_string(),
                };
                error!(node_id = %self.node_id, "{}", failure);
                self.report_failure(&group.id, &failure).await?;
                Err(failure)
            }
        }
    }

    /// One iteration: pop, execute and report. Returns the processed task id.
    pub async fn process_next_task(&self) -> SwarmResult<Option<String>> {
        match self.next_group().await? {
            Some(group) => {
                let task_id = group.id.clone();
                self.handle_group(group).await?;
                Ok(Some(task_id))
            }
            None => Ok(None),
        }
    }

    /// Main loop. On shutdown it stops dequeuing, lets the in-flight group
    /// drain for at most the grace period and then deregisters the node.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(node_id = %self.node_id, "Worker loop started");

        loop {
            let popped = tokio::select! {
                popped = self.next_group() => popped,
                _ = shutdown_rx.recv() => break,
            };

            let group = match popped {
                Ok(Some(group)) => group,
                Ok(None) => continue,
                Err(e) => {
                    error!(node_id = %self.node_id, "Task polling failed: {}", e);
                    tokio::select! {
                        _ = sleep(self.config.error_backoff()) => continue,
                        _ = shutdown_rx.recv() => break,
                    }
                }
            };

            let work = self.handle_group(group);
            tokio::pin!(work);
            tokio::select! {
                result = &mut work => {
                    if let Err(e) = result {
                        error!(node_id = %self.node_id, "Task group handling failed: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!(
                        node_id = %self.node_id,
                        grace_secs = self.config.shutdown_grace().as_secs(),
                        "Shutdown requested, draining in-flight group"
                    );
                    match timeout(self.config.shutdown_grace(), &mut work).await {
                        Ok(Err(e)) => error!(node_id = %self.node_id, "Task group handling failed: {}", e),
                        Ok(Ok(())) => {}
                        Err(_) => warn!(node_id = %self.node_id, "Grace period expired, abandoning in-flight group"),
                    }
                    break;
                }
            }
        }

        self.set_state(WorkerState::Stopping).await;
        if let Err(e) = self.registry.deregister(&self.node_id).await {
            error!(node_id = %self.node_id, "Deregistration failed: {}", e);
        }
        info!(node_id = %self.node_id, "Worker loop stopped");
    }
}
