use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use swarm_core::config::PartitionConfig;
use swarm_core::{push_json, CoordinationStore, NodeDescriptor, SwarmError, SwarmResult, TaskGroup, TestUnit};
use swarm_infrastructure::keys::task_queue_key;
use tracing::{info, warn};

use crate::partitioner::{group_priority, partitioner_for, Partitioner};
use crate::registry::NodeRegistry;

/// Outcome of one distribution round
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionSummary {
    pub strategy: String,
    pub total_units: usize,
    pub workers: usize,
    pub groups: Vec<TaskGroup>,
}

/// Binds partitioned groups to workers: group `i` goes to worker `i % n`
pub fn plan_assignments(
    groups: Vec<Vec<TestUnit>>,
    workers: &[NodeDescriptor],
    now: DateTime<Utc>,
) -> SwarmResult<Vec<TaskGroup>> {
    if workers.is_empty() {
        return Err(SwarmError::NoWorkersAvailable);
    }
    let millis = now.timestamp_millis();

    Ok(groups
        .into_iter()
        .enumerate()
        .map(|(index, tests)| {
            let worker = &workers[index % workers.len()];
            TaskGroup {
                id: format!("task-{millis}-{index}"),
                node_id: worker.node_id.clone(),
                priority: group_priority(&tests),
                estimated_duration: tests.iter().map(|t| t.estimated_duration).sum(),
                tests,
                assigned_at: now,
            }
        })
        .collect())
}

/// Manager-side distribution of a test set across live workers
pub struct TaskDispatcher {
    store: Arc<dyn CoordinationStore>,
    registry: NodeRegistry,
    partitioner: Box<dyn Partitioner>,
}

impl TaskDispatcher {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        registry: NodeRegistry,
        config: &PartitionConfig,
    ) -> Self {
        Self {
            store,
            registry,
            partitioner: partitioner_for(config.strategy, config.group_size),
        }
    }

    pub fn with_partitioner(mut self, partitioner: Box<dyn Partitioner>) -> Self {
        self.partitioner = partitioner;
        self
    }

    /// Binds `units` to the currently active workers without pushing
    /// anything. Fails with `NoWorkersAvailable` when no worker is alive.
    pub async fn plan(&self, units: &[TestUnit]) -> SwarmResult<DistributionSummary> {
        let workers = self.registry.list_active_workers().await?;
        if workers.is_empty() {
            warn!("No active workers, skipping distribution");
            return Err(SwarmError::NoWorkersAvailable);
        }

        let partitions = self.partitioner.partition(units, workers.len())?;
        let groups = plan_assignments(partitions, &workers, Utc::now())?;
        Ok(DistributionSummary {
            strategy: self.partitioner.name().to_string(),
            total_units: units.len(),
            workers: workers.len(),
            groups,
        })
    }

    /// Pushes `plan.groups[*delivered..]` in order, advancing `delivered`
    /// after each successful push. After an error, calling again with the
    /// same plan and counter resumes with the first undelivered group, so no
    /// group is queued twice.
    pub async fn dispatch(&self, plan: &DistributionSummary, delivered: &mut usize) -> SwarmResult<()> {
        for group in plan.groups.iter().skip(*delivered) {
            push_json(self.store.as_ref(), &task_queue_key(&group.node_id), group).await?;
            *delivered += 1;
            info!(
                task_id = %group.id,
                node_id = %group.node_id,
                tests = group.len(),
                priority = group.priority,
                estimated_ms = group.estimated_duration,
                "Task group assigned"
            );
        }

        info!(
            strategy = %plan.strategy,
            units = plan.total_units,
            workers = plan.workers,
            groups = plan.groups.len(),
            "Test distribution completed"
        );
        Ok(())
    }

    /// Plans and dispatches in one go. Nothing is pushed unless workers exist
    /// and partitioning succeeded.
    pub async fn distribute(&self, units: &[TestUnit]) -> SwarmResult<DistributionSummary> {
        let plan = self.plan(units).await?;
        self.dispatch(&plan, &mut 0).await?;
        Ok(plan)
    }
}
