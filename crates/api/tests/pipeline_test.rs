use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use swarm_api::ResultAggregator;
use swarm_core::config::{AggregationConfig, PartitionConfig, RegistryConfig, WorkerConfig};
use swarm_core::{CoordinationStore, NodeDescriptor, SwarmResult, TestUnit};
use swarm_dispatcher::{NodeActivity, NodeRegistry, TaskDispatcher};
use swarm_infrastructure::keys::{task_queue_key, RESULTS_KEY};
use swarm_infrastructure::{HostSnapshot, InMemoryStore, SystemProbe};
use swarm_worker::{ExecutionOutcome, TestRunner, WorkerLoop};

struct StubRunner;

#[async_trait]
impl TestRunner for StubRunner {
    async fn run(&self, unit: &TestUnit) -> SwarmResult<ExecutionOutcome> {
        let success = !unit.path.contains("broken");
        Ok(ExecutionOutcome {
            success,
            output: String::new(),
            error: (!success).then(|| "assertion failed".to_string()),
            coverage: None,
            exit_code: Some(if success { 0 } else { 1 }),
        })
    }
}

struct StubProbe;

impl SystemProbe for StubProbe {
    fn snapshot(&self) -> SwarmResult<HostSnapshot> {
        Ok(HostSnapshot {
            hostname: "pipeline-host".to_string(),
            platform: "linux".to_string(),
            cpus: 1,
            total_memory: 1024,
            free_memory: 512,
            load_average: [0.0; 3],
            uptime_seconds: 1.0,
        })
    }

    fn cpu_usage(&self) -> SwarmResult<f64> {
        Ok(0.0)
    }

    fn disk_usage(&self, _path: &Path) -> SwarmResult<f64> {
        Ok(0.0)
    }
}

fn node(node_id: &str, is_manager: bool) -> NodeDescriptor {
    NodeDescriptor {
        node_id: node_id.to_string(),
        service_id: "svc".to_string(),
        task_id: "t".to_string(),
        is_manager,
        hostname: node_id.to_string(),
        platform: "linux".to_string(),
        cpus: 1,
        total_memory: 1024,
        free_memory: 512,
        load_average: [0.0; 3],
        registered_at: Utc::now(),
        status: "ready".to_string(),
    }
}

#[tokio::test]
async fn test_dispatched_units_reach_the_aggregator() {
    let store = Arc::new(InMemoryStore::new());
    let registry = NodeRegistry::new(store.clone(), RegistryConfig::default());
    registry.register(&node("manager", true)).await.unwrap();
    registry.register(&node("w1", false)).await.unwrap();

    let units = vec![
        TestUnit::new("/app/tests/unit/a.test.js", "unit").with_estimate(1000),
        TestUnit::new("/app/tests/unit/b.test.js", "unit").with_estimate(1000),
        TestUnit::new("/app/tests/integration/broken.test.js", "integration").with_estimate(1000),
    ];
    let dispatcher = TaskDispatcher::new(
        store.clone(),
        NodeRegistry::new(store.clone(), RegistryConfig::default()),
        &PartitionConfig::default(),
    );
    let summary = dispatcher.distribute(&units).await.unwrap();
    assert_eq!(summary.workers, 1);
    assert_eq!(
        store.llen(&task_queue_key("w1")).await.unwrap(),
        summary.groups.len()
    );

    let worker = WorkerLoop::new(
        "w1",
        store.clone(),
        registry,
        Arc::new(StubRunner),
        Arc::new(StubProbe),
        Arc::new(NodeActivity::new()),
        WorkerConfig::default(),
    );
    let mut processed = Vec::new();
    for _ in &summary.groups {
        processed.push(worker.process_next_task().await.unwrap().unwrap());
    }
    let mut expected: Vec<String> = summary.groups.iter().map(|g| g.id.clone()).collect();
    processed.sort();
    expected.sort();
    assert_eq!(processed, expected);
    assert_eq!(store.llen(&task_queue_key("w1")).await.unwrap(), 0);
    assert_eq!(
        store.llen(RESULTS_KEY).await.unwrap(),
        summary.groups.len()
    );

    let aggregator = ResultAggregator::new(store.clone(), AggregationConfig::default());
    let (results, failures) = aggregator.drain_batch().await.unwrap();
    assert_eq!(results, summary.groups.len());
    assert_eq!(failures, 0);

    let metrics = aggregator.current_metrics().await;
    assert_eq!(metrics.summary.total_tests, 3);
    assert_eq!(metrics.summary.passed_tests, 2);
    assert_eq!(metrics.summary.failed_tests, 1);
    assert_eq!(metrics.summary.success_rate, 66.67);
    assert_eq!(metrics.nodes["w1"].tests, 3);

    let failed = aggregator.filtered_results(Some("failed"), None, 1, 10).await;
    assert_eq!(failed.pagination.total, 1);
}
