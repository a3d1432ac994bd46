use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use swarm_core::config::StoreConfig;
use swarm_core::{decode_json, push_json, CoordinationStore, TaskGroup, TestUnit};
use swarm_infrastructure::keys::{heartbeat_key, task_queue_key, NODES_KEY};
use swarm_infrastructure::{InMemoryStore, RedisStore};

/// Exercises the coordination patterns the orchestrator relies on against
/// any backend.
async fn exercise_store(store: Arc<dyn CoordinationStore>, node: &str) -> Result<()> {
    store.ping().await?;

    // registry hash
    store.hset(NODES_KEY, node, "{}").await?;
    assert!(store.hkeys(NODES_KEY).await?.contains(&node.to_string()));

    // heartbeat with TTL
    store
        .set_ex(&heartbeat_key(node), "1700000000000", Duration::from_secs(120))
        .await?;
    assert_eq!(
        store.get(&heartbeat_key(node)).await?.as_deref(),
        Some("1700000000000")
    );

    // task queue is FIFO per node
    let queue = task_queue_key(node);
    for i in 0..3 {
        let group = TaskGroup {
            id: format!("task-1-{i}"),
            node_id: node.to_string(),
            tests: vec![TestUnit::new(format!("tests/unit/{i}.test.js"), "unit")],
            priority: 1,
            estimated_duration: 5000,
            assigned_at: chrono::Utc::now(),
        };
        push_json(store.as_ref(), &queue, &group).await?;
    }
    for i in 0..3 {
        let payload = store
            .brpop(&queue, Duration::from_secs(1))
            .await?
            .expect("queued group");
        let group: TaskGroup = decode_json(&payload)?;
        assert_eq!(group.id, format!("task-1-{i}"));
    }
    assert_eq!(store.brpop(&queue, Duration::from_secs(1)).await?, None);

    // cleanup
    assert!(store.hdel(NODES_KEY, node).await?);
    assert!(store.del(&heartbeat_key(node)).await?);
    Ok(())
}

#[tokio::test]
async fn test_in_memory_store_contract() -> Result<()> {
    exercise_store(Arc::new(InMemoryStore::new()), "memory-node").await
}

#[tokio::test]
#[ignore] // Requires a redis server on 127.0.0.1:6379
async fn test_redis_store_contract() -> Result<()> {
    let config = StoreConfig {
        host: "127.0.0.1".to_string(),
        connection_timeout_seconds: 5,
        ..Default::default()
    };
    let store = RedisStore::connect(&config).await?;
    exercise_store(Arc::new(store), "redis-contract-node").await
}
