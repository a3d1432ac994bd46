use swarm_core::config::PartitionStrategy;
use swarm_core::{SwarmError, TestUnit};
use swarm_dispatcher::partitioner::category_weight;
use swarm_dispatcher::{
    build_dependency_graph, group_priority, partitioner_for, topological_order,
    DependencyAwarePartitioner, Partitioner, RoundRobinPartitioner, SizeBasedPartitioner,
};

fn units(count: usize) -> Vec<TestUnit> {
    (0..count)
        .map(|i| TestUnit::new(format!("/app/tests/unit/t{i}.test.js"), "unit").with_estimate(1000))
        .collect()
}

fn paths(group: &[TestUnit]) -> Vec<&str> {
    group.iter().map(|u| u.path.as_str()).collect()
}

fn sorted_paths(groups: &[Vec<TestUnit>]) -> Vec<String> {
    let mut all: Vec<String> = groups.iter().flatten().map(|u| u.path.clone()).collect();
    all.sort();
    all
}

#[test]
fn test_round_robin_uses_configured_chunk() {
    let groups = RoundRobinPartitioner::new(2).partition(&units(5), 3).unwrap();
    let sizes: Vec<usize> = groups.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![2, 2, 1]);
}

#[test]
fn test_round_robin_grows_chunk_to_fit_workers() {
    let groups = RoundRobinPartitioner::new(2).partition(&units(10), 3).unwrap();
    let sizes: Vec<usize> = groups.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![4, 4, 2]);
    assert_eq!(paths(&groups[0])[0], "/app/tests/unit/t0.test.js");
}

#[test]
fn test_round_robin_single_group_when_units_fit() {
    let groups = RoundRobinPartitioner::new(10).partition(&units(7), 4).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].len(), 7);
}

#[test]
fn test_empty_input_yields_no_groups() {
    for strategy in [
        PartitionStrategy::RoundRobin,
        PartitionStrategy::SizeBased,
        PartitionStrategy::DependencyAware,
    ] {
        let groups = partitioner_for(strategy, 10).partition(&[], 3).unwrap();
        assert!(groups.is_empty(), "{strategy} produced groups");
    }
}

#[test]
fn test_zero_workers_is_rejected() {
    for strategy in [
        PartitionStrategy::RoundRobin,
        PartitionStrategy::SizeBased,
        PartitionStrategy::DependencyAware,
    ] {
        let err = partitioner_for(strategy, 10).partition(&units(3), 0).unwrap_err();
        assert!(matches!(err, SwarmError::NoWorkersAvailable));
    }
}

#[test]
fn test_every_unit_lands_in_exactly_one_group() {
    let input = units(23);
    let expected = sorted_paths(&[input.clone()]);
    for strategy in [
        PartitionStrategy::RoundRobin,
        PartitionStrategy::SizeBased,
        PartitionStrategy::DependencyAware,
    ] {
        let groups = partitioner_for(strategy, 4).partition(&input, 5).unwrap();
        assert!(groups.len() <= 5, "{strategy} exceeded worker count");
        assert!(groups.iter().all(|g| !g.is_empty()));
        assert_eq!(sorted_paths(&groups), expected, "{strategy} lost or duplicated units");
    }
}

#[test]
fn test_size_based_balances_by_estimate() {
    let input = vec![
        TestUnit::new("a", "unit").with_estimate(8000),
        TestUnit::new("b", "unit").with_estimate(7000),
        TestUnit::new("c", "unit").with_estimate(6000),
        TestUnit::new("d", "unit").with_estimate(5000),
        TestUnit::new("e", "unit").with_estimate(4000),
    ];
    let groups = SizeBasedPartitioner.partition(&input, 2).unwrap();

    // a->0, b->1, c->1 (7000<8000), d->0 (8000<13000), e->0 or 1: loads 13000 vs 13000, tie -> 0
    assert_eq!(paths(&groups[0]), vec!["a", "d", "e"]);
    assert_eq!(paths(&groups[1]), vec!["b", "c"]);
}

#[test]
fn test_size_based_ties_go_to_lowest_index() {
    let input = vec![
        TestUnit::new("x", "unit").with_estimate(1000),
        TestUnit::new("y", "unit").with_estimate(1000),
    ];
    let groups = SizeBasedPartitioner.partition(&input, 4).unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(paths(&groups[0]), vec!["x"]);
    assert_eq!(paths(&groups[1]), vec!["y"]);
}

#[test]
fn test_size_based_makespan_bound() {
    let estimates = [9000u64, 7000, 6000, 5000, 5000, 4000, 3000, 2000, 2000, 1000];
    let input: Vec<TestUnit> = estimates
        .iter()
        .enumerate()
        .map(|(i, &ms)| TestUnit::new(format!("u{i}"), "unit").with_estimate(ms))
        .collect();
    let workers = 3;
    let groups = SizeBasedPartitioner.partition(&input, workers).unwrap();

    let makespan = groups
        .iter()
        .map(|g| g.iter().map(|u| u.estimated_duration).sum::<u64>())
        .max()
        .unwrap();
    let total: u64 = estimates.iter().sum();
    let lower_bound = total.div_ceil(workers as u64).max(estimates[0]);
    assert!(makespan * 3 <= lower_bound * 4);
}

#[test]
fn test_dependency_graph_edges() {
    let input = vec![
        TestUnit::new("/t/a.test.js", "unit").with_dependencies(["b.test", "lodash", "a.test"]),
        TestUnit::new("/t/b.test.js", "unit"),
        TestUnit::new("/t/c.test.js", "unit").with_dependencies([".test.js"]),
    ];
    let graph = build_dependency_graph(&input);

    assert_eq!(graph[0], vec![1]); // lodash unresolved, self-edge dropped
    assert!(graph[1].is_empty());
    assert_eq!(graph[2], vec![0]); // first match wins
}

#[test]
fn test_topological_order_puts_dependencies_first() {
    let input = vec![
        TestUnit::new("/t/a.test.js", "unit").with_dependencies(["b.test"]),
        TestUnit::new("/t/b.test.js", "unit").with_dependencies(["c.test"]),
        TestUnit::new("/t/c.test.js", "unit"),
        TestUnit::new("/t/d.test.js", "unit"),
    ];
    let graph = build_dependency_graph(&input);
    let order = topological_order(&input, &graph).unwrap();
    assert_eq!(order, vec![2, 1, 0, 3]);
}

#[test]
fn test_cycle_is_reported_with_path() {
    let input = vec![
        TestUnit::new("/t/a.test.js", "unit").with_dependencies(["b.test"]),
        TestUnit::new("/t/b.test.js", "unit").with_dependencies(["a.test"]),
    ];
    let err = DependencyAwarePartitioner.partition(&input, 2).unwrap_err();
    match err {
        SwarmError::CircularDependency { cycle } => {
            assert_eq!(cycle, vec!["/t/a.test.js", "/t/b.test.js", "/t/a.test.js"]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_dependency_aware_round_robins_in_topological_order() {
    let input = vec![
        TestUnit::new("/t/a.test.js", "unit").with_dependencies(["b.test"]),
        TestUnit::new("/t/b.test.js", "unit"),
        TestUnit::new("/t/c.test.js", "unit"),
    ];
    let groups = DependencyAwarePartitioner.partition(&input, 2).unwrap();
    assert_eq!(paths(&groups[0]), vec!["/t/b.test.js", "/t/c.test.js"]);
    assert_eq!(paths(&groups[1]), vec!["/t/a.test.js"]);
}

#[test]
fn test_group_priority() {
    let group = vec![
        TestUnit::new("a", "unit").with_estimate(5_000),       // 1 + 10
        TestUnit::new("b", "e2e").with_estimate(35_000),       // 3 + 7
        TestUnit::new("c", "security").with_estimate(200_000), // 5 + 0
        TestUnit::new("d", "smoke").with_estimate(0),          // 0 + 10
    ];
    assert_eq!(group_priority(&group), 36);
    assert_eq!(category_weight("performance"), 4);
}
