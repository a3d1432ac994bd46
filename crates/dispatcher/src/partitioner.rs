use swarm_core::config::PartitionStrategy;
use swarm_core::{SwarmError, SwarmResult, TestUnit};
use tracing::debug;

/// Splits a discovered test set into at most `workers` groups
pub trait Partitioner: Send + Sync {
    fn partition(&self, units: &[TestUnit], workers: usize) -> SwarmResult<Vec<Vec<TestUnit>>>;

    fn name(&self) -> &str;
}

pub fn partitioner_for(strategy: PartitionStrategy, group_size: usize) -> Box<dyn Partitioner> {
    match strategy {
        PartitionStrategy::RoundRobin => Box::new(RoundRobinPartitioner::new(group_size)),
        PartitionStrategy::SizeBased => Box::new(SizeBasedPartitioner),
        PartitionStrategy::DependencyAware => Box::new(DependencyAwarePartitioner),
    }
}

fn ensure_workers(workers: usize) -> SwarmResult<()> {
    if workers == 0 {
        Err(SwarmError::NoWorkersAvailable)
    } else {
        Ok(())
    }
}

/// Consecutive fixed-size chunks, ignoring cost and dependencies.
///
/// The chunk grows to `ceil(units / workers)` when the configured size would
/// produce more groups than workers.
#[derive(Debug, Clone)]
pub struct RoundRobinPartitioner {
    group_size: usize,
}

impl RoundRobinPartitioner {
    pub fn new(group_size: usize) -> Self {
        Self {
            group_size: group_size.max(1),
        }
    }
}

impl Partitioner for RoundRobinPartitioner {
    fn partition(&self, units: &[TestUnit], workers: usize) -> SwarmResult<Vec<Vec<TestUnit>>> {
        ensure_workers(workers)?;
        let chunk = self.group_size.max(units.len().div_ceil(workers)).max(1);
        let groups: Vec<Vec<TestUnit>> = units.chunks(chunk).map(<[TestUnit]>::to_vec).collect();
        debug!(chunk, groups = groups.len(), "Round-robin partition");
        Ok(groups)
    }

    fn name(&self) -> &str {
        "round-robin"
    }
}

/// Greedy longest-processing-time: heaviest unit first onto the lightest group
#[derive(Debug, Clone, Default)]
pub struct SizeBasedPartitioner;

impl Partitioner for SizeBasedPartitioner {
    fn partition(&self, units: &[TestUnit], workers: usize) -> SwarmResult<Vec<Vec<TestUnit>>> {
        ensure_workers(workers)?;

        let mut sorted: Vec<&TestUnit> = units.iter().collect();
        // stable: equal estimates keep discovery order
        sorted.sort_by(|a, b| b.estimated_duration.cmp(&a.estimated_duration));

        let mut groups: Vec<Vec<TestUnit>> = vec![Vec::new(); workers];
        let mut loads = vec![0u64; workers];
        for unit in sorted {
            let lightest = loads
                .iter()
                .enumerate()
                .min_by_key(|(index, load)| (**load, *index))
                .map(|(index, _)| index)
                .unwrap_or(0);
            loads[lightest] += unit.estimated_duration;
            groups[lightest].push(unit.clone());
        }

        debug!(?loads, "Size-based partition");
        Ok(groups.into_iter().filter(|g| !g.is_empty()).collect())
    }

    fn name(&self) -> &str {
        "size-based"
    }
}

/// Unit index -> indices of the units it depends on
pub type DependencyGraph = Vec<Vec<usize>>;

/// Edge A -> B when B's path contains one of A's dependency names. The first
/// matching unit wins; self-references and unresolved names are dropped.
pub fn build_dependency_graph(units: &[TestUnit]) -> DependencyGraph {
    units
        .iter()
        .enumerate()
        .map(|(index, unit)| {
            let mut edges = Vec::new();
            for dep in &unit.dependencies {
                let target = units
                    .iter()
                    .enumerate()
                    .find(|(_, other)| other.path.contains(dep.as_str()))
                    .map(|(target, _)| target);
                if let Some(target) = target {
                    if target != index && !edges.contains(&target) {
                        edges.push(target);
                    }
                }
            }
            edges
        })
        .collect()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Depth-first ordering placing dependencies before dependents; roots are
/// visited in discovery order. A back edge fails with the cycle's paths.
pub fn topological_order(units: &[TestUnit], graph: &DependencyGraph) -> SwarmResult<Vec<usize>> {
    fn visit(
        node: usize,
        units: &[TestUnit],
        graph: &DependencyGraph,
        marks: &mut [Mark],
        stack: &mut Vec<usize>,
        order: &mut Vec<usize>,
    ) -> SwarmResult<()> {
        match marks[node] {
            Mark::Done => return Ok(()),
            Mark::InProgress => {
                let start = stack.iter().position(|&n| n == node).unwrap_or(0);
                let mut cycle: Vec<String> =
                    stack[start..].iter().map(|&n| units[n].path.clone()).collect();
                cycle.push(units[node].path.clone());
                return Err(SwarmError::CircularDependency { cycle });
            }
            Mark::Unvisited => {}
        }

        marks[node] = Mark::InProgress;
        stack.push(node);
        for &dep in &graph[node] {
            visit(dep, units, graph, marks, stack, order)?;
        }
        stack.pop();
        marks[node] = Mark::Done;
        order.push(node);
        Ok(())
    }

    let mut marks = vec![Mark::Unvisited; units.len()];
    let mut stack = Vec::new();
    let mut order = Vec::with_capacity(units.len());
    for node in 0..units.len() {
        visit(node, units, graph, &mut marks, &mut stack, &mut order)?;
    }
    Ok(order)
}

/// Topological order, then round-robin over the workers
#[derive(Debug, Clone, Default)]
pub struct DependencyAwarePartitioner;

impl Partitioner for DependencyAwarePartitioner {
    fn partition(&self, units: &[TestUnit], workers: usize) -> SwarmResult<Vec<Vec<TestUnit>>> {
        ensure_workers(workers)?;

        let graph = build_dependency_graph(units);
        let order = topological_order(units, &graph)?;

        let mut groups: Vec<Vec<TestUnit>> = vec![Vec::new(); workers];
        for (position, index) in order.into_iter().enumerate() {
            groups[position % workers].push(units[index].clone());
        }

        let edges: usize = graph.iter().map(Vec::len).sum();
        debug!(edges, "Dependency-aware partition");
        Ok(groups.into_iter().filter(|g| !g.is_empty()).collect())
    }

    fn name(&self) -> &str {
        "dependency-aware"
    }
}

pub fn category_weight(category: &str) -> u32 {
    match category {
        "unit" => 1,
        "integration" => 2,
        "e2e" => 3,
        "performance" => 4,
        "security" => 5,
        _ => 0,
    }
}

/// Display-only ranking: heavier categories and shorter units score higher
pub fn group_priority(units: &[TestUnit]) -> u32 {
    units
        .iter()
        .map(|unit| {
            let speed_bonus = 10u64.saturating_sub(unit.estimated_duration / 10_000) as u32;
            category_weight(&unit.category) + speed_bonus
        })
        .sum()
}
