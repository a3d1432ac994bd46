//! Manager-side orchestration: node membership, test discovery, partitioning
//! and distribution of task groups onto per-worker queues.

pub mod discovery;
pub mod dispatcher;
pub mod partitioner;
pub mod registry;

pub use discovery::TestDiscovery;
pub use dispatcher::{plan_assignments, DistributionSummary, TaskDispatcher};
pub use partitioner::{
    build_dependency_graph, group_priority, partitioner_for, topological_order,
    DependencyAwarePartitioner, Partitioner, RoundRobinPartitioner, SizeBasedPartitioner,
};
pub use registry::{describe_node, HeartbeatService, NodeActivity, NodeRegistry};
