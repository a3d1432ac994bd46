//! Worker side of the swarm: pops task groups from this node's queue, runs
//! each unit as an external test command and reports the outcome.

pub mod runner;
pub mod worker_loop;

pub use runner::{build_command, extract_coverage, CommandSpec, CommandTestRunner, ExecutionOutcome, TestRunner};
pub use worker_loop::{WorkerLoop, WorkerState};
