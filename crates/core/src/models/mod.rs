//! # Data models
//!
//! Records exchanged through the coordination store. Field names on the wire
//! are camelCase so that nodes written against the same channel layout stay
//! interoperable; `TestUnit` keeps its snake_case `estimated_duration`.
//!
//! ```text
//! TestUnit ──partition──▶ TaskGroup ──swarm:tasks:{id}──▶ worker
//! worker ──swarm:results──▶ GroupReport(TestResult[])
//! worker ──swarm:failures──▶ FailureReport
//! ```

pub mod alert;
pub mod coverage;
pub mod metric;
pub mod node;
pub mod result;
pub mod test_unit;

pub use alert::*;
pub use coverage::*;
pub use metric::*;
pub use node::*;
pub use result::*;
pub use test_unit::*;
