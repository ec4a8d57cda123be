//! Core agent contracts and value types.
//!
//! - `Task`, `TaskStatus`, `TaskPriority`: the unit of work
//! - `Capability`, `CapabilityRegistry`: what an agent advertises
//! - `TaskExecutor`, `ExecutionContext`: the one method capabilities implement
//! - `AgentStatus`, `AgentStatusReport`: agent-level state
//! - `AgentMetrics`: execution counters

mod capability;
mod executor;
mod metrics;
mod status;
mod task;

pub use capability::{Capability, CapabilityRegistry, FileFormats, ParamKind, ParameterSpec};
pub use executor::{CannotHandle, ExecutionContext, TaskExecutor};
pub use metrics::{AgentMetrics, MetricsSnapshot};
pub use status::{AgentStatus, AgentStatusReport};
pub use task::{Task, TaskPriority, TaskStatus};
