//! Agents, their task scheduling, and the message bus connecting them.
//!
//! - `core`: value types and the `TaskExecutor` extension point
//! - `messaging`: `Message`, `MessageBus`, handlers
//! - `Agent`: admission control, scheduling loop, message loop

pub mod core;
pub mod messaging;
mod runtime;
mod table;

pub use self::core::{
    AgentMetrics, AgentStatus, AgentStatusReport, CannotHandle, Capability, CapabilityRegistry,
    ExecutionContext, FileFormats, MetricsSnapshot, ParamKind, ParameterSpec, Task, TaskExecutor,
    TaskPriority, TaskStatus,
};
pub use self::messaging::{
    BROADCAST, BoxedHandler, BusStats, CompletionReport, FnHandler, Inbox, Message,
    MessageBus, MessageHandler, handler_fn,
};
pub use self::runtime::{Agent, RejectReason, Rejected};
