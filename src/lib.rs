pub mod agent;
pub mod cli;
pub mod config;
pub mod error;

pub use agent::{
    Agent, AgentStatus, Capability, CompletionReport, ExecutionContext, Message, MessageBus,
    RejectReason, Rejected, Task, TaskExecutor, TaskPriority, TaskStatus,
};
pub use config::HubConfig;
pub use error::{HubError, Result};
