//! Extension point implemented by every capability agent.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::capability::CapabilityRegistry;
use super::task::Task;
use crate::agent::messaging::{Message, MessageBus};
use crate::error::Result;

/// The single polymorphic operation of an agent.
///
/// Returning `Ok` records the task as COMPLETED with the value as its result.
/// Returning `Err` (or panicking) records it as FAILED. A capability that
/// wants to decline politely returns [`ExecutionContext::cannot_handle`],
/// which the scheduler treats as an ordinary result.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Called once while the agent is being built.
    fn register_capabilities(&self, _registry: &CapabilityRegistry) {}

    async fn execute_task(&self, ctx: &ExecutionContext, task: &mut Task) -> Result<Value>;
}

/// What an executor can see of the agent running it.
#[derive(Clone)]
pub struct ExecutionContext {
    agent_name: String,
    bus: Arc<MessageBus>,
}

impl ExecutionContext {
    pub(crate) fn new(agent_name: impl Into<String>, bus: Arc<MessageBus>) -> Self {
        Self {
            agent_name: agent_name.into(),
            bus,
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// Structured soft-decline result.
    pub fn cannot_handle(
        &self,
        reason: impl Into<String>,
        suggestion: impl Into<String>,
        missing_info: HashMap<String, String>,
    ) -> Value {
        CannotHandle {
            cannot_handle: true,
            agent: self.agent_name.clone(),
            reason: reason.into(),
            suggestion: suggestion.into(),
            missing_info,
        }
        .into_value()
    }

    pub async fn send_message(
        &self,
        to_agent: impl Into<String>,
        message_type: impl Into<String>,
        content: impl Into<String>,
        data: HashMap<String, Value>,
    ) -> usize {
        let message =
            Message::new(self.agent_name.clone(), to_agent, message_type, content).with_data(data);
        self.bus.send_message(message).await
    }
}

/// A capability's machine-readable refusal, carried as the task result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CannotHandle {
    pub cannot_handle: bool,
    pub agent: String,
    pub reason: String,
    pub suggestion: String,
    /// Inputs the caller could supply, keyed by parameter name.
    #[serde(default)]
    pub missing_info: HashMap<String, String>,
}

impl CannotHandle {
    pub fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Recognise a decline inside a task result.
    pub fn from_result(result: &Value) -> Option<Self> {
        if result.get("cannot_handle").and_then(Value::as_bool) != Some(true) {
            return None;
        }
        serde_json::from_value(result.clone()).ok()
    }
}
