//! Scripted executor for driving the agent runtime without real capabilities.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};

use agent_hub::agent::{CapabilityRegistry, ExecutionContext};
use agent_hub::{Agent, Capability, HubConfig, HubError, MessageBus, Result, Task, TaskExecutor};

/// What the mock does for a given task type.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Return this value.
    Succeed(Value),
    /// Return `Err(HubError::Execution)`.
    Fail(String),
    /// Panic inside `execute_task`.
    Panic(String),
    /// Return the structured soft decline.
    Decline(String),
    /// Set `no_retry` on the task, then fail.
    FailNoRetry(String),
}

#[derive(Default)]
pub struct MockExecutor {
    behaviors: RwLock<HashMap<String, Behavior>>,
    capabilities: Vec<Capability>,
    delay: Option<Duration>,
    executed: Mutex<Vec<String>>,
    events: Mutex<Vec<String>>,
}

impl MockExecutor {
    /// Task ids in the order they were executed.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    /// `start:<id>` and `end:<id>` markers in the order they happened.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn execution_count(&self) -> usize {
        self.executed.lock().len()
    }
}

#[async_trait]
impl TaskExecutor for MockExecutor {
    fn register_capabilities(&self, registry: &CapabilityRegistry) {
        for capability in &self.capabilities {
            registry.register(capability.clone());
        }
    }

    async fn execute_task(&self, ctx: &ExecutionContext, task: &mut Task) -> Result<Value> {
        self.executed.lock().push(task.id.clone());
        self.events.lock().push(format!("start:{}", task.id));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let behavior = self.behaviors.read().get(&task.task_type).cloned();
        let outcome = match behavior {
            None => Ok(json!({ "echo": task.content })),
            Some(Behavior::Succeed(value)) => Ok(value),
            Some(Behavior::Fail(reason)) => Err(HubError::execution(reason)),
            Some(Behavior::Panic(reason)) => panic!("{}", reason),
            Some(Behavior::Decline(reason)) => Ok(ctx.cannot_handle(
                reason,
                "try another agent",
                HashMap::from([("target".to_string(), "what to act on".to_string())]),
            )),
            Some(Behavior::FailNoRetry(reason)) => {
                task.no_retry = true;
                Err(HubError::execution(reason))
            }
        };

        self.events.lock().push(format!("end:{}", task.id));
        outcome
    }
}

pub struct MockExecutorBuilder {
    executor: MockExecutor,
}

impl MockExecutorBuilder {
    pub fn new() -> Self {
        Self {
            executor: MockExecutor::default(),
        }
    }

    pub fn behavior(self, task_type: &str, behavior: Behavior) -> Self {
        self.executor
            .behaviors
            .write()
            .insert(task_type.to_string(), behavior);
        self
    }

    pub fn capability(mut self, capability: Capability) -> Self {
        self.executor.capabilities.push(capability);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.executor.delay = Some(delay);
        self
    }

    pub fn build(self) -> Arc<MockExecutor> {
        Arc::new(self.executor)
    }
}

impl Default for MockExecutorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bus plus one agent named `name` running `executor`, with a fast tick.
pub fn agent_with(
    name: &str,
    executor: Arc<MockExecutor>,
) -> (Arc<Agent>, Arc<MessageBus>) {
    let mut config = HubConfig::default();
    config.scheduler.tick_interval_ms = 10;
    config.scheduler.shutdown_grace_ms = 500;
    agent_with_config(name, executor, &config)
}

pub fn agent_with_config(
    name: &str,
    executor: Arc<MockExecutor>,
    config: &HubConfig,
) -> (Arc<Agent>, Arc<MessageBus>) {
    let bus = Arc::new(MessageBus::new(config.bus.clone()));
    let agent = Agent::new(name, "scripted test agent", executor, Arc::clone(&bus), config);
    (agent, bus)
}
