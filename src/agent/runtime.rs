//! Agent runtime: admission control, the scheduling loop, the message loop,
//! and completion reporting.
//!
//! ```text
//!  assign_task ──▶ [ TaskTable ] ──(every tick: PENDING sorted by priority)──▶ execute_task
//!                                                                                   │
//!  inbox ──▶ message loop ──▶ on_message handlers          task_completed ◀────────┘
//! ```

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::core::{
    AgentMetrics, AgentStatus, AgentStatusReport, Capability, CapabilityRegistry,
    ExecutionContext, FileFormats, MetricsSnapshot, Task, TaskExecutor, TaskStatus,
};
use super::messaging::{BoxedHandler, CompletionReport, Inbox, Message, MessageBus, dispatch_all};
use super::table::TaskTable;
use crate::config::{HubConfig, ReportingConfig, SchedulerConfig};
use crate::error::{HubError, Result, panic_message};

/// Why an agent refused a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// A task is already RUNNING.
    Busy,
    /// The PENDING backlog is at its cap.
    Backlogged { pending: usize },
    /// Params do not match the schema of the capability named by the task type.
    InvalidParams(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy => write!(f, "agent is busy with a running task"),
            Self::Backlogged { pending } => write!(f, "too many pending tasks ({})", pending),
            Self::InvalidParams(reason) => write!(f, "invalid parameters: {}", reason),
        }
    }
}

/// A refused task, handed back so the caller can retry or route it elsewhere.
#[derive(Debug, Error)]
#[error("task {} rejected: {reason}", .task.id)]
pub struct Rejected {
    pub reason: RejectReason,
    pub task: Box<Task>,
}

impl Rejected {
    pub fn into_task(self) -> Task {
        *self.task
    }
}

struct RunningLoops {
    shutdown: watch::Sender<bool>,
    scheduler: JoinHandle<()>,
    messages: JoinHandle<()>,
}

/// An independently scheduled unit owning a task table, an inbox, and a set
/// of capabilities. Work is delegated to a [`TaskExecutor`].
pub struct Agent {
    name: String,
    description: String,
    executor: Arc<dyn TaskExecutor>,
    bus: Arc<MessageBus>,
    scheduler: SchedulerConfig,
    reporting: ReportingConfig,
    status: RwLock<AgentStatus>,
    tasks: RwLock<TaskTable>,
    capabilities: CapabilityRegistry,
    handlers: RwLock<Vec<BoxedHandler>>,
    // Kept so the inbox outlives bus re-registration of this name.
    inbox_sender: mpsc::Sender<Message>,
    inbox: AsyncMutex<Inbox>,
    // Serialises scheduling cycles so only one task is ever in flight.
    cycle: AsyncMutex<()>,
    metrics: AgentMetrics,
    loops: Mutex<Option<RunningLoops>>,
}

impl Agent {
    /// Build an agent and register its inbox on the bus under `name`.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        executor: Arc<dyn TaskExecutor>,
        bus: Arc<MessageBus>,
        config: &HubConfig,
    ) -> Arc<Self> {
        let name = name.into();
        let (inbox_sender, inbox) = bus.open_inbox(name.clone());
        bus.attach(name.clone(), inbox_sender.clone());
        let capabilities = CapabilityRegistry::new();
        executor.register_capabilities(&capabilities);

        debug!(agent = %name, capabilities = capabilities.len(), "Agent created");

        Arc::new(Self {
            name,
            description: description.into(),
            executor,
            bus,
            scheduler: config.scheduler.clone(),
            reporting: config.reporting.clone(),
            status: RwLock::new(AgentStatus::Idle),
            tasks: RwLock::new(TaskTable::new()),
            capabilities,
            handlers: RwLock::new(Vec::new()),
            inbox_sender,
            inbox: AsyncMutex::new(inbox),
            cycle: AsyncMutex::new(()),
            metrics: AgentMetrics::new(),
            loops: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn status(&self) -> AgentStatus {
        *self.status.read()
    }

    /// Concrete agents may flag themselves, e.g. `AgentStatus::Error`.
    pub fn set_status(&self, status: AgentStatus) {
        *self.status.write() = status;
    }

    pub fn is_running(&self) -> bool {
        self.loops.lock().is_some()
    }

    // ---- lifecycle -------------------------------------------------------

    /// Point this agent's name on the bus back at its own inbox, e.g. after
    /// `unregister_agent` or after another party registered the same name.
    pub fn register_on_bus(&self) {
        self.bus.attach(self.name.clone(), self.inbox_sender.clone());
    }

    /// Spawn the scheduling loop and the message loop. Re-registers the inbox
    /// if the name was removed from the bus.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut loops = self.loops.lock();
        if loops.is_some() {
            warn!(agent = %self.name, "Agent already running");
            return Err(HubError::AgentRunning(self.name.clone()));
        }

        if !self.bus.is_registered(&self.name) {
            self.register_on_bus();
        }
        self.set_status(AgentStatus::Idle);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let scheduler = tokio::spawn(Arc::clone(self).scheduling_loop(shutdown_rx.clone()));
        let messages = tokio::spawn(Arc::clone(self).message_loop(shutdown_rx));

        *loops = Some(RunningLoops {
            shutdown,
            scheduler,
            messages,
        });

        info!(agent = %self.name, "Agent started");
        Ok(())
    }

    /// Signal both loops, wait up to the grace period, abort what is left,
    /// and go OFFLINE.
    pub async fn stop(&self) {
        let running = self.loops.lock().take();

        if let Some(loops) = running {
            let _ = loops.shutdown.send(true);
            let grace = self.scheduler.shutdown_grace();

            for (label, mut handle) in [("scheduler", loops.scheduler), ("messages", loops.messages)] {
                if tokio::time::timeout(grace, &mut handle).await.is_err() {
                    warn!(agent = %self.name, loop_name = label, "Loop did not stop in time, aborting");
                    handle.abort();
                    let _ = handle.await;
                }
            }

            self.fail_interrupted();
        }

        self.set_status(AgentStatus::Offline);
        info!(agent = %self.name, "Agent stopped");
    }

    // Tasks left RUNNING by an aborted loop are marked FAILED.
    fn fail_interrupted(&self) {
        let mut tasks = self.tasks.write();
        for task in tasks.snapshot() {
            if task.status == TaskStatus::Running
                && let Some(t) = tasks.get_mut(&task.id)
            {
                t.mark_failed("interrupted by agent shutdown");
                warn!(agent = %self.name, task_id = %t.id, "Running task interrupted by shutdown");
            }
        }
    }

    // ---- admission -------------------------------------------------------

    /// Submit a task. Returns `false` (and drops the task) when refused.
    pub fn assign_task(&self, task: Task) -> bool {
        self.try_assign(task).is_ok()
    }

    /// Submit a task, getting it back on refusal.
    ///
    /// Refused when a task is RUNNING, when the PENDING backlog is full, or
    /// when params fail the matching capability's schema. On success the task
    /// is PENDING, assigned to this agent, and its id is returned.
    pub fn try_assign(&self, mut task: Task) -> std::result::Result<String, Rejected> {
        if let Err(reason) = self.check_params(&task) {
            return Err(self.reject(task, reason));
        }

        let mut tasks = self.tasks.write();

        if tasks.count(TaskStatus::Running) > 0 {
            drop(tasks);
            return Err(self.reject(task, RejectReason::Busy));
        }

        let pending = tasks.count(TaskStatus::Pending);
        if pending >= self.scheduler.max_pending {
            drop(tasks);
            return Err(self.reject(task, RejectReason::Backlogged { pending }));
        }

        task.status = TaskStatus::Pending;
        task.assigned_to = Some(self.name.clone());
        let id = task.id.clone();
        debug!(agent = %self.name, task_id = %id, task_type = %task.task_type, priority = task.priority, "Task admitted");
        tasks.insert(task);
        Ok(id)
    }

    fn check_params(&self, task: &Task) -> std::result::Result<(), RejectReason> {
        if !self.scheduler.validate_params {
            return Ok(());
        }
        match self.capabilities.get(&task.task_type) {
            Some(capability) => capability
                .validate_params(&task.params)
                .map_err(|e| RejectReason::InvalidParams(e.to_string())),
            None => Ok(()),
        }
    }

    fn reject(&self, task: Task, reason: RejectReason) -> Rejected {
        self.metrics.record_rejection();
        warn!(
            agent = %self.name,
            task_id = %task.id,
            task_type = %task.task_type,
            reason = %reason,
            "Task rejected"
        );
        Rejected {
            reason,
            task: Box::new(task),
        }
    }

    // ---- scheduling ------------------------------------------------------

    async fn scheduling_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let interval = self.scheduler.tick_interval();
        debug!(agent = %self.name, interval_ms = interval.as_millis() as u64, "Scheduling loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.run_cycle().await;

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        debug!(agent = %self.name, "Scheduling loop exited");
    }

    /// Run one scheduling cycle: execute every PENDING task in ascending
    /// priority order, one at a time, then apply retention. Returns how many
    /// tasks were executed.
    ///
    /// Tasks admitted while the cycle runs wait for the next cycle.
    pub async fn run_cycle(&self) -> usize {
        let _cycle = self.cycle.lock().await;

        let pending = self.tasks.read().pending_by_priority();
        if !pending.is_empty() {
            debug!(agent = %self.name, pending = pending.len(), "Found pending tasks");
        }

        let mut executed = 0;
        for id in pending {
            if self.execute_one(&id).await {
                executed += 1;
            }
        }

        let evicted = self
            .tasks
            .write()
            .evict_terminal(self.scheduler.retained_terminal);
        if evicted > 0 {
            debug!(agent = %self.name, evicted, "Evicted finished tasks");
        }

        executed
    }

    async fn execute_one(&self, id: &str) -> bool {
        let mut task = {
            let mut tasks = self.tasks.write();
            match tasks.get_mut(id) {
                Some(t) if t.status == TaskStatus::Pending => {
                    // BUSY is visible no later than RUNNING.
                    self.set_status(AgentStatus::Busy);
                    t.mark_running();
                    t.clone()
                }
                _ => return false,
            }
        };

        let ctx = ExecutionContext::new(self.name.clone(), Arc::clone(&self.bus));
        let started = Instant::now();
        let outcome = AssertUnwindSafe(self.executor.execute_task(&ctx, &mut task))
            .catch_unwind()
            .await;

        let success = match outcome {
            Ok(Ok(result)) => {
                task.mark_completed(result);
                debug!(agent = %self.name, task_id = %task.id, task_type = %task.task_type, "Task completed");
                true
            }
            Ok(Err(e)) => {
                task.mark_failed(e.to_string());
                error!(
                    agent = %self.name,
                    task_id = %task.id,
                    task_type = %task.task_type,
                    error = %e,
                    detail = ?e,
                    "Task failed"
                );
                false
            }
            Err(payload) => {
                let message = format!("task panicked: {}", panic_message(payload.as_ref()));
                task.mark_failed(message.clone());
                error!(
                    agent = %self.name,
                    task_id = %task.id,
                    task_type = %task.task_type,
                    error = %message,
                    "Task failed"
                );
                false
            }
        };
        self.metrics.record_execution(success, started.elapsed());

        let report = CompletionReport::from_task(&task);
        self.tasks.write().insert(task);

        if success || self.reporting.report_failures {
            self.send_completion_report(report).await;
        }

        self.set_status(AgentStatus::Idle);
        true
    }

    async fn send_completion_report(&self, report: CompletionReport) {
        let message = report.into_message(
            self.name.clone(),
            self.reporting.collaborator.clone(),
            self.reporting.message_type.clone(),
        );
        let delivered = self
            .bus
            .send_message_within(message, self.reporting.send_timeout())
            .await;
        if delivered == 0 {
            debug!(
                agent = %self.name,
                collaborator = %self.reporting.collaborator,
                "Completion report not delivered"
            );
        }
    }

    // ---- messaging -------------------------------------------------------

    async fn message_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut inbox = self.inbox.lock().await;
        debug!(agent = %self.name, "Message loop started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                received = inbox.recv() => match received {
                    Some(message) => self.handle_message(&message).await,
                    None => {
                        warn!(agent = %self.name, "Inbox closed, message loop exiting");
                        break;
                    }
                },
            }
        }

        debug!(agent = %self.name, "Message loop exited");
    }

    async fn handle_message(&self, message: &Message) {
        debug!(
            agent = %self.name,
            msg_id = %message.id,
            msg_type = %message.message_type,
            from = %message.from_agent,
            "Message received"
        );
        let handlers = self.handlers.read().clone();
        dispatch_all(&self.name, &handlers, message).await;
    }

    /// Register a handler for messages arriving in this agent's inbox.
    /// Handlers run in registration order.
    pub fn on_message(&self, handler: BoxedHandler) {
        self.handlers.write().push(handler);
    }

    /// Send a message from this agent through the bus.
    pub async fn send_message(
        &self,
        to_agent: impl Into<String>,
        message_type: impl Into<String>,
        content: impl Into<String>,
        data: HashMap<String, Value>,
        requires_response: bool,
    ) -> usize {
        let to_agent = to_agent.into();
        let mut message =
            Message::new(self.name.clone(), to_agent.clone(), message_type, content).with_data(data);
        message.requires_response = requires_response;

        let msg_type = message.message_type.clone();
        let delivered = self.bus.send_message(message).await;
        debug!(agent = %self.name, to = %to_agent, msg_type = %msg_type, delivered, "Message sent");
        delivered
    }

    // ---- capabilities ----------------------------------------------------

    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.capabilities
    }

    pub fn register_capability(&self, capability: Capability) -> bool {
        self.capabilities.register(capability)
    }

    pub fn remove_capability(&self, name: &str) -> bool {
        self.capabilities.remove(name)
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.contains(name)
    }

    pub fn get_all_capabilities(&self) -> Vec<String> {
        self.capabilities.names()
    }

    pub fn get_capability_details(&self, name: &str) -> Option<Capability> {
        self.capabilities.get(name)
    }

    pub fn capability_details(&self) -> HashMap<String, Capability> {
        self.capabilities.details()
    }

    pub fn file_formats(&self) -> FileFormats {
        self.capabilities.file_formats()
    }

    // ---- observability ---------------------------------------------------

    /// Snapshot of one task, if still retained.
    pub fn task(&self, id: &str) -> Option<Task> {
        self.tasks.read().get(id).cloned()
    }

    /// Snapshots of all retained tasks in insertion order.
    pub fn tasks(&self) -> Vec<Task> {
        self.tasks.read().snapshot()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn count_tasks(&self, status: TaskStatus) -> usize {
        self.tasks.read().count(status)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn status_report(&self) -> AgentStatusReport {
        let (task_count, pending_tasks, running_tasks) = {
            let tasks = self.tasks.read();
            (
                tasks.len(),
                tasks.count(TaskStatus::Pending),
                tasks.count(TaskStatus::Running),
            )
        };
        let capabilities = self.capabilities.names();

        AgentStatusReport {
            name: self.name.clone(),
            description: self.description.clone(),
            status: self.status(),
            running: self.is_running(),
            capability_count: capabilities.len(),
            capabilities,
            capability_categories: self.capabilities.categories(),
            task_count,
            pending_tasks,
            running_tasks,
            supported_file_formats: self.capabilities.file_formats(),
            metrics: self.metrics.snapshot(),
        }
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("status", &self.status())
            .field("tasks", &self.task_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::core::{ParamKind, ParameterSpec};
    use async_trait::async_trait;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl TaskExecutor for Echo {
        fn register_capabilities(&self, registry: &CapabilityRegistry) {
            registry.register(
                Capability::new("echo", "Echo the content back")
                    .with_param("text", ParameterSpec::required(ParamKind::String, "text")),
            );
        }

        async fn execute_task(&self, _ctx: &ExecutionContext, task: &mut Task) -> Result<Value> {
            match task.task_type.as_str() {
                "fail" => Err(HubError::execution("requested failure")),
                "boom" => panic!("executor exploded"),
                _ => Ok(json!(task.content)),
            }
        }
    }

    fn agent_with(config: &HubConfig) -> (Arc<Agent>, Arc<MessageBus>) {
        let bus = Arc::new(MessageBus::new(config.bus.clone()));
        let agent = Agent::new("echo_agent", "echoes", Arc::new(Echo), Arc::clone(&bus), config);
        (agent, bus)
    }

    fn agent() -> (Arc<Agent>, Arc<MessageBus>) {
        agent_with(&HubConfig::default())
    }

    #[test]
    fn test_admission_sets_pending_and_owner() {
        let (agent, _bus) = agent();
        let mut task = Task::new("ping", "hi");
        task.status = TaskStatus::Failed;
        let id = agent.try_assign(task).unwrap();

        let stored = agent.task(&id).unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);
        assert_eq!(stored.assigned_to.as_deref(), Some("echo_agent"));
    }

    #[test]
    fn test_backlog_cap() {
        let (agent, _bus) = agent();
        for _ in 0..5 {
            assert!(agent.assign_task(Task::new("ping", "")));
        }
        let rejected = agent.try_assign(Task::new("ping", "sixth")).unwrap_err();

        assert_eq!(rejected.reason, RejectReason::Backlogged { pending: 5 });
        assert_eq!(rejected.into_task().content, "sixth");
        assert_eq!(agent.task_count(), 5);
        assert_eq!(agent.metrics().rejected_admissions, 1);
    }

    #[test]
    fn test_busy_rejection() {
        let (agent, _bus) = agent();
        let id = agent.try_assign(Task::new("ping", "")).unwrap();
        agent.tasks.write().get_mut(&id).unwrap().mark_running();

        let rejected = agent.try_assign(Task::new("ping", "")).unwrap_err();
        assert_eq!(rejected.reason, RejectReason::Busy);
        assert_eq!(agent.task_count(), 1);
    }

    #[test]
    fn test_param_schema_checked_for_matching_capability() {
        let mut config = HubConfig::default();
        config.scheduler.validate_params = true;
        let (agent, _bus) = agent_with(&config);
        let rejected = agent.try_assign(Task::new("echo", "")).unwrap_err();
        assert!(matches!(rejected.reason, RejectReason::InvalidParams(_)));

        assert!(agent.assign_task(Task::new("echo", "").with_param("text", "hi")));
        assert!(agent.assign_task(Task::new("unregistered_type", "")));
    }

    #[tokio::test]
    async fn test_cycle_records_outcomes() {
        let (agent, _bus) = agent();
        let ok = agent.try_assign(Task::new("ping", "pong")).unwrap();
        let failed = agent.try_assign(Task::new("fail", "")).unwrap();
        let panicked = agent.try_assign(Task::new("boom", "")).unwrap();

        assert_eq!(agent.run_cycle().await, 3);

        let ok = agent.task(&ok).unwrap();
        assert_eq!(ok.status, TaskStatus::Completed);
        assert_eq!(ok.result, Some(json!("pong")));
        assert!(ok.started_at.is_some() && ok.completed_at.is_some());

        let failed = agent.task(&failed).unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert!(failed.error.unwrap().contains("requested failure"));

        let panicked = agent.task(&panicked).unwrap();
        assert_eq!(panicked.status, TaskStatus::Failed);
        assert!(panicked.error.unwrap().contains("executor exploded"));

        assert_eq!(agent.status(), AgentStatus::Idle);
        let metrics = agent.metrics();
        assert_eq!(metrics.successful_executions, 1);
        assert_eq!(metrics.failed_executions, 2);
    }

    #[tokio::test]
    async fn test_completion_report_sent_to_collaborator() {
        let (agent, bus) = agent();
        let mut master = bus.register_agent("master");
        let id = agent.try_assign(Task::new("ping", "pong")).unwrap();

        agent.run_cycle().await;

        let msg = master.try_recv().unwrap();
        assert_eq!(msg.message_type, "task_completed");
        assert_eq!(msg.from_agent, "echo_agent");
        let report = CompletionReport::from_message(&msg).unwrap();
        assert_eq!(report.task_id, id);
        assert_eq!(report.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_start_twice_fails_and_stop_goes_offline() {
        let (agent, _bus) = agent();
        agent.start().unwrap();
        assert!(agent.is_running());
        assert!(matches!(agent.start(), Err(HubError::AgentRunning(_))));

        agent.stop().await;
        assert!(!agent.is_running());
        assert_eq!(agent.status(), AgentStatus::Offline);

        agent.start().unwrap();
        assert_eq!(agent.status(), AgentStatus::Idle);
        agent.stop().await;
    }

    #[test]
    fn test_params_unchecked_by_default() {
        let (agent, _bus) = agent();
        assert!(agent.assign_task(Task::new("echo", "")));
    }

    #[tokio::test]
    async fn test_start_reattaches_unregistered_inbox() {
        let (agent, bus) = agent();
        assert!(bus.unregister_agent("echo_agent"));

        agent.start().unwrap();
        assert!(bus.is_registered("echo_agent"));
        agent.stop().await;
    }

    #[test]
    fn test_status_report() {
        let (agent, _bus) = agent();
        agent.capabilities().register_file_formats(&["txt"], &[]);
        agent.assign_task(Task::new("ping", ""));

        let report = agent.status_report();
        assert_eq!(report.name, "echo_agent");
        assert_eq!(report.capabilities, vec!["echo".to_string()]);
        assert_eq!(report.capability_categories, vec!["general".to_string()]);
        assert_eq!(report.pending_tasks, 1);
        assert_eq!(report.supported_file_formats.open, vec![".txt".to_string()]);
        assert!(!report.running);
    }
}
