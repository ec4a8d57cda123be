use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use agent_hub::agent::{
    CapabilityRegistry, CompletionReport, ExecutionContext, ParamKind, ParameterSpec,
};
use agent_hub::cli::{Cli, Commands, ConfigAction};
use agent_hub::{
    Agent, Capability, HubConfig, HubError, MessageBus, Result, Task, TaskExecutor, TaskPriority,
};

const DEFAULT_CONFIG_PATH: &str = "agent-hub.toml";

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("agent_hub=debug")
    } else {
        EnvFilter::new("agent_hub=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli
        .config
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    match cli.command {
        Commands::Run {
            tasks,
            timeout_secs,
        } => {
            let config = HubConfig::load(&config_path).await?;
            cmd_run(&config, tasks, Duration::from_secs(timeout_secs)).await
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let config = HubConfig::load(&config_path).await?;
                print!("{}", config.to_toml()?);
                Ok(())
            }
            ConfigAction::Init { path } => {
                HubConfig::default().save(&path).await?;
                println!("Wrote default configuration to {}", path.display());
                Ok(())
            }
        },
    }
}

/// Echoes task content back, optionally after a delay.
struct EchoExecutor;

#[async_trait]
impl TaskExecutor for EchoExecutor {
    fn register_capabilities(&self, registry: &CapabilityRegistry) {
        registry.register(
            Capability::new("echo", "Return the task content unchanged")
                .with_category("demo")
                .with_param(
                    "delay_ms",
                    ParameterSpec::optional(ParamKind::Integer, "milliseconds to wait first"),
                ),
        );
        registry.register_file_formats(&["txt", "md"], &["txt"]);
    }

    async fn execute_task(&self, ctx: &ExecutionContext, task: &mut Task) -> Result<Value> {
        if task.task_type != "echo" {
            return Ok(ctx.cannot_handle(
                format!("unsupported task type '{}'", task.task_type),
                "route the task to an agent with a matching capability",
                Default::default(),
            ));
        }

        if let Some(delay) = task.param("delay_ms").and_then(Value::as_u64) {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        Ok(json!({ "echo": task.content, "agent": ctx.agent_name() }))
    }
}

async fn cmd_run(config: &HubConfig, count: usize, timeout: Duration) -> Result<()> {
    let bus = Arc::new(MessageBus::new(config.bus.clone()));
    let mut master = bus.register_agent(config.reporting.collaborator.clone());

    let agent = Agent::new(
        "echo_agent",
        "Echoes task content back to the caller",
        Arc::new(EchoExecutor),
        Arc::clone(&bus),
        config,
    );
    agent.start()?;

    let deadline = Instant::now() + timeout;
    let levels = [TaskPriority::Low, TaskPriority::Normal, TaskPriority::High];

    for i in 0..count {
        let mut task = Task::new("echo", format!("message #{}", i + 1))
            .with_priority(levels[i % levels.len()])
            .with_param("delay_ms", 20)
            .with_created_by(config.reporting.collaborator.clone());

        loop {
            match agent.try_assign(task) {
                Ok(id) => {
                    info!(task_id = %id, "Submitted task {}/{}", i + 1, count);
                    break;
                }
                Err(rejected) if Instant::now() < deadline => {
                    task = rejected.into_task();
                    tokio::time::sleep(config.scheduler.tick_interval()).await;
                }
                Err(rejected) => {
                    warn!(reason = %rejected.reason, "Giving up on submission");
                    agent.stop().await;
                    return Err(HubError::Other("timed out submitting tasks".into()));
                }
            }
        }
    }

    let mut received = 0;
    while received < count {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let Some(message) = master.recv_timeout(remaining).await else {
            warn!(received, expected = count, "Timed out waiting for completion reports");
            break;
        };
        if let Some(report) = CompletionReport::from_message(&message) {
            received += 1;
            println!("{}", serde_json::to_string(&report)?);
        }
    }

    agent.stop().await;
    println!("{}", serde_json::to_string_pretty(&agent.status_report())?);

    Ok(())
}
