use std::fmt;

use serde::{Deserialize, Serialize};

use super::capability::FileFormats;
use super::metrics::MetricsSnapshot;

/// Agent-level state.
///
/// The runtime moves `Idle -> Busy -> Idle` around each execution and to
/// `Offline` on stop. `Error` is available to concrete agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Idle,
    Busy,
    Error,
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Error => "error",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of an agent for discovery and dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatusReport {
    pub name: String,
    pub description: String,
    pub status: AgentStatus,
    pub running: bool,
    pub capabilities: Vec<String>,
    pub capability_count: usize,
    pub capability_categories: Vec<String>,
    pub task_count: usize,
    pub pending_tasks: usize,
    pub running_tasks: usize,
    pub supported_file_formats: FileFormats,
    pub metrics: MetricsSnapshot,
}
