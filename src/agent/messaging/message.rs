//! Message types for inter-agent communication.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::agent::core::{Task, TaskStatus};

/// Destination value that addresses every registered agent except the sender.
pub const BROADCAST: &str = "*";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub from_agent: String,
    pub to_agent: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub content: String,
    #[serde(default)]
    pub data: HashMap<String, Value>,
    pub timestamp: DateTime<Utc>,
    /// Carried for the receiver; the hub does not enforce replies.
    #[serde(default)]
    pub requires_response: bool,
}

impl Message {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        message_type: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from_agent: from.into(),
            to_agent: to.into(),
            message_type: message_type.into(),
            content: content.into(),
            data: HashMap::new(),
            timestamp: Utc::now(),
            requires_response: false,
        }
    }

    pub fn broadcast(
        from: impl Into<String>,
        message_type: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::new(from, BROADCAST, message_type, content)
    }

    pub fn with_data(mut self, data: HashMap<String, Value>) -> Self {
        self.data = data;
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn requiring_response(mut self) -> Self {
        self.requires_response = true;
        self
    }

    pub fn is_broadcast(&self) -> bool {
        self.to_agent == BROADCAST
    }

    pub fn is_for(&self, agent: &str) -> bool {
        self.to_agent == agent || (self.is_broadcast() && self.from_agent != agent)
    }
}

/// Payload of the completion message an agent emits for a finished task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionReport {
    pub task_id: String,
    pub task_type: String,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl CompletionReport {
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            task_type: task.task_type.clone(),
            status: task.status,
            result: task.result.clone(),
            error: task.error.clone(),
        }
    }

    pub fn into_message(
        self,
        from: impl Into<String>,
        to: impl Into<String>,
        message_type: impl Into<String>,
    ) -> Message {
        let content = format!("Task finished: {}", self.task_type);
        let mut data = HashMap::new();
        data.insert("task_id".to_string(), Value::String(self.task_id));
        data.insert("task_type".to_string(), Value::String(self.task_type));
        data.insert(
            "status".to_string(),
            Value::String(self.status.as_str().to_string()),
        );
        data.insert("result".to_string(), self.result.unwrap_or(Value::Null));
        data.insert(
            "error".to_string(),
            self.error.map(Value::String).unwrap_or(Value::Null),
        );
        Message::new(from, to, message_type, content).with_data(data)
    }

    /// Read a report back out of a received message's data.
    pub fn from_message(message: &Message) -> Option<Self> {
        let data = &message.data;
        let status: TaskStatus = serde_json::from_value(data.get("status")?.clone()).ok()?;
        Some(Self {
            task_id: data.get("task_id")?.as_str()?.to_string(),
            task_type: data.get("task_type")?.as_str()?.to_string(),
            status,
            result: data.get("result").filter(|v| !v.is_null()).cloned(),
            error: data
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_creation() {
        let msg = Message::new("music_agent", "master", "note", "hello").with_field("k", 1);

        assert_eq!(msg.from_agent, "music_agent");
        assert_eq!(msg.to_agent, "master");
        assert!(!msg.is_broadcast());
        assert!(msg.is_for("master"));
        assert!(!msg.is_for("os_agent"));
        assert_eq!(msg.data["k"], json!(1));
        assert!(!msg.requires_response);
    }

    #[test]
    fn test_broadcast_message_excludes_sender() {
        let msg = Message::broadcast("master", "shutdown", "bye");

        assert!(msg.is_broadcast());
        assert!(msg.is_for("music_agent"));
        assert!(!msg.is_for("master"));
    }

    #[test]
    fn test_completion_report_message() {
        let mut task = Task::new("ping", "are you there");
        task.mark_completed(json!("pong"));

        let msg = CompletionReport::from_task(&task).into_message("a", "master", "task_completed");
        assert_eq!(msg.message_type, "task_completed");
        assert_eq!(msg.data["task_id"], json!(task.id));
        assert_eq!(msg.data["status"], json!("completed"));
        assert_eq!(msg.data["result"], json!("pong"));
        assert_eq!(msg.data["error"], Value::Null);

        let report = CompletionReport::from_message(&msg).unwrap();
        assert_eq!(report.task_id, task.id);
        assert_eq!(report.status, TaskStatus::Completed);
        assert_eq!(report.result, Some(json!("pong")));
        assert!(report.error.is_none());
    }

    #[test]
    fn test_completion_report_rejects_foreign_message() {
        let msg = Message::new("a", "b", "note", "no data");
        assert!(CompletionReport::from_message(&msg).is_none());
    }

    #[test]
    fn test_message_serializes_type_field() {
        let msg = Message::new("a", "b", "note", "x");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "note");
    }
}
