//! Insertion-ordered task table owned by one agent.

use std::collections::HashMap;

use super::core::{Task, TaskStatus};

#[derive(Debug, Default)]
pub(crate) struct TaskTable {
    order: Vec<String>,
    tasks: HashMap<String, Task>,
}

impl TaskTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Store a task. Re-inserting an existing id keeps its original position.
    pub(crate) fn insert(&mut self, task: Task) {
        if !self.tasks.contains_key(&task.id) {
            self.order.push(task.id.clone());
        }
        self.tasks.insert(task.id.clone(), task);
    }

    pub(crate) fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.get_mut(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    pub(crate) fn count(&self, status: TaskStatus) -> usize {
        self.tasks.values().filter(|t| t.status == status).count()
    }

    /// Ids of PENDING tasks, ascending by priority. Ties keep insertion order.
    pub(crate) fn pending_by_priority(&self) -> Vec<String> {
        let mut pending: Vec<&Task> = self
            .order
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .filter(|t| t.status == TaskStatus::Pending)
            .collect();
        pending.sort_by_key(|t| t.priority);
        pending.into_iter().map(|t| t.id.clone()).collect()
    }

    /// Drop the oldest-inserted COMPLETED/FAILED tasks beyond `keep`.
    pub(crate) fn evict_terminal(&mut self, keep: usize) -> usize {
        let terminal: Vec<String> = self
            .order
            .iter()
            .filter(|id| self.tasks.get(*id).is_some_and(|t| t.status.is_terminal()))
            .cloned()
            .collect();

        if terminal.len() <= keep {
            return 0;
        }

        let evict = terminal.len() - keep;
        for id in &terminal[..evict] {
            self.tasks.remove(id);
        }
        self.order.retain(|id| self.tasks.contains_key(id));
        evict
    }

    pub(crate) fn snapshot(&self) -> Vec<Task> {
        self.order
            .iter()
            .filter_map(|id| self.tasks.get(id).cloned())
            .collect()
    }
}
