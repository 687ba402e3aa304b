//! Priority-banded task queues
//!
//! Three bands: urgent (critical and high share one queue), normal, low.
//! A critical task jumps to the front of the urgent band, so across bands
//! dispatch order is critical, high, normal, low even under a cap of one.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use serde_json::Value;
use tokio::sync::oneshot;

use fleet_core::types::TaskPriority;

use crate::task::{AgentExecutionResult, AgentExecutionTask};

/// A task waiting for dispatch, with its completion channel
pub struct QueuedTask {
    pub task: AgentExecutionTask,
    pub context: HashMap<String, Value>,
    pub enqueued_at: Instant,
    pub reply_to: oneshot::Sender<AgentExecutionResult>,
}

/// The three dispatch bands
#[derive(Default)]
pub struct TaskQueues {
    urgent: VecDeque<QueuedTask>,
    normal: VecDeque<QueuedTask>,
    low: VecDeque<QueuedTask>,
}

impl TaskQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue by priority band
    pub fn push(&mut self, entry: QueuedTask) {
        match entry.task.priority {
            TaskPriority::Critical => self.urgent.push_front(entry),
            TaskPriority::High => self.urgent.push_back(entry),
            TaskPriority::Normal => self.normal.push_back(entry),
            TaskPriority::Low => self.low.push_back(entry),
        }
    }

    /// Dequeue from the highest non-empty band
    pub fn pop_highest(&mut self) -> Option<QueuedTask> {
        self.urgent
            .pop_front()
            .or_else(|| self.normal.pop_front())
            .or_else(|| self.low.pop_front())
    }

    pub fn len(&self) -> usize {
        self.urgent.len() + self.normal.len() + self.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue depths as (urgent, normal, low)
    pub fn depths(&self) -> (usize, usize, usize) {
        (self.urgent.len(), self.normal.len(), self.low.len())
    }
}
