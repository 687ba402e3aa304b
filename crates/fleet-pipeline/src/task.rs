//! Execution task and result types

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use fleet_core::types::{AgentRef, TaskPriority};

/// One unit of work handed to the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecutionTask {
    pub task_id: String,
    /// Target agent
    pub agent: AgentRef,
    pub input: Value,
    #[serde(default)]
    pub priority: TaskPriority,
    /// Deadline for the remote call in milliseconds
    pub timeout_ms: u64,
    /// Task ids this one chains after (sequential bookkeeping only)
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl AgentExecutionTask {
    pub fn new(agent: AgentRef, input: Value) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            agent,
            input,
            priority: TaskPriority::Normal,
            timeout_ms: fleet_core::config::DEFAULT_TASK_TIMEOUT_MS,
            dependencies: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn after(mut self, task_id: impl Into<String>) -> Self {
        self.dependencies.push(task_id.into());
        self
    }
}

/// Per-task timing metrics
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TaskMetrics {
    /// Enqueue to dispatch
    pub queue_time_ms: u64,
    /// Dispatch to completion
    pub processing_time_ms: u64,
    /// Equal to processing time for a single remote call
    pub response_time_ms: u64,
}

/// Outcome of one task; produced exactly once, consumed exactly once
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecutionResult {
    pub task_id: String,
    pub success: bool,
    pub output: Value,
    #[serde(default)]
    pub error: Option<String>,
    pub metrics: TaskMetrics,
}

impl AgentExecutionResult {
    pub fn success(task_id: impl Into<String>, output: Value, metrics: TaskMetrics) -> Self {
        Self {
            task_id: task_id.into(),
            success: true,
            output,
            error: None,
            metrics,
        }
    }

    pub fn failure(task_id: impl Into<String>, error: impl Into<String>, metrics: TaskMetrics) -> Self {
        Self {
            task_id: task_id.into(),
            success: false,
            output: Value::Null,
            error: Some(error.into()),
            metrics,
        }
    }
}

/// Aggregated metrics for one batch (one step's worth of tasks)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchMetrics {
    pub total_tasks: usize,
    pub successful_tasks: usize,
    pub failed_tasks: usize,
    pub avg_queue_time_ms: f64,
    pub avg_processing_time_ms: f64,
    pub max_processing_time_ms: u64,
}

impl BatchMetrics {
    /// Compute batch metrics from individual task results
    pub fn from_results(results: &[AgentExecutionResult]) -> Self {
        if results.is_empty() {
            return Self::default();
        }

        let successful_tasks = results.iter().filter(|r| r.success).count();
        let total_queue: u64 = results.iter().map(|r| r.metrics.queue_time_ms).sum();
        let total_processing: u64 = results.iter().map(|r| r.metrics.processing_time_ms).sum();
        let max_processing = results
            .iter()
            .map(|r| r.metrics.processing_time_ms)
            .max()
            .unwrap_or(0);

        Self {
            total_tasks: results.len(),
            successful_tasks,
            failed_tasks: results.len() - successful_tasks,
            avg_queue_time_ms: total_queue as f64 / results.len() as f64,
            avg_processing_time_ms: total_processing as f64 / results.len() as f64,
            max_processing_time_ms: max_processing,
        }
    }
}

/// Result of a step-level pipeline entry point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineExecutionResult {
    pub success: bool,
    pub output: Value,
    pub execution_time_ms: u64,
    /// Agent ids that performed work for this step
    pub agents_used: Vec<String>,
    pub performance_metrics: BatchMetrics,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_batch_metrics() {
        let results = vec![
            AgentExecutionResult::success(
                "t1",
                json!({}),
                TaskMetrics {
                    queue_time_ms: 10,
                    processing_time_ms: 100,
                    response_time_ms: 100,
                },
            ),
            AgentExecutionResult::failure(
                "t2",
                "boom",
                TaskMetrics {
                    queue_time_ms: 30,
                    processing_time_ms: 300,
                    response_time_ms: 300,
                },
            ),
        ];

        let batch = BatchMetrics::from_results(&results);
        assert_eq!(batch.total_tasks, 2);
        assert_eq!(batch.successful_tasks, 1);
        assert_eq!(batch.failed_tasks, 1);
        assert!((batch.avg_queue_time_ms - 20.0).abs() < f64::EPSILON);
        assert_eq!(batch.max_processing_time_ms, 300);
    }

    #[test]
    fn test_batch_metrics_empty() {
        let batch = BatchMetrics::from_results(&[]);
        assert_eq!(batch.total_tasks, 0);
        assert_eq!(batch.max_processing_time_ms, 0);
    }
}
