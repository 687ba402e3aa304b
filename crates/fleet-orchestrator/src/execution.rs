//! Workflow execution aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use fleet_core::fault::WorkflowError;

/// Status of one workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Created, not yet driving levels
    Pending,
    /// Currently executing
    Running,
    /// Completed successfully
    Completed,
    /// Failed
    Failed,
    /// Externally paused; honored at level boundaries
    Paused,
    /// Cancelled; not-yet-started steps will not dispatch
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Per-execution metrics, finalized when the run reaches a terminal status
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub duration_ms: Option<u64>,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub skipped_steps: usize,
    /// Distinct agent ids that performed work
    pub agents_used: Vec<String>,
    /// Widest level dispatched
    pub peak_concurrency: usize,
    pub recovery_attempts: u32,
}

/// One run of a workflow.
///
/// Mutated only by the task driving that execution; readers get clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub execution_id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    /// Step ids in completion order
    pub completed_steps: Vec<String>,
    pub failed_steps: Vec<String>,
    pub skipped_steps: Vec<String>,
    /// Step id -> output
    pub results: HashMap<String, Value>,
    /// Step id (or the synthetic `workflow_level` key) -> error
    pub errors: HashMap<String, WorkflowError>,
    /// Step id -> agent ids that worked on it
    pub agent_assignments: HashMap<String, Vec<String>>,
    /// Key/value bag seeded from caller input, enriched with step outputs
    pub context: HashMap<String, Value>,
    pub metrics: ExecutionMetrics,
}

/// Synthetic errors-map key for failures that terminate the whole execution
pub const WORKFLOW_LEVEL_KEY: &str = "workflow_level";

impl WorkflowExecution {
    pub fn new(workflow_id: &str, initial_context: HashMap<String, Value>, total_steps: usize) -> Self {
        Self {
            execution_id: Uuid::new_v4().to_string(),
            workflow_id: workflow_id.to_string(),
            status: ExecutionStatus::Pending,
            started_at: Utc::now(),
            ended_at: None,
            completed_steps: Vec::new(),
            failed_steps: Vec::new(),
            skipped_steps: Vec::new(),
            results: HashMap::new(),
            errors: HashMap::new(),
            agent_assignments: HashMap::new(),
            context: initial_context,
            metrics: ExecutionMetrics {
                total_steps,
                ..ExecutionMetrics::default()
            },
        }
    }

    /// Record a successful step; its output enriches the context
    pub fn record_step_success(&mut self, step_id: &str, output: Value) {
        self.completed_steps.push(step_id.to_string());
        self.context.insert(step_id.to_string(), output.clone());
        self.results.insert(step_id.to_string(), output);
        self.metrics.completed_steps += 1;
    }

    pub fn record_step_failure(&mut self, step_id: &str, error: WorkflowError) {
        self.failed_steps.push(step_id.to_string());
        self.errors.insert(step_id.to_string(), error);
        self.metrics.failed_steps += 1;
    }

    /// Record a synthetic skipped result
    pub fn record_step_skipped(&mut self, step_id: &str, reason: &str) {
        let marker = serde_json::json!({"skipped": true, "reason": reason});
        self.skipped_steps.push(step_id.to_string());
        self.results.insert(step_id.to_string(), marker);
        self.metrics.skipped_steps += 1;
    }

    pub fn record_assignment(&mut self, step_id: &str, agent_ids: Vec<String>) {
        for agent_id in &agent_ids {
            if !self.metrics.agents_used.contains(agent_id) {
                self.metrics.agents_used.push(agent_id.clone());
            }
        }
        self.agent_assignments.insert(step_id.to_string(), agent_ids);
    }

    /// Move to a terminal status and stamp duration
    pub fn finalize(&mut self, status: ExecutionStatus) {
        let now = Utc::now();
        self.status = status;
        self.ended_at = Some(now);
        self.metrics.duration_ms =
            Some((now - self.started_at).num_milliseconds().max(0) as u64);
    }

    /// Whether every step reached a terminal per-step state
    pub fn is_fully_resolved(&self) -> bool {
        self.metrics.completed_steps + self.metrics.failed_steps + self.metrics.skipped_steps
            >= self.metrics.total_steps
    }
}
