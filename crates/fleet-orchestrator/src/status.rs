//! Aggregate orchestration status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fleet_core::fault::{ErrorSeverity, WorkflowError};

use crate::execution::{ExecutionStatus, WorkflowExecution};

/// Compact view of one execution for the status surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub execution_id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    pub completed_steps: usize,
    pub failed_steps: usize,
}

impl From<&WorkflowExecution> for ExecutionSummary {
    fn from(exec: &WorkflowExecution) -> Self {
        Self {
            execution_id: exec.execution_id.clone(),
            workflow_id: exec.workflow_id.clone(),
            status: exec.status,
            started_at: exec.started_at,
            duration_ms: exec.metrics.duration_ms,
            completed_steps: exec.metrics.completed_steps,
            failed_steps: exec.metrics.failed_steps,
        }
    }
}

/// Aggregate counts and rates across all retained executions
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OrchestrationStatus {
    pub registered_workflows: usize,
    pub total_executions: usize,
    pub active_executions: usize,
    pub completed_executions: usize,
    pub failed_executions: usize,
    pub cancelled_executions: usize,
    /// Completed / finished, in [0, 1]
    pub completion_rate: f64,
    /// Completed steps / attempted steps, in [0, 1]
    pub step_success_rate: f64,
    /// Widest level dispatched by any execution
    pub peak_concurrency: usize,
    pub recent_executions: Vec<ExecutionSummary>,
    /// High/critical errors from executions still in flight
    pub active_errors: Vec<WorkflowError>,
}

impl OrchestrationStatus {
    /// Build the aggregate from the retained execution set
    pub fn from_executions(
        registered_workflows: usize,
        executions: &[&WorkflowExecution],
        max_recent: usize,
    ) -> Self {
        let total_executions = executions.len();
        let active_executions = executions
            .iter()
            .filter(|e| !e.status.is_terminal())
            .count();
        let completed_executions = executions
            .iter()
            .filter(|e| e.status == ExecutionStatus::Completed)
            .count();
        let failed_executions = executions
            .iter()
            .filter(|e| e.status == ExecutionStatus::Failed)
            .count();
        let cancelled_executions = executions
            .iter()
            .filter(|e| e.status == ExecutionStatus::Cancelled)
            .count();

        let finished = completed_executions + failed_executions + cancelled_executions;
        let completion_rate = if finished == 0 {
            0.0
        } else {
            completed_executions as f64 / finished as f64
        };

        let steps_completed: usize = executions.iter().map(|e| e.metrics.completed_steps).sum();
        let steps_failed: usize = executions.iter().map(|e| e.metrics.failed_steps).sum();
        let attempted = steps_completed + steps_failed;
        let step_success_rate = if attempted == 0 {
            0.0
        } else {
            steps_completed as f64 / attempted as f64
        };

        let peak_concurrency = executions
            .iter()
            .map(|e| e.metrics.peak_concurrency)
            .max()
            .unwrap_or(0);

        let mut recent: Vec<&&WorkflowExecution> = executions.iter().collect();
        recent.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        let recent_executions = recent
            .into_iter()
            .take(max_recent)
            .map(|e| ExecutionSummary::from(*e))
            .collect();

        let active_errors = executions
            .iter()
            .filter(|e| !e.status.is_terminal())
            .flat_map(|e| e.errors.values())
            .filter(|err| err.severity >= ErrorSeverity::High)
            .cloned()
            .collect();

        Self {
            registered_workflows,
            total_executions,
            active_executions,
            completed_executions,
            failed_executions,
            cancelled_executions,
            completion_rate,
            step_success_rate,
            peak_concurrency,
            recent_executions,
            active_errors,
        }
    }
}
