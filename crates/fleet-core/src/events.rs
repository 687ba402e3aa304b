//! Orchestration events for the write-only analytics sink

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fault::WorkflowError;

/// Event emitted as orchestration state changes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestrationEvent {
    WorkflowRegistered {
        workflow_id: String,
    },
    ExecutionStarted {
        execution_id: String,
        workflow_id: String,
    },
    StepCompleted {
        execution_id: String,
        step_id: String,
        duration_ms: u64,
    },
    StepFailed {
        execution_id: String,
        step_id: String,
        error: WorkflowError,
    },
    StepSkipped {
        execution_id: String,
        step_id: String,
        reason: String,
    },
    RecoveryApplied {
        execution_id: String,
        step_id: String,
        strategy_id: String,
        action: String,
    },
    ExecutionCompleted {
        execution_id: String,
        workflow_id: String,
        success: bool,
        duration_ms: u64,
    },
    ExecutionCancelled {
        execution_id: String,
    },
}

/// Envelope pairing an event with its emission time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub event: OrchestrationEvent,
    pub emitted_at: DateTime<Utc>,
}

impl EventRecord {
    pub fn new(event: OrchestrationEvent) -> Self {
        Self {
            event,
            emitted_at: Utc::now(),
        }
    }
}
