//! fleet-orchestrator: Workflow orchestration engine
//!
//! Features:
//! - Registration-time DAG validation with cycle reporting
//! - Topological leveling; levels run in sequence, steps concurrently
//! - Step dispatch through the priority-queued execution pipeline
//! - In-place retries, recovery strategy chain, workflow error policies
//! - Execution aggregates and an orchestration status surface

pub mod assigner;
pub mod execution;
pub mod leveling;
pub mod orchestrator;
pub mod status;
pub mod validate;

pub use assigner::AgentAssigner;
pub use execution::{ExecutionMetrics, ExecutionStatus, WorkflowExecution, WORKFLOW_LEVEL_KEY};
pub use leveling::compute_levels;
pub use orchestrator::{ExecuteOptions, Orchestrator};
pub use status::{ExecutionSummary, OrchestrationStatus};
pub use validate::{validate_definition, IssueSeverity, ValidationIssue, ValidationReport};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::execution::{ExecutionStatus, WorkflowExecution};
    pub use super::orchestrator::{ExecuteOptions, Orchestrator};
    pub use super::validate::ValidationReport;
    pub use fleet_core::workflow::{
        ErrorHandlingPolicy, RetryConfig, StepFailurePolicy, StepType, WorkflowDefinition,
        WorkflowStep,
    };
}
