//! Recovery strategy trait and result types

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fleet_core::fault::{WorkflowError, WorkflowErrorKind};
use fleet_core::types::AgentRef;
use fleet_core::workflow::WorkflowStep;

/// What a successful recovery tells the orchestrator to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    Retry,
    AlternativeAgent,
    FallbackWorkflow,
    SkipStep,
    FailGracefully,
}

impl RecoveryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryAction::Retry => "retry",
            RecoveryAction::AlternativeAgent => "alternative_agent",
            RecoveryAction::FallbackWorkflow => "fallback_workflow",
            RecoveryAction::SkipStep => "skip_step",
            RecoveryAction::FailGracefully => "fail_gracefully",
        }
    }
}

impl std::fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Verdict of one recovery attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryResult {
    pub success: bool,
    pub action: RecoveryAction,
    /// Stamped by the engine with the strategy that produced this verdict
    #[serde(default)]
    pub strategy_id: Option<String>,
    #[serde(default)]
    pub alternative_agent: Option<AgentRef>,
    #[serde(default)]
    pub modified_step: Option<WorkflowStep>,
    #[serde(default)]
    pub fallback_workflow: Option<String>,
    #[serde(default)]
    pub delay_ms: Option<u64>,
    pub continue_execution: bool,
    pub message: String,
}

impl RecoveryResult {
    /// Re-dispatch the step as-is
    pub fn retry(message: impl Into<String>) -> Self {
        Self {
            success: true,
            action: RecoveryAction::Retry,
            strategy_id: None,
            alternative_agent: None,
            modified_step: None,
            fallback_workflow: None,
            delay_ms: None,
            continue_execution: true,
            message: message.into(),
        }
    }

    /// Re-dispatch a modified step
    pub fn retry_with_step(step: WorkflowStep, message: impl Into<String>) -> Self {
        Self {
            modified_step: Some(step),
            ..Self::retry(message)
        }
    }

    /// Re-dispatch with a substitute agent
    pub fn alternative_agent(agent: AgentRef, message: impl Into<String>) -> Self {
        Self {
            success: true,
            action: RecoveryAction::AlternativeAgent,
            strategy_id: None,
            alternative_agent: Some(agent),
            modified_step: None,
            fallback_workflow: None,
            delay_ms: None,
            continue_execution: true,
            message: message.into(),
        }
    }

    /// Record a synthetic skipped result and proceed
    pub fn skip_step(message: impl Into<String>) -> Self {
        Self {
            success: true,
            action: RecoveryAction::SkipStep,
            strategy_id: None,
            alternative_agent: None,
            modified_step: None,
            fallback_workflow: None,
            delay_ms: None,
            continue_execution: true,
            message: message.into(),
        }
    }

    /// Absorb the failure through a fallback workflow
    pub fn fallback_workflow(workflow_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            action: RecoveryAction::FallbackWorkflow,
            strategy_id: None,
            alternative_agent: None,
            modified_step: None,
            fallback_workflow: Some(workflow_id.into()),
            delay_ms: None,
            continue_execution: true,
            message: message.into(),
        }
    }

    /// This strategy could not recover
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            action: RecoveryAction::FailGracefully,
            strategy_id: None,
            alternative_agent: None,
            modified_step: None,
            fallback_workflow: None,
            delay_ms: None,
            continue_execution: false,
            message: message.into(),
        }
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }
}

/// Everything a strategy may consult when deciding how to recover
#[derive(Debug, Clone)]
pub struct RecoveryContext {
    pub error: WorkflowError,
    pub step: WorkflowStep,
    pub execution_id: String,
    pub workflow_id: String,
    /// Agent the failed dispatch was assigned to
    pub assigned_agent: Option<AgentRef>,
    /// Recovery attempts already made for this step failure
    pub previous_attempts: u32,
    /// Number of steps in the definition that consume this step's output
    pub dependent_count: usize,
}

/// Record of one strategy invocation, kept regardless of outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub strategy_id: String,
    pub action: RecoveryAction,
    pub success: bool,
    pub duration_ms: u64,
    pub execution_id: String,
    pub step_id: String,
    pub timestamp: DateTime<Utc>,
}

/// A pluggable, priority-ordered handler for a class of step failures.
///
/// Strategies are stateless and registered once at engine construction;
/// the active set does not change during an execution.
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    /// Stable identifier used in attempt records
    fn id(&self) -> &str;

    /// Lower priority is tried first
    fn priority(&self) -> u32;

    /// Error kinds this strategy can act on
    fn applicable_kinds(&self) -> &[WorkflowErrorKind];

    fn applies_to(&self, kind: WorkflowErrorKind) -> bool {
        self.applicable_kinds().contains(&kind)
    }

    /// Attempt recovery; failure is reported through the result, not Err
    async fn attempt(&self, ctx: &RecoveryContext) -> RecoveryResult;
}
