//! Workflow definition types
//!
//! A workflow is a DAG of typed steps with an execution-wide error policy.
//! Definitions are immutable once registered; re-registration under the
//! same id overwrites the prior version.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::types::Capability;

/// Workflow definition (serializable)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Description
    pub description: String,
    /// Ordered step definitions
    pub steps: Vec<WorkflowStep>,
    /// Execution-wide error policy
    #[serde(default)]
    pub error_handling: ErrorHandlingPolicy,
    /// Global execution timeout in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Tags for discovery
    #[serde(default)]
    pub tags: Vec<String>,
    /// Version
    pub version: String,
}

impl WorkflowDefinition {
    /// Create a new workflow definition
    pub fn new(id: &str, name: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            steps: Vec::new(),
            error_handling: ErrorHandlingPolicy::default(),
            timeout_ms: None,
            tags: Vec::new(),
            version: "1.0.0".to_string(),
        }
    }

    /// Add a step
    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Set the error policy
    pub fn with_error_handling(mut self, policy: ErrorHandlingPolicy) -> Self {
        self.error_handling = policy;
        self
    }

    /// Look up a step by id
    pub fn step(&self, step_id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// Number of steps that depend on the given step
    pub fn dependent_count(&self, step_id: &str) -> usize {
        self.steps
            .iter()
            .filter(|s| s.dependencies.iter().any(|d| d == step_id))
            .count()
    }
}

/// One unit of work in a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Step id (unique within the workflow)
    pub id: String,
    /// How many agents the step uses and how their outputs combine
    pub step_type: StepType,
    /// Capabilities an agent must carry to be eligible
    #[serde(default)]
    pub required_capabilities: Vec<Capability>,
    /// Step ids that must resolve before this step runs
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// In-place retry policy, applied before recovery strategies
    #[serde(default)]
    pub retry_config: Option<RetryConfig>,
    /// Per-step timeout in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl WorkflowStep {
    pub fn new(id: &str, step_type: StepType) -> Self {
        Self {
            id: id.to_string(),
            step_type,
            required_capabilities: Vec::new(),
            dependencies: Vec::new(),
            retry_config: None,
            timeout_ms: None,
        }
    }

    pub fn with_capabilities(mut self, capabilities: Vec<Capability>) -> Self {
        self.required_capabilities = capabilities;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<&str>) -> Self {
        self.dependencies = dependencies.into_iter().map(String::from).collect();
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry_config = Some(retry);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Whether this step dispatches work to agents at all
    pub fn uses_agents(&self) -> bool {
        matches!(
            self.step_type,
            StepType::SingleAgent
                | StepType::ParallelAgents
                | StepType::SequentialAgents
                | StepType::Conditional { .. }
        )
    }
}

/// Step type, carrying only the fields each form needs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepType {
    /// One agent, pass-through success/failure
    SingleAgent,
    /// N agents run concurrently; outputs aggregate
    ParallelAgents,
    /// N agents run in a chain; each output feeds the next input
    SequentialAgents,
    /// Dispatches its single-agent work only when a context key matches
    Conditional {
        context_key: String,
        equals: Value,
    },
    /// Agentless: folds dependency outputs into one object keyed by step id
    Merge,
    /// Agentless: projects its input through select/rename rules
    Transform {
        #[serde(default)]
        select: Vec<String>,
        #[serde(default)]
        rename: HashMap<String, String>,
    },
}

impl StepType {
    /// Wire name of the step type
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::SingleAgent => "single_agent",
            StepType::ParallelAgents => "parallel_agents",
            StepType::SequentialAgents => "sequential_agents",
            StepType::Conditional { .. } => "conditional",
            StepType::Merge => "merge",
            StepType::Transform { .. } => "transform",
        }
    }
}

/// In-place retry policy for a step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Execution-wide error policy
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ErrorHandlingPolicy {
    #[serde(default)]
    pub on_step_failure: StepFailurePolicy,
    /// Required when `on_step_failure` is `fallback`
    #[serde(default)]
    pub fallback_workflow: Option<String>,
}

/// What to do when a step fails after retries and recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepFailurePolicy {
    /// Abort the whole execution immediately
    #[default]
    Stop,
    /// Mark the step failed and proceed to the next level
    Continue,
    /// Restart the failed step once more at workflow level
    Retry,
    /// Execute the configured fallback workflow
    Fallback,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_type_serde_tags() {
        let step = WorkflowStep::new("s1", StepType::SingleAgent);
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["step_type"]["type"], "single_agent");

        let parsed: WorkflowStep = serde_json::from_value(serde_json::json!({
            "id": "t1",
            "step_type": {"type": "transform", "select": ["summary"]}
        }))
        .unwrap();
        match parsed.step_type {
            StepType::Transform { select, .. } => assert_eq!(select, vec!["summary"]),
            other => panic!("unexpected step type: {:?}", other),
        }
    }

    #[test]
    fn test_dependent_count() {
        let def = WorkflowDefinition::new("wf", "Test", "")
            .with_step(WorkflowStep::new("a", StepType::SingleAgent))
            .with_step(WorkflowStep::new("b", StepType::SingleAgent).with_dependencies(vec!["a"]))
            .with_step(WorkflowStep::new("c", StepType::SingleAgent).with_dependencies(vec!["a"]));

        assert_eq!(def.dependent_count("a"), 2);
        assert_eq!(def.dependent_count("b"), 0);
    }
}
