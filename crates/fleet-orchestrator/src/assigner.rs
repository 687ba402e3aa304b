//! Agent Assigner - wraps the external discovery interface
//!
//! Given a step's required capabilities and type, returns the ranked agents
//! the step will use: one for single-agent (and conditional) steps, every
//! ranked candidate for parallel and sequential steps.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use fleet_core::traits::AgentDiscovery;
use fleet_core::types::{AgentRef, DiscoveryQuery};
use fleet_core::workflow::{StepType, WorkflowStep};
use fleet_core::{Error, Result};

pub struct AgentAssigner {
    discovery: Arc<dyn AgentDiscovery>,
}

impl AgentAssigner {
    pub fn new(discovery: Arc<dyn AgentDiscovery>) -> Self {
        Self { discovery }
    }

    /// Assign agents for a step. Agentless step types get an empty list.
    pub async fn assign(
        &self,
        step: &WorkflowStep,
        context_hints: &HashMap<String, Value>,
    ) -> Result<Vec<AgentRef>> {
        if !step.uses_agents() {
            return Ok(Vec::new());
        }

        let mut query = DiscoveryQuery::new(
            step.required_capabilities.clone(),
            step.step_type.as_str(),
        );
        query.context_hints = context_hints.clone();

        let result = self.discovery.discover(query).await?;
        if result.agents.is_empty() {
            return Err(Error::agent_unavailable(format!(
                "No agents eligible for step '{}'",
                step.id
            )));
        }

        let agents = match step.step_type {
            StepType::SingleAgent | StepType::Conditional { .. } => {
                result.agents.into_iter().take(1).collect()
            }
            StepType::ParallelAgents | StepType::SequentialAgents => result.agents,
            _ => Vec::new(),
        };

        debug!(
            step_id = %step.id,
            step_type = %step.step_type.as_str(),
            agent_count = agents.len(),
            "Assigned agents"
        );

        Ok(agents)
    }
}
