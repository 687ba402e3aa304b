//! Common types used across fleetd

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Reference to a remote agent, as returned by discovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Discovery ranking score, higher is better
    #[serde(default)]
    pub score: f64,
    /// Historical success rate in [0, 1]
    #[serde(default)]
    pub success_rate: f64,
}

impl AgentRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            capabilities: Vec::new(),
            score: 0.0,
            success_rate: 0.0,
        }
    }

    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }
}

/// A capability requirement on a workflow step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    /// Exact version pin, if any
    #[serde(default)]
    pub version: Option<String>,
    /// Minimum precision/quality floor in [0, 1]
    #[serde(default)]
    pub min_precision: Option<f64>,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl Capability {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            min_precision: None,
            required: true,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_min_precision(mut self, precision: f64) -> Self {
        self.min_precision = Some(precision);
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// Dispatch priority for agent execution tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPriority::Critical => write!(f, "critical"),
            TaskPriority::High => write!(f, "high"),
            TaskPriority::Normal => write!(f, "normal"),
            TaskPriority::Low => write!(f, "low"),
        }
    }
}

/// Performance requirements attached to a discovery query
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PerformanceRequirements {
    /// Minimum historical success rate in [0, 1]
    #[serde(default)]
    pub min_success_rate: f64,
    /// Agents that must not be returned
    #[serde(default)]
    pub exclude_agents: Vec<String>,
}

/// Query sent to the external discovery interface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryQuery {
    pub required_capabilities: Vec<Capability>,
    pub task_type: String,
    #[serde(default)]
    pub context_hints: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub performance: PerformanceRequirements,
}

impl DiscoveryQuery {
    pub fn new(required_capabilities: Vec<Capability>, task_type: impl Into<String>) -> Self {
        Self {
            required_capabilities,
            task_type: task_type.into(),
            context_hints: HashMap::new(),
            performance: PerformanceRequirements::default(),
        }
    }

    pub fn excluding(mut self, agent_id: impl Into<String>) -> Self {
        self.performance.exclude_agents.push(agent_id.into());
        self
    }

    pub fn with_min_success_rate(mut self, rate: f64) -> Self {
        self.performance.min_success_rate = rate;
        self
    }
}

/// Result of a discovery query, agents ordered best-first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub agents: Vec<AgentRef>,
    #[serde(default)]
    pub recommended_strategy: Option<String>,
}

impl DiscoveryResult {
    pub fn empty() -> Self {
        Self {
            agents: Vec::new(),
            recommended_strategy: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_defaults() {
        let cap = Capability::new("text_processing");
        assert!(cap.required);
        assert!(cap.version.is_none());

        let json: Capability = serde_json::from_str(r#"{"name": "code_generation"}"#).unwrap();
        assert!(json.required);
    }

    #[test]
    fn test_priority_serde() {
        let p: TaskPriority = serde_json::from_str("\"critical\"").unwrap();
        assert_eq!(p, TaskPriority::Critical);
        assert_eq!(serde_json::to_string(&TaskPriority::Low).unwrap(), "\"low\"");
    }
}
