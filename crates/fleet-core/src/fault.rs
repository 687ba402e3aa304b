//! Step failure taxonomy and classification
//!
//! A `WorkflowError` records one step failure. It is created when a step
//! execution fails or times out and never mutated afterwards; recovery
//! strategies consume it read-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Failure taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowErrorKind {
    AgentTimeout,
    AgentUnavailable,
    CapabilityMismatch,
    ExecutionFailed,
    ValidationFailed,
    ResourceExhausted,
    NetworkError,
    DependencyFailed,
    ConfigurationError,
    UnknownError,
}

impl WorkflowErrorKind {
    /// Wire name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowErrorKind::AgentTimeout => "agent_timeout",
            WorkflowErrorKind::AgentUnavailable => "agent_unavailable",
            WorkflowErrorKind::CapabilityMismatch => "capability_mismatch",
            WorkflowErrorKind::ExecutionFailed => "execution_failed",
            WorkflowErrorKind::ValidationFailed => "validation_failed",
            WorkflowErrorKind::ResourceExhausted => "resource_exhausted",
            WorkflowErrorKind::NetworkError => "network_error",
            WorkflowErrorKind::DependencyFailed => "dependency_failed",
            WorkflowErrorKind::ConfigurationError => "configuration_error",
            WorkflowErrorKind::UnknownError => "unknown_error",
        }
    }

    /// Whether the same operation is worth repeating for this kind
    pub fn default_retryable(&self) -> bool {
        matches!(
            self,
            WorkflowErrorKind::AgentTimeout
                | WorkflowErrorKind::AgentUnavailable
                | WorkflowErrorKind::NetworkError
                | WorkflowErrorKind::ResourceExhausted
        )
    }

    /// Whether recovery strategies can meaningfully act on this kind
    pub fn default_recoverable(&self) -> bool {
        !matches!(
            self,
            WorkflowErrorKind::ValidationFailed | WorkflowErrorKind::ConfigurationError
        )
    }
}

impl std::fmt::Display for WorkflowErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// Record of a single step failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowError {
    pub error_id: String,
    pub kind: WorkflowErrorKind,
    pub severity: ErrorSeverity,
    pub recoverable: bool,
    pub retryable: bool,
    pub step_id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl WorkflowError {
    /// Create an error of a known kind
    pub fn new(kind: WorkflowErrorKind, step_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_id: Uuid::new_v4().to_string(),
            kind,
            severity: ErrorSeverity::Medium,
            recoverable: kind.default_recoverable(),
            retryable: kind.default_retryable(),
            step_id: step_id.into(),
            agent_id: None,
            message: message.into(),
            context: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Create an error by classifying a raw failure message
    pub fn from_failure(step_id: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = classify_failure(&message);
        Self::new(kind, step_id, message)
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Override the retryable flag (retry exhaustion produces a terminal error)
    pub fn not_retryable(mut self) -> Self {
        self.retryable = false;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}

/// Classify a raw failure message into the taxonomy.
///
/// Substring heuristics; anything unrecognized is `execution_failed`.
pub fn classify_failure(message: &str) -> WorkflowErrorKind {
    let lower = message.to_lowercase();

    if lower.contains("timeout") || lower.contains("timed out") {
        WorkflowErrorKind::AgentTimeout
    } else if lower.contains("unavailable") || lower.contains("not found") {
        WorkflowErrorKind::AgentUnavailable
    } else if lower.contains("capability") || lower.contains("unsupported") {
        WorkflowErrorKind::CapabilityMismatch
    } else if lower.contains("network") || lower.contains("connection") {
        WorkflowErrorKind::NetworkError
    } else if lower.contains("resource") || lower.contains("memory") {
        WorkflowErrorKind::ResourceExhausted
    } else if lower.contains("validation") {
        WorkflowErrorKind::ValidationFailed
    } else if lower.contains("dependency") {
        WorkflowErrorKind::DependencyFailed
    } else {
        WorkflowErrorKind::ExecutionFailed
    }
}
