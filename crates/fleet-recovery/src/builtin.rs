//! Built-in recovery strategies
//!
//! Registered by `RecoveryEngine::with_defaults` in priority order:
//! alternative agent, timeout extension, capability relaxation, step
//! decomposition (extension point), graceful degradation.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use fleet_core::config::{DEFAULT_TASK_TIMEOUT_MS, MAX_STEP_TIMEOUT_MS};
use fleet_core::fault::WorkflowErrorKind;
use fleet_core::traits::AgentDiscovery;
use fleet_core::types::DiscoveryQuery;
use fleet_core::workflow::StepType;

use crate::strategy::{RecoveryContext, RecoveryResult, RecoveryStrategy};

/// Minimum success rate used when re-querying with relaxed capabilities
const RELAXED_MIN_SUCCESS_RATE: f64 = 0.6;

/// How much a capability precision floor drops per relaxation
const PRECISION_RELAXATION: f64 = 0.2;

/// Precision floor below which relaxation stops
const MIN_PRECISION_FLOOR: f64 = 0.5;

/// Re-query discovery excluding the failed agent and substitute the
/// best-ranked alternative.
pub struct AlternativeAgentStrategy {
    discovery: Arc<dyn AgentDiscovery>,
}

impl AlternativeAgentStrategy {
    pub fn new(discovery: Arc<dyn AgentDiscovery>) -> Self {
        Self { discovery }
    }
}

#[async_trait]
impl RecoveryStrategy for AlternativeAgentStrategy {
    fn id(&self) -> &str {
        "alternative_agent_selection"
    }

    fn priority(&self) -> u32 {
        1
    }

    fn applicable_kinds(&self) -> &[WorkflowErrorKind] {
        &[
            WorkflowErrorKind::AgentTimeout,
            WorkflowErrorKind::AgentUnavailable,
            WorkflowErrorKind::ExecutionFailed,
        ]
    }

    async fn attempt(&self, ctx: &RecoveryContext) -> RecoveryResult {
        let mut query = DiscoveryQuery::new(
            ctx.step.required_capabilities.clone(),
            ctx.step.step_type.as_str(),
        );
        if let Some(agent_id) = ctx
            .error
            .agent_id
            .clone()
            .or_else(|| ctx.assigned_agent.as_ref().map(|a| a.id.clone()))
        {
            query = query.excluding(agent_id);
        }

        match self.discovery.discover(query).await {
            Ok(result) => match result.agents.into_iter().next() {
                Some(agent) => {
                    debug!(step_id = %ctx.step.id, substitute = %agent.id, "Found alternative agent");
                    RecoveryResult::alternative_agent(
                        agent,
                        format!("Substituting agent for step {}", ctx.step.id),
                    )
                }
                None => RecoveryResult::failed("No alternative agent available"),
            },
            Err(e) => RecoveryResult::failed(format!("Agent discovery failed: {}", e)),
        }
    }
}

/// Double the step timeout, up to a hard ceiling.
pub struct TimeoutExtensionStrategy {
    max_timeout_ms: u64,
}

impl TimeoutExtensionStrategy {
    pub fn new() -> Self {
        Self {
            max_timeout_ms: MAX_STEP_TIMEOUT_MS,
        }
    }

    pub fn with_ceiling(max_timeout_ms: u64) -> Self {
        Self { max_timeout_ms }
    }
}

impl Default for TimeoutExtensionStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecoveryStrategy for TimeoutExtensionStrategy {
    fn id(&self) -> &str {
        "timeout_extension"
    }

    fn priority(&self) -> u32 {
        2
    }

    fn applicable_kinds(&self) -> &[WorkflowErrorKind] {
        &[WorkflowErrorKind::AgentTimeout]
    }

    async fn attempt(&self, ctx: &RecoveryContext) -> RecoveryResult {
        let current = ctx.step.timeout_ms.unwrap_or(DEFAULT_TASK_TIMEOUT_MS);
        if current >= self.max_timeout_ms {
            return RecoveryResult::failed(format!(
                "Step timeout already at ceiling ({}ms)",
                self.max_timeout_ms
            ));
        }

        let extended = (current * 2).min(self.max_timeout_ms);
        let mut step = ctx.step.clone();
        step.timeout_ms = Some(extended);

        RecoveryResult::retry_with_step(
            step,
            format!("Extended step timeout {}ms -> {}ms", current, extended),
        )
    }
}

/// Relax capability requirements and re-query with a lowered success-rate
/// threshold.
pub struct CapabilityRelaxationStrategy {
    discovery: Arc<dyn AgentDiscovery>,
}

impl CapabilityRelaxationStrategy {
    pub fn new(discovery: Arc<dyn AgentDiscovery>) -> Self {
        Self { discovery }
    }
}

#[async_trait]
impl RecoveryStrategy for CapabilityRelaxationStrategy {
    fn id(&self) -> &str {
        "capability_relaxation"
    }

    fn priority(&self) -> u32 {
        3
    }

    fn applicable_kinds(&self) -> &[WorkflowErrorKind] {
        &[
            WorkflowErrorKind::CapabilityMismatch,
            WorkflowErrorKind::AgentUnavailable,
        ]
    }

    async fn attempt(&self, ctx: &RecoveryContext) -> RecoveryResult {
        let mut relaxed = ctx.step.required_capabilities.clone();
        for capability in &mut relaxed {
            capability.version = None;
            if let Some(precision) = capability.min_precision {
                capability.min_precision =
                    Some((precision - PRECISION_RELAXATION).max(MIN_PRECISION_FLOOR));
            }
            capability.required = false;
        }

        let query = DiscoveryQuery::new(relaxed.clone(), ctx.step.step_type.as_str())
            .with_min_success_rate(RELAXED_MIN_SUCCESS_RATE);

        match self.discovery.discover(query).await {
            Ok(result) if !result.agents.is_empty() => {
                let mut step = ctx.step.clone();
                step.required_capabilities = relaxed;
                let best = result.agents.into_iter().next();
                debug!(step_id = %ctx.step.id, "Relaxed capabilities found eligible agents");

                let mut recovery = RecoveryResult::retry_with_step(
                    step,
                    format!("Relaxed capability requirements for step {}", ctx.step.id),
                );
                recovery.alternative_agent = best;
                recovery
            }
            Ok(_) => RecoveryResult::failed("No agents eligible even after capability relaxation"),
            Err(e) => RecoveryResult::failed(format!("Agent discovery failed: {}", e)),
        }
    }
}

/// Extension point for splitting a failed step into smaller units.
///
/// Not implemented; always fails so the chain moves on.
pub struct StepDecompositionStrategy;

#[async_trait]
impl RecoveryStrategy for StepDecompositionStrategy {
    fn id(&self) -> &str {
        "step_decomposition"
    }

    fn priority(&self) -> u32 {
        4
    }

    fn applicable_kinds(&self) -> &[WorkflowErrorKind] {
        &[
            WorkflowErrorKind::ExecutionFailed,
            WorkflowErrorKind::ResourceExhausted,
        ]
    }

    async fn attempt(&self, _ctx: &RecoveryContext) -> RecoveryResult {
        RecoveryResult::failed("Step decomposition not implemented")
    }
}

/// Skip a step judged non-critical instead of failing the execution.
pub struct GracefulDegradationStrategy {
    max_dependents: usize,
}

impl GracefulDegradationStrategy {
    pub fn new() -> Self {
        Self { max_dependents: 2 }
    }
}

impl Default for GracefulDegradationStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecoveryStrategy for GracefulDegradationStrategy {
    fn id(&self) -> &str {
        "graceful_degradation"
    }

    fn priority(&self) -> u32 {
        5
    }

    fn applicable_kinds(&self) -> &[WorkflowErrorKind] {
        &[
            WorkflowErrorKind::ExecutionFailed,
            WorkflowErrorKind::DependencyFailed,
        ]
    }

    async fn attempt(&self, ctx: &RecoveryContext) -> RecoveryResult {
        let critical_type = matches!(
            ctx.step.step_type,
            StepType::Merge | StepType::Conditional { .. }
        );
        if critical_type || ctx.dependent_count > self.max_dependents {
            return RecoveryResult::failed(format!(
                "Step {} is critical ({} dependents); cannot degrade",
                ctx.step.id, ctx.dependent_count
            ));
        }

        RecoveryResult::skip_step(format!(
            "Step {} judged non-critical; skipping",
            ctx.step.id
        ))
    }
}
