//! Error Recovery Engine - ordered strategy chain
//!
//! Filters registered strategies by the error kind, tries them in priority
//! order, and records a `RecoveryAttempt` for every invocation. The first
//! success wins; exhaustion yields a terminal fail-gracefully verdict.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use fleet_core::traits::AgentDiscovery;

use crate::builtin::{
    AlternativeAgentStrategy, CapabilityRelaxationStrategy, GracefulDegradationStrategy,
    StepDecompositionStrategy, TimeoutExtensionStrategy,
};
use crate::strategy::{RecoveryAttempt, RecoveryContext, RecoveryResult, RecoveryStrategy};

/// The recovery engine
pub struct RecoveryEngine {
    strategies: Vec<Arc<dyn RecoveryStrategy>>,
    /// Attempt history (ring buffer)
    attempts: RwLock<Vec<RecoveryAttempt>>,
    max_attempt_history: usize,
}

impl RecoveryEngine {
    /// Create an engine with no strategies registered
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
            attempts: RwLock::new(Vec::new()),
            max_attempt_history: 1000,
        }
    }

    /// Create an engine with the built-in strategy chain
    pub fn with_defaults(discovery: Arc<dyn AgentDiscovery>) -> Self {
        let mut engine = Self::new();
        engine.register(Arc::new(AlternativeAgentStrategy::new(discovery.clone())));
        engine.register(Arc::new(TimeoutExtensionStrategy::new()));
        engine.register(Arc::new(CapabilityRelaxationStrategy::new(discovery)));
        engine.register(Arc::new(StepDecompositionStrategy));
        engine.register(Arc::new(GracefulDegradationStrategy::new()));
        engine
    }

    /// Register a strategy; the registry stays sorted by priority
    pub fn register(&mut self, strategy: Arc<dyn RecoveryStrategy>) {
        self.strategies.push(strategy);
        self.strategies.sort_by_key(|s| s.priority());
    }

    pub fn strategy_count(&self) -> usize {
        self.strategies.len()
    }

    /// Run the chain for one step failure
    pub async fn recover(&self, ctx: &RecoveryContext) -> RecoveryResult {
        let applicable: Vec<&Arc<dyn RecoveryStrategy>> = self
            .strategies
            .iter()
            .filter(|s| s.applies_to(ctx.error.kind))
            .collect();

        if applicable.is_empty() {
            warn!(
                step_id = %ctx.step.id,
                kind = %ctx.error.kind,
                "No recovery strategy applies"
            );
            return RecoveryResult::failed(format!(
                "No recovery strategy applies to {} errors",
                ctx.error.kind
            ));
        }

        let total = applicable.len();
        for strategy in applicable {
            let started = Instant::now();
            let mut result = strategy.attempt(ctx).await;
            result.strategy_id = Some(strategy.id().to_string());
            let duration_ms = started.elapsed().as_millis() as u64;

            self.record_attempt(RecoveryAttempt {
                strategy_id: strategy.id().to_string(),
                action: result.action,
                success: result.success,
                duration_ms,
                execution_id: ctx.execution_id.clone(),
                step_id: ctx.step.id.clone(),
                timestamp: Utc::now(),
            })
            .await;

            if result.success {
                info!(
                    step_id = %ctx.step.id,
                    strategy = %strategy.id(),
                    action = %result.action,
                    "Recovery succeeded"
                );
                return result;
            }

            debug!(
                step_id = %ctx.step.id,
                strategy = %strategy.id(),
                reason = %result.message,
                "Recovery strategy failed, trying next"
            );
        }

        RecoveryResult::failed(format!(
            "All {} applicable recovery strategies exhausted for {} error on step {}",
            total, ctx.error.kind, ctx.step.id
        ))
    }

    async fn record_attempt(&self, attempt: RecoveryAttempt) {
        let mut attempts = self.attempts.write().await;
        attempts.push(attempt);
        if attempts.len() > self.max_attempt_history {
            let overflow = attempts.len() - self.max_attempt_history;
            attempts.drain(0..overflow);
        }
    }

    /// Recent recovery attempts, newest first
    pub async fn recent_attempts(&self, limit: usize) -> Vec<RecoveryAttempt> {
        let attempts = self.attempts.read().await;
        attempts.iter().rev().take(limit).cloned().collect()
    }
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fleet_core::fault::{WorkflowError, WorkflowErrorKind};
    use fleet_core::types::{AgentRef, DiscoveryQuery, DiscoveryResult};
    use fleet_core::workflow::{StepType, WorkflowStep};
    use fleet_core::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDiscovery {
        agents: Vec<AgentRef>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl fleet_core::traits::AgentDiscovery for CountingDiscovery {
        async fn discover(&self, query: DiscoveryQuery) -> Result<DiscoveryResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let excluded = query.performance.exclude_agents;
            Ok(DiscoveryResult {
                agents: self
                    .agents
                    .iter()
                    .filter(|a| !excluded.contains(&a.id))
                    .cloned()
                    .collect(),
                recommended_strategy: None,
            })
        }
    }

    fn timeout_ctx() -> RecoveryContext {
        let step = WorkflowStep::new("s1", StepType::SingleAgent).with_timeout_ms(10_000);
        RecoveryContext {
            error: WorkflowError::new(WorkflowErrorKind::AgentTimeout, "s1", "agent timed out")
                .with_agent("agent-1"),
            step,
            execution_id: "exec-1".into(),
            workflow_id: "wf-1".into(),
            assigned_agent: Some(AgentRef::new("agent-1", "Primary")),
            previous_attempts: 0,
            dependent_count: 0,
        }
    }

    #[tokio::test]
    async fn test_chain_order_first_success_short_circuits() {
        // Alternative agent (priority 1) succeeds; timeout extension
        // (priority 2) must never run, so only one attempt is recorded.
        let discovery = Arc::new(CountingDiscovery {
            agents: vec![
                AgentRef::new("agent-1", "Primary"),
                AgentRef::new("agent-2", "Backup"),
            ],
            calls: AtomicUsize::new(0),
        });
        let engine = RecoveryEngine::with_defaults(discovery.clone());

        let result = engine.recover(&timeout_ctx()).await;

        assert!(result.success);
        assert_eq!(result.action, crate::strategy::RecoveryAction::AlternativeAgent);
        assert_eq!(result.strategy_id.as_deref(), Some("alternative_agent_selection"));
        assert_eq!(discovery.calls.load(Ordering::SeqCst), 1);

        let attempts = engine.recent_attempts(10).await;
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].strategy_id, "alternative_agent_selection");
    }

    #[tokio::test]
    async fn test_chain_falls_through_to_timeout_extension() {
        // No alternative agents exist, so priority 2 gets its turn.
        let discovery = Arc::new(CountingDiscovery {
            agents: vec![AgentRef::new("agent-1", "Primary")],
            calls: AtomicUsize::new(0),
        });
        let engine = RecoveryEngine::with_defaults(discovery);

        let result = engine.recover(&timeout_ctx()).await;

        assert!(result.success);
        assert_eq!(result.action, crate::strategy::RecoveryAction::Retry);
        assert_eq!(result.modified_step.unwrap().timeout_ms, Some(20_000));

        let attempts = engine.recent_attempts(10).await;
        assert_eq!(attempts.len(), 2);
        // Newest first
        assert_eq!(attempts[0].strategy_id, "timeout_extension");
        assert_eq!(attempts[1].strategy_id, "alternative_agent_selection");
    }

    #[tokio::test]
    async fn test_no_applicable_strategy_is_terminal() {
        let discovery = Arc::new(CountingDiscovery {
            agents: vec![],
            calls: AtomicUsize::new(0),
        });
        let engine = RecoveryEngine::with_defaults(discovery);

        let mut ctx = timeout_ctx();
        ctx.error = WorkflowError::new(
            WorkflowErrorKind::ConfigurationError,
            "s1",
            "bad configuration",
        );

        let result = engine.recover(&ctx).await;
        assert!(!result.success);
        assert_eq!(result.action, crate::strategy::RecoveryAction::FailGracefully);
        assert!(!result.continue_execution);
    }

    #[tokio::test]
    async fn test_exhaustion_message_names_error_kind() {
        // execution_failed applies to alternative agent (no agents),
        // decomposition (always fails), degradation (merge step = critical).
        let discovery = Arc::new(CountingDiscovery {
            agents: vec![],
            calls: AtomicUsize::new(0),
        });
        let engine = RecoveryEngine::with_defaults(discovery);

        let step = WorkflowStep::new("m1", StepType::Merge);
        let ctx = RecoveryContext {
            error: WorkflowError::new(WorkflowErrorKind::ExecutionFailed, "m1", "boom"),
            step,
            execution_id: "exec-1".into(),
            workflow_id: "wf-1".into(),
            assigned_agent: None,
            previous_attempts: 0,
            dependent_count: 0,
        };

        let result = engine.recover(&ctx).await;
        assert!(!result.success);
        assert!(result.message.contains("exhausted"));
        assert!(result.message.contains("execution_failed"));
        assert_eq!(engine.recent_attempts(10).await.len(), 3);
    }
}
