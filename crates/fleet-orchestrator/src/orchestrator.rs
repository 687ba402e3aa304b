//! Workflow Orchestrator - validates, levels, and drives workflows
//!
//! The orchestrator owns registered definitions and execution aggregates.
//! `execute_workflow` drives one run level by level: steps within a level
//! dispatch concurrently through the execution pipeline, and level k+1
//! never starts before level k fully resolves, recovery included.
//!
//! Step failures are handled locally: in-place retries first, then the
//! recovery engine's strategy chain, then the workflow's error policy.
//! Only exhaustion of all three surfaces a critical workflow-level error.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use fleet_core::config::{OrchestratorConfig, DEFAULT_TASK_TIMEOUT_MS};
use fleet_core::events::OrchestrationEvent;
use fleet_core::fault::{ErrorSeverity, WorkflowError, WorkflowErrorKind};
use fleet_core::traits::{AgentDiscovery, EventSink};
use fleet_core::types::{AgentRef, TaskPriority};
use fleet_core::workflow::{StepFailurePolicy, StepType, WorkflowDefinition, WorkflowStep};
use fleet_core::{Error, Result};
use fleet_pipeline::{AgentExecutionTask, ExecutionPipeline, PipelineExecutionResult};
use fleet_recovery::{retry_delay_ms, RecoveryAction, RecoveryContext, RecoveryEngine};

use crate::assigner::AgentAssigner;
use crate::execution::{ExecutionStatus, WorkflowExecution, WORKFLOW_LEVEL_KEY};
use crate::leveling::compute_levels;
use crate::status::OrchestrationStatus;
use crate::validate::{validate_definition, ValidationReport};

/// Poll interval while an execution sits in the paused state
const PAUSE_POLL_MS: u64 = 50;

/// Per-execution options supplied by the caller
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Priority applied to every task this execution submits
    pub priority: TaskPriority,
    /// Hints forwarded to agent discovery
    pub context_hints: HashMap<String, Value>,
}

/// How a step ended, as seen by the level driver
enum StepVerdict {
    Completed(Value),
    Failed(WorkflowError),
    Skipped(String),
}

/// Result of driving one step to a terminal per-step state
struct StepOutcome {
    step_id: String,
    verdict: StepVerdict,
    agents: Vec<String>,
    /// Abort the whole execution after recording this outcome
    abort: bool,
    duration_ms: u64,
    recovery_attempts: u32,
    /// Extra context entries to merge (fallback workflow results)
    merged_context: HashMap<String, Value>,
}

impl StepOutcome {
    fn new(
        step_id: &str,
        started: Instant,
        verdict: StepVerdict,
        agents: &[AgentRef],
        abort: bool,
        recovery_attempts: u32,
    ) -> Self {
        Self {
            step_id: step_id.to_string(),
            verdict,
            agents: agents.iter().map(|a| a.id.clone()).collect(),
            abort,
            duration_ms: started.elapsed().as_millis() as u64,
            recovery_attempts,
            merged_context: HashMap::new(),
        }
    }

    fn with_merged_context(mut self, merged: HashMap<String, Value>) -> Self {
        self.merged_context = merged;
        self
    }
}

/// Immutable view of execution state a level's steps compute inputs from
struct LevelSnapshot {
    results: HashMap<String, Value>,
    context: HashMap<String, Value>,
}

enum Gate {
    Proceed,
    Cancelled,
}

/// The workflow orchestrator
pub struct Orchestrator {
    config: OrchestratorConfig,
    definitions: Arc<RwLock<HashMap<String, WorkflowDefinition>>>,
    executions: Arc<RwLock<HashMap<String, WorkflowExecution>>>,
    pipeline: Arc<ExecutionPipeline>,
    recovery: Arc<RecoveryEngine>,
    assigner: AgentAssigner,
    sink: Option<Arc<dyn EventSink>>,
}

impl Orchestrator {
    pub fn new(
        pipeline: Arc<ExecutionPipeline>,
        recovery: Arc<RecoveryEngine>,
        discovery: Arc<dyn AgentDiscovery>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            config,
            definitions: Arc::new(RwLock::new(HashMap::new())),
            executions: Arc::new(RwLock::new(HashMap::new())),
            pipeline,
            recovery,
            assigner: AgentAssigner::new(discovery),
            sink: None,
        }
    }

    /// Attach a write-only analytics sink
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Validate and store a workflow definition.
    ///
    /// Stores only when no error-severity issue exists; warnings do not
    /// block. Re-registration overwrites the prior version.
    pub async fn register_workflow(&self, definition: WorkflowDefinition) -> ValidationReport {
        let report = validate_definition(&definition, &self.config.known_capabilities);

        if report.is_valid() {
            info!(workflow_id = %definition.id, steps = definition.steps.len(), "Registering workflow");
            self.emit(OrchestrationEvent::WorkflowRegistered {
                workflow_id: definition.id.clone(),
            })
            .await;
            let mut definitions = self.definitions.write().await;
            definitions.insert(definition.id.clone(), definition);
        } else {
            warn!(
                workflow_id = %definition.id,
                errors = report.errors().count(),
                "Workflow rejected by validation"
            );
        }

        report
    }

    /// List registered workflow definitions
    pub async fn list_workflows(&self) -> Vec<WorkflowDefinition> {
        let definitions = self.definitions.read().await;
        definitions.values().cloned().collect()
    }

    /// Execute a registered workflow to a terminal status.
    ///
    /// Rejects immediately when the in-flight execution count is at the
    /// configured ceiling; this is backpressure, not a queued wait.
    pub async fn execute_workflow(
        &self,
        workflow_id: &str,
        initial_context: HashMap<String, Value>,
        options: ExecuteOptions,
    ) -> Result<WorkflowExecution> {
        let definition = {
            let definitions = self.definitions.read().await;
            definitions
                .get(workflow_id)
                .cloned()
                .ok_or_else(|| Error::WorkflowNotFound(workflow_id.to_string()))?
        };

        {
            let executions = self.executions.read().await;
            let active = executions
                .values()
                .filter(|e| !e.status.is_terminal())
                .count();
            if active >= self.config.max_concurrent_executions {
                return Err(Error::capacity(format!(
                    "{} executions in flight (ceiling {})",
                    active, self.config.max_concurrent_executions
                )));
            }
        }

        let levels = compute_levels(&definition)?;

        let mut execution =
            WorkflowExecution::new(&definition.id, initial_context, definition.steps.len());
        execution.status = ExecutionStatus::Running;
        let execution_id = execution.execution_id.clone();

        {
            let mut executions = self.executions.write().await;
            executions.insert(execution_id.clone(), execution);
        }

        info!(
            workflow_id = %definition.id,
            execution_id = %execution_id,
            levels = levels.len(),
            "Starting workflow execution"
        );
        self.emit(OrchestrationEvent::ExecutionStarted {
            execution_id: execution_id.clone(),
            workflow_id: definition.id.clone(),
        })
        .await;

        let deadline = definition
            .timeout_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));

        let mut aborted = false;
        for level in &levels {
            match self.wait_at_level_boundary(&execution_id).await {
                Gate::Proceed => {}
                Gate::Cancelled => break,
            }

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    let error = WorkflowError::new(
                        WorkflowErrorKind::AgentTimeout,
                        WORKFLOW_LEVEL_KEY,
                        format!(
                            "Workflow timeout of {}ms exceeded",
                            definition.timeout_ms.unwrap_or_default()
                        ),
                    )
                    .with_severity(ErrorSeverity::Critical);
                    let mut executions = self.executions.write().await;
                    if let Some(exec) = executions.get_mut(&execution_id) {
                        exec.errors.insert(WORKFLOW_LEVEL_KEY.to_string(), error);
                    }
                    aborted = true;
                    break;
                }
            }

            let snapshot = {
                let executions = self.executions.read().await;
                let exec = executions
                    .get(&execution_id)
                    .ok_or_else(|| Error::ExecutionNotFound(execution_id.clone()))?;
                LevelSnapshot {
                    results: exec.results.clone(),
                    context: exec.context.clone(),
                }
            };

            let outcomes = join_all(
                level
                    .iter()
                    .filter_map(|step_id| definition.step(step_id).cloned())
                    .map(|step| {
                        self.run_step(&definition, step, &snapshot, &options, &execution_id)
                    }),
            )
            .await;

            let mut events = Vec::new();
            {
                let mut executions = self.executions.write().await;
                let Some(exec) = executions.get_mut(&execution_id) else {
                    break;
                };
                if exec.status == ExecutionStatus::Cancelled {
                    // Already-dispatched results are discarded on cancellation
                    debug!(execution_id = %execution_id, "Discarding level results after cancellation");
                    break;
                }

                exec.metrics.peak_concurrency = exec.metrics.peak_concurrency.max(level.len());

                for outcome in outcomes {
                    exec.metrics.recovery_attempts += outcome.recovery_attempts;
                    if !outcome.agents.is_empty() {
                        exec.record_assignment(&outcome.step_id, outcome.agents);
                    }
                    for (key, value) in outcome.merged_context {
                        exec.context.insert(key, value);
                    }

                    match outcome.verdict {
                        StepVerdict::Completed(output) => {
                            exec.record_step_success(&outcome.step_id, output);
                            events.push(OrchestrationEvent::StepCompleted {
                                execution_id: execution_id.clone(),
                                step_id: outcome.step_id,
                                duration_ms: outcome.duration_ms,
                            });
                        }
                        StepVerdict::Failed(error) => {
                            events.push(OrchestrationEvent::StepFailed {
                                execution_id: execution_id.clone(),
                                step_id: outcome.step_id.clone(),
                                error: error.clone(),
                            });
                            if outcome.abort {
                                let workflow_error = error
                                    .clone()
                                    .with_severity(ErrorSeverity::Critical)
                                    .not_retryable();
                                exec.errors
                                    .insert(WORKFLOW_LEVEL_KEY.to_string(), workflow_error);
                                aborted = true;
                            }
                            exec.record_step_failure(&outcome.step_id, error);
                        }
                        StepVerdict::Skipped(reason) => {
                            exec.record_step_skipped(&outcome.step_id, &reason);
                            events.push(OrchestrationEvent::StepSkipped {
                                execution_id: execution_id.clone(),
                                step_id: outcome.step_id,
                                reason,
                            });
                        }
                    }
                }
            }

            for event in events {
                self.emit(event).await;
            }

            if aborted {
                break;
            }
        }

        let result = {
            let mut executions = self.executions.write().await;
            let exec = executions
                .get_mut(&execution_id)
                .ok_or_else(|| Error::ExecutionNotFound(execution_id.clone()))?;
            if !exec.status.is_terminal() {
                let status = if aborted {
                    ExecutionStatus::Failed
                } else {
                    ExecutionStatus::Completed
                };
                exec.finalize(status);
            }
            exec.clone()
        };

        info!(
            workflow_id = %definition.id,
            execution_id = %execution_id,
            status = %result.status,
            duration_ms = ?result.metrics.duration_ms,
            "Workflow execution finished"
        );
        self.emit(OrchestrationEvent::ExecutionCompleted {
            execution_id: execution_id.clone(),
            workflow_id: definition.id.clone(),
            success: result.status == ExecutionStatus::Completed,
            duration_ms: result.metrics.duration_ms.unwrap_or(0),
        })
        .await;

        self.trim_history().await;

        Ok(result)
    }

    /// Cancel an execution. Not-yet-started steps will not dispatch;
    /// already-dispatched tasks run to completion and their results are
    /// discarded.
    pub async fn cancel_execution(&self, execution_id: &str) -> Result<()> {
        let mut executions = self.executions.write().await;
        let exec = executions
            .get_mut(execution_id)
            .ok_or_else(|| Error::ExecutionNotFound(execution_id.to_string()))?;

        if exec.status.is_terminal() {
            return Err(Error::execution(format!(
                "Execution {} already {}",
                execution_id, exec.status
            )));
        }

        exec.finalize(ExecutionStatus::Cancelled);
        info!(execution_id = %execution_id, "Execution cancelled");
        drop(executions);

        self.emit(OrchestrationEvent::ExecutionCancelled {
            execution_id: execution_id.to_string(),
        })
        .await;
        Ok(())
    }

    /// Pause a running execution; honored at the next level boundary
    pub async fn pause_execution(&self, execution_id: &str) -> Result<()> {
        let mut executions = self.executions.write().await;
        let exec = executions
            .get_mut(execution_id)
            .ok_or_else(|| Error::ExecutionNotFound(execution_id.to_string()))?;

        if exec.status != ExecutionStatus::Running {
            return Err(Error::execution(format!(
                "Cannot pause execution in status {}",
                exec.status
            )));
        }
        exec.status = ExecutionStatus::Paused;
        info!(execution_id = %execution_id, "Execution paused");
        Ok(())
    }

    /// Resume a paused execution
    pub async fn resume_execution(&self, execution_id: &str) -> Result<()> {
        let mut executions = self.executions.write().await;
        let exec = executions
            .get_mut(execution_id)
            .ok_or_else(|| Error::ExecutionNotFound(execution_id.to_string()))?;

        if exec.status != ExecutionStatus::Paused {
            return Err(Error::execution(format!(
                "Cannot resume execution in status {}",
                exec.status
            )));
        }
        exec.status = ExecutionStatus::Running;
        info!(execution_id = %execution_id, "Execution resumed");
        Ok(())
    }

    /// Full aggregate for one execution
    pub async fn get_execution_details(&self, execution_id: &str) -> Option<WorkflowExecution> {
        let executions = self.executions.read().await;
        executions.get(execution_id).cloned()
    }

    /// Aggregate counts, rates, and recent executions
    pub async fn get_orchestration_status(&self) -> OrchestrationStatus {
        let definitions = self.definitions.read().await;
        let executions = self.executions.read().await;
        let all: Vec<&WorkflowExecution> = executions.values().collect();
        OrchestrationStatus::from_executions(
            definitions.len(),
            &all,
            self.config.max_recent_executions,
        )
    }

    // === Internal ===

    /// Block at a level boundary while paused; report cancellation
    async fn wait_at_level_boundary(&self, execution_id: &str) -> Gate {
        loop {
            let status = {
                let executions = self.executions.read().await;
                executions.get(execution_id).map(|e| e.status)
            };
            match status {
                Some(ExecutionStatus::Paused) => {
                    tokio::time::sleep(Duration::from_millis(PAUSE_POLL_MS)).await;
                }
                Some(ExecutionStatus::Cancelled) | None => return Gate::Cancelled,
                _ => return Gate::Proceed,
            }
        }
    }

    /// Drive one step to a terminal per-step state: dispatch, in-place
    /// retries, recovery chain, then the workflow error policy.
    async fn run_step(
        &self,
        definition: &WorkflowDefinition,
        step: WorkflowStep,
        snapshot: &LevelSnapshot,
        options: &ExecuteOptions,
        execution_id: &str,
    ) -> StepOutcome {
        let started = Instant::now();
        let step_id = step.id.clone();
        let input = step_input(&step, snapshot);

        // Agentless step types resolve without touching the pipeline
        match &step.step_type {
            StepType::Merge => {
                let merged = merge_dependency_outputs(&step, snapshot);
                return StepOutcome::new(
                    &step_id,
                    started,
                    StepVerdict::Completed(merged),
                    &[],
                    false,
                    0,
                );
            }
            StepType::Transform { select, rename } => {
                let transformed = apply_transform(&input, select, rename);
                return StepOutcome::new(
                    &step_id,
                    started,
                    StepVerdict::Completed(transformed),
                    &[],
                    false,
                    0,
                );
            }
            StepType::Conditional { context_key, equals } => {
                if snapshot.context.get(context_key) != Some(equals) {
                    return StepOutcome::new(
                        &step_id,
                        started,
                        StepVerdict::Skipped(format!(
                            "condition not met: context['{}'] != {}",
                            context_key, equals
                        )),
                        &[],
                        false,
                        0,
                    );
                }
            }
            _ => {}
        }

        let mut step = step;
        let mut recovery_attempts = 0u32;
        let mut agents = match self.assigner.assign(&step, &options.context_hints).await {
            Ok(agents) => agents,
            Err(e) => {
                debug!(step_id = %step_id, error = %e, "Agent assignment failed");
                Vec::new()
            }
        };

        // Initial dispatch
        let mut error = match self
            .execute_once(&step, &agents, &input, &snapshot.context, options.priority)
            .await
        {
            Ok(output) => {
                return StepOutcome::new(
                    &step_id,
                    started,
                    StepVerdict::Completed(output),
                    &agents,
                    false,
                    0,
                )
            }
            Err(error) => error,
        };

        // In-place retries with backoff come before recovery strategies
        if let Some(retry) = step.retry_config.clone() {
            let mut attempt = 0;
            while attempt < retry.max_retries {
                attempt += 1;
                let delay_ms = retry_delay_ms(&retry, attempt);
                debug!(
                    step_id = %step_id,
                    attempt = attempt,
                    delay_ms = delay_ms,
                    "Retrying step in place"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;

                match self
                    .execute_once(&step, &agents, &input, &snapshot.context, options.priority)
                    .await
                {
                    Ok(output) => {
                        return StepOutcome::new(
                            &step_id,
                            started,
                            StepVerdict::Completed(output),
                            &agents,
                            false,
                            0,
                        )
                    }
                    Err(e) => error = e,
                }
            }

            // Retry exhaustion is terminal: downstream handling sees a
            // non-retryable execution failure, not the transient kind.
            let mut exhausted = WorkflowError::new(
                WorkflowErrorKind::ExecutionFailed,
                &step_id,
                format!(
                    "Retries exhausted after {} attempts: {}",
                    retry.max_retries, error.message
                ),
            )
            .with_context(
                "original_kind",
                Value::String(error.kind.as_str().to_string()),
            )
            .not_retryable();
            if let Some(agent) = agents.first() {
                exhausted = exhausted.with_agent(agent.id.clone());
            }
            error = exhausted;
        }

        // Recovery strategy chain
        let ctx = RecoveryContext {
            error: error.clone(),
            step: step.clone(),
            execution_id: execution_id.to_string(),
            workflow_id: definition.id.clone(),
            assigned_agent: agents.first().cloned(),
            previous_attempts: recovery_attempts,
            dependent_count: definition.dependent_count(&step_id),
        };
        let verdict = self.recovery.recover(&ctx).await;
        recovery_attempts += 1;

        if verdict.success {
            self.emit(OrchestrationEvent::RecoveryApplied {
                execution_id: execution_id.to_string(),
                step_id: step_id.clone(),
                strategy_id: verdict.strategy_id.clone().unwrap_or_default(),
                action: verdict.action.as_str().to_string(),
            })
            .await;

            match verdict.action {
                RecoveryAction::SkipStep => {
                    return StepOutcome::new(
                        &step_id,
                        started,
                        StepVerdict::Skipped(verdict.message),
                        &agents,
                        false,
                        recovery_attempts,
                    );
                }
                RecoveryAction::Retry => {
                    if let Some(modified) = verdict.modified_step {
                        step = modified;
                    }
                    if let Some(agent) = verdict.alternative_agent {
                        if agents.is_empty() {
                            agents.push(agent);
                        } else {
                            agents[0] = agent;
                        }
                    } else if agents.is_empty() {
                        // Relaxed requirements may make assignment possible now
                        agents = self
                            .assigner
                            .assign(&step, &options.context_hints)
                            .await
                            .unwrap_or_default();
                    }
                    if let Some(delay_ms) = verdict.delay_ms {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    }
                    match self
                        .execute_once(&step, &agents, &input, &snapshot.context, options.priority)
                        .await
                    {
                        Ok(output) => {
                            return StepOutcome::new(
                                &step_id,
                                started,
                                StepVerdict::Completed(output),
                                &agents,
                                false,
                                recovery_attempts,
                            )
                        }
                        Err(e) => error = e,
                    }
                }
                RecoveryAction::AlternativeAgent => {
                    if let Some(agent) = verdict.alternative_agent {
                        if agents.is_empty() {
                            agents.push(agent);
                        } else {
                            agents[0] = agent;
                        }
                    }
                    match self
                        .execute_once(&step, &agents, &input, &snapshot.context, options.priority)
                        .await
                    {
                        Ok(output) => {
                            return StepOutcome::new(
                                &step_id,
                                started,
                                StepVerdict::Completed(output),
                                &agents,
                                false,
                                recovery_attempts,
                            )
                        }
                        Err(e) => error = e,
                    }
                }
                RecoveryAction::FallbackWorkflow => {
                    if let Some(fallback_id) = verdict.fallback_workflow {
                        match self.run_fallback(&fallback_id, snapshot, options).await {
                            Ok((output, merged)) => {
                                return StepOutcome::new(
                                    &step_id,
                                    started,
                                    StepVerdict::Completed(output),
                                    &agents,
                                    false,
                                    recovery_attempts,
                                )
                                .with_merged_context(merged)
                            }
                            Err(e) => {
                                error = WorkflowError::new(
                                    WorkflowErrorKind::ExecutionFailed,
                                    &step_id,
                                    format!("Fallback workflow '{}' failed: {}", fallback_id, e),
                                )
                                .not_retryable();
                            }
                        }
                    }
                }
                RecoveryAction::FailGracefully => {}
            }
        }

        // Retries and recovery both exhausted: apply the workflow policy
        match definition.error_handling.on_step_failure {
            StepFailurePolicy::Stop => StepOutcome::new(
                &step_id,
                started,
                StepVerdict::Failed(error),
                &agents,
                true,
                recovery_attempts,
            ),
            StepFailurePolicy::Continue => {
                warn!(step_id = %step_id, "Step failed; continuing per policy");
                StepOutcome::new(
                    &step_id,
                    started,
                    StepVerdict::Failed(error),
                    &agents,
                    false,
                    recovery_attempts,
                )
            }
            StepFailurePolicy::Retry => {
                // One workflow-level restart of the failed step
                match self
                    .execute_once(&step, &agents, &input, &snapshot.context, options.priority)
                    .await
                {
                    Ok(output) => StepOutcome::new(
                        &step_id,
                        started,
                        StepVerdict::Completed(output),
                        &agents,
                        false,
                        recovery_attempts,
                    ),
                    Err(e) => StepOutcome::new(
                        &step_id,
                        started,
                        StepVerdict::Failed(e),
                        &agents,
                        true,
                        recovery_attempts,
                    ),
                }
            }
            StepFailurePolicy::Fallback => {
                let Some(fallback_id) = definition.error_handling.fallback_workflow.clone() else {
                    let config_error = WorkflowError::new(
                        WorkflowErrorKind::ConfigurationError,
                        &step_id,
                        "Fallback policy configured without a fallback workflow id",
                    );
                    return StepOutcome::new(
                        &step_id,
                        started,
                        StepVerdict::Failed(config_error),
                        &agents,
                        true,
                        recovery_attempts,
                    );
                };
                match self.run_fallback(&fallback_id, snapshot, options).await {
                    Ok((output, merged)) => StepOutcome::new(
                        &step_id,
                        started,
                        StepVerdict::Completed(output),
                        &agents,
                        false,
                        recovery_attempts,
                    )
                    .with_merged_context(merged),
                    Err(e) => {
                        let fallback_error = WorkflowError::new(
                            WorkflowErrorKind::ExecutionFailed,
                            &step_id,
                            format!("Fallback workflow '{}' failed: {}", fallback_id, e),
                        )
                        .not_retryable();
                        StepOutcome::new(
                            &step_id,
                            started,
                            StepVerdict::Failed(fallback_error),
                            &agents,
                            true,
                            recovery_attempts,
                        )
                    }
                }
            }
        }
    }

    /// One dispatch through the pipeline entry point matching the step type
    async fn execute_once(
        &self,
        step: &WorkflowStep,
        agents: &[AgentRef],
        input: &Value,
        context: &HashMap<String, Value>,
        priority: TaskPriority,
    ) -> std::result::Result<Value, WorkflowError> {
        if agents.is_empty() {
            return Err(WorkflowError::new(
                WorkflowErrorKind::AgentUnavailable,
                &step.id,
                format!("No agents available for step '{}'", step.id),
            ));
        }

        let timeout_ms = step.timeout_ms.unwrap_or(DEFAULT_TASK_TIMEOUT_MS);
        let make_task = |agent: &AgentRef| {
            AgentExecutionTask::new(agent.clone(), input.clone())
                .with_priority(priority)
                .with_timeout_ms(timeout_ms)
        };

        let result: PipelineExecutionResult = match step.step_type {
            StepType::SingleAgent | StepType::Conditional { .. } => {
                self.pipeline
                    .execute_single_agent_step(make_task(&agents[0]), context.clone())
                    .await
            }
            StepType::ParallelAgents => {
                self.pipeline
                    .execute_parallel_agents_step(
                        agents.iter().map(make_task).collect(),
                        context.clone(),
                    )
                    .await
            }
            StepType::SequentialAgents => {
                self.pipeline
                    .execute_sequential_agents_step(
                        agents.iter().map(make_task).collect(),
                        context.clone(),
                    )
                    .await
            }
            _ => {
                return Err(WorkflowError::new(
                    WorkflowErrorKind::ExecutionFailed,
                    &step.id,
                    format!(
                        "Step type {} does not dispatch agents",
                        step.step_type.as_str()
                    ),
                ))
            }
        };

        if result.success {
            Ok(result.output)
        } else {
            let message = result
                .errors
                .first()
                .cloned()
                .unwrap_or_else(|| format!("Step '{}' failed without error detail", step.id));
            let mut error = WorkflowError::from_failure(&step.id, message);
            if let Some(agent) = agents.first() {
                error = error.with_agent(agent.id.clone());
            }
            Err(error)
        }
    }

    /// Execute a fallback workflow and shape its results for merging
    async fn run_fallback(
        &self,
        fallback_id: &str,
        snapshot: &LevelSnapshot,
        options: &ExecuteOptions,
    ) -> Result<(Value, HashMap<String, Value>)> {
        info!(fallback_workflow = %fallback_id, "Executing fallback workflow");
        let execution = self
            .execute_workflow_boxed(
                fallback_id.to_string(),
                snapshot.context.clone(),
                options.clone(),
            )
            .await?;

        if execution.status != ExecutionStatus::Completed {
            return Err(Error::execution(format!(
                "Fallback workflow '{}' ended {}",
                fallback_id, execution.status
            )));
        }

        let output = serde_json::json!({
            "fallback_workflow": fallback_id,
            "results": execution.results,
        });
        Ok((output, execution.results.into_iter().collect()))
    }

    /// Boxed indirection so fallback workflows can nest executions
    fn execute_workflow_boxed(
        &self,
        workflow_id: String,
        initial_context: HashMap<String, Value>,
        options: ExecuteOptions,
    ) -> Pin<Box<dyn Future<Output = Result<WorkflowExecution>> + Send + '_>> {
        Box::pin(async move {
            self.execute_workflow(&workflow_id, initial_context, options)
                .await
        })
    }

    /// Drop the oldest terminal executions beyond the retention cap
    async fn trim_history(&self) {
        let mut executions = self.executions.write().await;
        let cap = self.config.max_recent_executions;
        let mut terminal: Vec<(String, chrono::DateTime<chrono::Utc>)> = executions
            .values()
            .filter(|e| e.status.is_terminal())
            .map(|e| (e.execution_id.clone(), e.started_at))
            .collect();

        if terminal.len() > cap {
            terminal.sort_by_key(|(_, started_at)| *started_at);
            let excess = terminal.len() - cap;
            for (execution_id, _) in terminal.into_iter().take(excess) {
                executions.remove(&execution_id);
            }
        }
    }

    /// Emit to the sink; failures are logged and never propagate
    async fn emit(&self, event: OrchestrationEvent) {
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.record(event).await {
                warn!(error = %e, "Event sink write failed; continuing");
            }
        }
    }
}

/// Compute a step's input from its dependencies.
///
/// No dependencies: the context bag. One dependency: that step's output.
/// Multiple: a map of dependency id to output. A dependency that failed
/// under the `continue` policy contributes an explicit marker object.
fn step_input(step: &WorkflowStep, snapshot: &LevelSnapshot) -> Value {
    let dep_output = |dep: &String| {
        snapshot
            .results
            .get(dep)
            .cloned()
            .unwrap_or_else(|| serde_json::json!({ "dependency_failed": dep }))
    };

    match step.dependencies.len() {
        0 => Value::Object(snapshot.context.clone().into_iter().collect()),
        1 => dep_output(&step.dependencies[0]),
        _ => Value::Object(
            step.dependencies
                .iter()
                .map(|dep| (dep.clone(), dep_output(dep)))
                .collect(),
        ),
    }
}

/// Fold dependency outputs into one object keyed by step id
fn merge_dependency_outputs(step: &WorkflowStep, snapshot: &LevelSnapshot) -> Value {
    Value::Object(
        step.dependencies
            .iter()
            .map(|dep| {
                (
                    dep.clone(),
                    snapshot
                        .results
                        .get(dep)
                        .cloned()
                        .unwrap_or_else(|| serde_json::json!({ "dependency_failed": dep })),
                )
            })
            .collect(),
    )
}

/// Project an input object through select/rename rules
fn apply_transform(input: &Value, select: &[String], rename: &HashMap<String, String>) -> Value {
    match input.as_object() {
        Some(object) => {
            let mut projected = Map::new();
            for (key, value) in object {
                if !select.is_empty() && !select.contains(key) {
                    continue;
                }
                let target = rename.get(key).cloned().unwrap_or_else(|| key.clone());
                projected.insert(target, value.clone());
            }
            Value::Object(projected)
        }
        None => input.clone(),
    }
}
