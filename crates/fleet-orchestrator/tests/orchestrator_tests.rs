//! Integration tests for the complete fleetd orchestration engine

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use fleet_core::config::{OrchestratorConfig, PipelineConfig};
use fleet_core::events::OrchestrationEvent;
use fleet_core::traits::{AgentDiscovery, AgentExecutor, EventSink};
use fleet_core::types::{AgentRef, Capability, DiscoveryQuery, DiscoveryResult};
use fleet_core::workflow::{
    ErrorHandlingPolicy, RetryConfig, StepFailurePolicy, StepType, WorkflowDefinition, WorkflowStep,
};
use fleet_core::Result;
use fleet_orchestrator::prelude::*;
use fleet_orchestrator::WORKFLOW_LEVEL_KEY;
use fleet_pipeline::ExecutionPipeline;
use fleet_recovery::RecoveryEngine;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("fleet_orchestrator=debug,fleet_pipeline=debug,fleet_recovery=debug")
        .try_init();
}

/// Discovery mock routing by the first required capability name
struct CapabilityDiscovery {
    pools: HashMap<String, Vec<AgentRef>>,
    default_pool: Vec<AgentRef>,
}

impl CapabilityDiscovery {
    fn with_default_pool(default_pool: Vec<AgentRef>) -> Self {
        Self {
            pools: HashMap::new(),
            default_pool,
        }
    }

    fn pool(mut self, capability: &str, agents: Vec<AgentRef>) -> Self {
        self.pools.insert(capability.to_string(), agents);
        self
    }
}

#[async_trait]
impl AgentDiscovery for CapabilityDiscovery {
    async fn discover(&self, query: DiscoveryQuery) -> Result<DiscoveryResult> {
        let pool = query
            .required_capabilities
            .first()
            .and_then(|c| self.pools.get(&c.name))
            .unwrap_or(&self.default_pool);

        let agents = pool
            .iter()
            .filter(|a| !query.performance.exclude_agents.contains(&a.id))
            .cloned()
            .collect();

        Ok(DiscoveryResult {
            agents,
            recommended_strategy: None,
        })
    }
}

/// Executor mock: logs calls, fails scripted agents, sleeps scripted delays
#[derive(Default)]
struct ScriptedExecutor {
    log: Mutex<Vec<(String, Value)>>,
    always_fail: HashMap<String, String>,
    transient_failures: Mutex<HashMap<String, u32>>,
    delays_ms: HashMap<String, u64>,
}

impl ScriptedExecutor {
    fn new() -> Self {
        Self::default()
    }

    fn always_failing(mut self, agent_id: &str, error: &str) -> Self {
        self.always_fail
            .insert(agent_id.to_string(), error.to_string());
        self
    }

    fn failing_times(self, agent_id: &str, times: u32) -> Self {
        self.transient_failures
            .try_lock()
            .unwrap()
            .insert(agent_id.to_string(), times);
        self
    }

    fn slow(mut self, agent_id: &str, delay_ms: u64) -> Self {
        self.delays_ms.insert(agent_id.to_string(), delay_ms);
        self
    }

    async fn calls(&self) -> Vec<(String, Value)> {
        self.log.lock().await.clone()
    }

    async fn call_count(&self, agent_id: &str) -> usize {
        self.log
            .lock()
            .await
            .iter()
            .filter(|(id, _)| id == agent_id)
            .count()
    }
}

#[async_trait]
impl AgentExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        agent_id: &str,
        input: Value,
        _context: &HashMap<String, Value>,
        _timeout_ms: u64,
    ) -> Result<Value> {
        self.log
            .lock()
            .await
            .push((agent_id.to_string(), input.clone()));

        if let Some(delay) = self.delays_ms.get(agent_id) {
            tokio::time::sleep(Duration::from_millis(*delay)).await;
        }

        if let Some(error) = self.always_fail.get(agent_id) {
            return Err(fleet_core::Error::execution(error.clone()));
        }

        let mut transient = self.transient_failures.lock().await;
        if let Some(remaining) = transient.get_mut(agent_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(fleet_core::Error::execution("network connection reset"));
            }
        }

        Ok(json!({"agent": agent_id, "input": input}))
    }
}

/// Sink that collects every event; optionally fails every write
struct CollectingSink {
    events: Mutex<Vec<OrchestrationEvent>>,
    fail_writes: bool,
}

impl CollectingSink {
    fn new(fail_writes: bool) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail_writes,
        }
    }
}

#[async_trait]
impl EventSink for CollectingSink {
    async fn record(&self, event: OrchestrationEvent) -> Result<()> {
        self.events.lock().await.push(event);
        if self.fail_writes {
            return Err(fleet_core::Error::internal("sink unavailable"));
        }
        Ok(())
    }
}

struct Harness {
    orchestrator: Orchestrator,
    executor: Arc<ScriptedExecutor>,
}

fn build_harness(executor: ScriptedExecutor, discovery: CapabilityDiscovery) -> Harness {
    build_harness_with_config(executor, discovery, OrchestratorConfig::default())
}

fn build_harness_with_config(
    executor: ScriptedExecutor,
    discovery: CapabilityDiscovery,
    config: OrchestratorConfig,
) -> Harness {
    init_tracing();
    let executor = Arc::new(executor);
    let discovery: Arc<dyn AgentDiscovery> = Arc::new(discovery);

    let pipeline_config = PipelineConfig {
        max_concurrent_agents: 8,
        tick_interval_ms: 10,
        parallel_success_threshold: 0.5,
        sequential_retry_positions: 2,
        default_task_timeout_ms: 5_000,
    };
    let pipeline = ExecutionPipeline::start(executor.clone(), pipeline_config);
    let recovery = Arc::new(RecoveryEngine::with_defaults(discovery.clone()));

    Harness {
        orchestrator: Orchestrator::new(pipeline, recovery, discovery, config),
        executor,
    }
}

fn default_pool() -> Vec<AgentRef> {
    vec![
        AgentRef::new("agent-1", "Primary").with_score(0.9),
        AgentRef::new("agent-2", "Backup").with_score(0.7),
        AgentRef::new("agent-3", "Spare").with_score(0.5),
    ]
}

fn diamond_workflow() -> WorkflowDefinition {
    WorkflowDefinition::new("diamond", "Diamond", "A -> (B, C) -> D")
        .with_step(WorkflowStep::new("a", StepType::SingleAgent))
        .with_step(WorkflowStep::new("b", StepType::SingleAgent).with_dependencies(vec!["a"]))
        .with_step(WorkflowStep::new("c", StepType::SingleAgent).with_dependencies(vec!["a"]))
        .with_step(WorkflowStep::new("d", StepType::SingleAgent).with_dependencies(vec!["b", "c"]))
}

#[tokio::test]
async fn end_to_end_diamond_completes_in_level_order() {
    let harness = build_harness(
        ScriptedExecutor::new(),
        CapabilityDiscovery::with_default_pool(default_pool()),
    );

    let report = harness.orchestrator.register_workflow(diamond_workflow()).await;
    assert!(report.is_valid());

    let execution = harness
        .orchestrator
        .execute_workflow("diamond", HashMap::new(), ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.completed_steps.len(), 4);
    assert_eq!(execution.completed_steps[0], "a");
    assert_eq!(execution.completed_steps[3], "d");
    // b and c in either relative order
    assert!(execution.completed_steps[1..3].contains(&"b".to_string()));
    assert!(execution.completed_steps[1..3].contains(&"c".to_string()));
    assert!(execution.metrics.peak_concurrency >= 2);
    assert!(execution.errors.is_empty());
    assert!(execution.metrics.duration_ms.is_some());
}

#[tokio::test]
async fn cyclic_workflow_is_rejected_and_not_stored() {
    let harness = build_harness(
        ScriptedExecutor::new(),
        CapabilityDiscovery::with_default_pool(default_pool()),
    );

    let cyclic = WorkflowDefinition::new("cyclic", "Cyclic", "")
        .with_step(WorkflowStep::new("a", StepType::SingleAgent).with_dependencies(vec!["b"]))
        .with_step(WorkflowStep::new("b", StepType::SingleAgent).with_dependencies(vec!["a"]));

    let report = harness.orchestrator.register_workflow(cyclic).await;
    assert!(!report.is_valid());
    assert!(report
        .errors()
        .any(|issue| issue.code == "circular_dependency"));

    let result = harness
        .orchestrator
        .execute_workflow("cyclic", HashMap::new(), ExecuteOptions::default())
        .await;
    assert!(matches!(result, Err(fleet_core::Error::WorkflowNotFound(_))));
}

#[tokio::test]
async fn unknown_capability_warns_but_registers() {
    let harness = build_harness(
        ScriptedExecutor::new(),
        CapabilityDiscovery::with_default_pool(default_pool()),
    );

    let def = WorkflowDefinition::new("odd-caps", "Odd", "").with_step(
        WorkflowStep::new("a", StepType::SingleAgent)
            .with_capabilities(vec![Capability::new("quantum_flux")]),
    );

    let report = harness.orchestrator.register_workflow(def).await;
    assert!(report.is_valid());
    assert!(report.warnings().any(|i| i.code == "invalid_capability"));
    assert_eq!(harness.orchestrator.list_workflows().await.len(), 1);
}

#[tokio::test]
async fn retry_exhaustion_produces_terminal_workflow_failure() {
    // agent-1 always fails; the step retries twice in place and exhausts.
    // Three dependents make the step critical, so graceful degradation
    // refuses to skip it and the stop policy aborts the execution.
    let harness = build_harness(
        ScriptedExecutor::new().always_failing("agent-1", "validation failed: bad payload"),
        CapabilityDiscovery::with_default_pool(vec![AgentRef::new("agent-1", "Only")]),
    );

    let def = WorkflowDefinition::new("retrying", "Retrying", "")
        .with_step(
            WorkflowStep::new("a", StepType::SingleAgent).with_retry(RetryConfig {
                max_retries: 2,
                base_delay_ms: 10,
                backoff_multiplier: 1.5,
            }),
        )
        .with_step(WorkflowStep::new("x", StepType::SingleAgent).with_dependencies(vec!["a"]))
        .with_step(WorkflowStep::new("y", StepType::SingleAgent).with_dependencies(vec!["a"]))
        .with_step(WorkflowStep::new("z", StepType::SingleAgent).with_dependencies(vec!["a"]));
    assert!(harness.orchestrator.register_workflow(def).await.is_valid());

    let execution = harness
        .orchestrator
        .execute_workflow("retrying", HashMap::new(), ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    // Initial dispatch + exactly 2 retries; dependents never ran
    assert_eq!(harness.executor.call_count("agent-1").await, 3);
    assert!(execution.completed_steps.is_empty());

    let step_error = &execution.errors["a"];
    assert!(!step_error.retryable);
    assert!(step_error.message.contains("Retries exhausted"));
    assert!(execution.errors.contains_key(WORKFLOW_LEVEL_KEY));
}

#[tokio::test]
async fn in_place_retry_recovers_from_transient_failure() {
    let harness = build_harness(
        ScriptedExecutor::new().failing_times("agent-1", 1),
        CapabilityDiscovery::with_default_pool(vec![AgentRef::new("agent-1", "Flaky")]),
    );

    let def = WorkflowDefinition::new("transient", "Transient", "").with_step(
        WorkflowStep::new("a", StepType::SingleAgent).with_retry(RetryConfig {
            max_retries: 2,
            base_delay_ms: 10,
            backoff_multiplier: 1.5,
        }),
    );
    assert!(harness.orchestrator.register_workflow(def).await.is_valid());

    let execution = harness
        .orchestrator
        .execute_workflow("transient", HashMap::new(), ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.completed_steps, vec!["a"]);
    // One failed dispatch, one successful retry
    assert_eq!(harness.executor.call_count("agent-1").await, 2);
    assert_eq!(execution.metrics.recovery_attempts, 0);
}

#[tokio::test]
async fn continue_policy_passes_failure_marker_downstream() {
    let harness = build_harness(
        ScriptedExecutor::new().always_failing("agent-1", "validation failed"),
        CapabilityDiscovery::with_default_pool(vec![AgentRef::new("agent-1", "Flaky")])
            .pool("text_processing", vec![AgentRef::new("agent-2", "Solid")]),
    );

    let def = WorkflowDefinition::new("tolerant", "Tolerant", "")
        .with_step(WorkflowStep::new("a", StepType::SingleAgent))
        .with_step(
            WorkflowStep::new("b", StepType::SingleAgent)
                .with_capabilities(vec![Capability::new("text_processing")])
                .with_dependencies(vec!["a"]),
        )
        .with_error_handling(ErrorHandlingPolicy {
            on_step_failure: StepFailurePolicy::Continue,
            fallback_workflow: None,
        });
    assert!(harness.orchestrator.register_workflow(def).await.is_valid());

    let execution = harness
        .orchestrator
        .execute_workflow("tolerant", HashMap::new(), ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.failed_steps, vec!["a"]);
    assert_eq!(execution.completed_steps, vec!["b"]);

    // b received the explicit dependency-failed marker, not missing input
    let calls = harness.executor.calls().await;
    let (_, b_input) = calls.iter().find(|(id, _)| id == "agent-2").unwrap();
    assert_eq!(b_input["dependency_failed"], "a");
}

#[tokio::test]
async fn recovery_substitutes_alternative_agent_on_timeout() {
    // agent-1 sleeps past the step timeout; the alternative-agent strategy
    // (priority 1) re-queries discovery and agent-2 completes the step.
    let harness = build_harness(
        ScriptedExecutor::new().slow("agent-1", 500),
        CapabilityDiscovery::with_default_pool(vec![
            AgentRef::new("agent-1", "Sleepy").with_score(0.9),
            AgentRef::new("agent-2", "Awake").with_score(0.8),
        ]),
    );

    let def = WorkflowDefinition::new("timeouts", "Timeouts", "")
        .with_step(WorkflowStep::new("a", StepType::SingleAgent).with_timeout_ms(60));
    assert!(harness.orchestrator.register_workflow(def).await.is_valid());

    let execution = harness
        .orchestrator
        .execute_workflow("timeouts", HashMap::new(), ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.results["a"]["agent"], "agent-2");
    assert!(execution.agent_assignments["a"].contains(&"agent-2".to_string()));
    assert_eq!(execution.metrics.recovery_attempts, 1);
}

#[tokio::test]
async fn graceful_degradation_skips_non_critical_step() {
    // Lone agent fails outright; no alternative exists and decomposition is
    // a stub, so graceful degradation skips the leaf step.
    let harness = build_harness(
        ScriptedExecutor::new().always_failing("agent-1", "internal assertion"),
        CapabilityDiscovery::with_default_pool(vec![AgentRef::new("agent-1", "Only")]),
    );

    let def = WorkflowDefinition::new("degradable", "Degradable", "")
        .with_step(WorkflowStep::new("a", StepType::SingleAgent));
    assert!(harness.orchestrator.register_workflow(def).await.is_valid());

    let execution = harness
        .orchestrator
        .execute_workflow("degradable", HashMap::new(), ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.skipped_steps, vec!["a"]);
    assert_eq!(execution.results["a"]["skipped"], json!(true));
    assert!(execution.failed_steps.is_empty());
}

#[tokio::test]
async fn parallel_step_aggregates_all_agents() {
    let harness = build_harness(
        ScriptedExecutor::new(),
        CapabilityDiscovery::with_default_pool(default_pool()),
    );

    let def = WorkflowDefinition::new("fanout", "Fanout", "")
        .with_step(WorkflowStep::new("p", StepType::ParallelAgents));
    assert!(harness.orchestrator.register_workflow(def).await.is_valid());

    let execution = harness
        .orchestrator
        .execute_workflow("fanout", HashMap::new(), ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.agent_assignments["p"].len(), 3);
    assert_eq!(execution.results["p"]["summary"]["agent_count"], 3);
}

#[tokio::test]
async fn merge_and_transform_steps_run_without_agents() {
    let harness = build_harness(
        ScriptedExecutor::new(),
        CapabilityDiscovery::with_default_pool(default_pool()),
    );

    let def = WorkflowDefinition::new("shaping", "Shaping", "")
        .with_step(WorkflowStep::new("a", StepType::SingleAgent))
        .with_step(WorkflowStep::new("b", StepType::SingleAgent))
        .with_step(WorkflowStep::new("m", StepType::Merge).with_dependencies(vec!["a", "b"]))
        .with_step(
            WorkflowStep::new(
                "t",
                StepType::Transform {
                    select: vec!["a".to_string()],
                    rename: HashMap::from([("a".to_string(), "first".to_string())]),
                },
            )
            .with_dependencies(vec!["m"]),
        );
    assert!(harness.orchestrator.register_workflow(def).await.is_valid());

    let execution = harness
        .orchestrator
        .execute_workflow("shaping", HashMap::new(), ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    // Merge folded both dependency outputs under their step ids
    assert_eq!(execution.results["m"]["a"]["agent"], "agent-1");
    assert_eq!(execution.results["m"]["b"]["agent"], "agent-1");
    // Transform kept only "a", renamed to "first"
    assert_eq!(execution.results["t"]["first"]["agent"], "agent-1");
    assert!(execution.results["t"].get("b").is_none());
    // No agents were assigned to the agentless steps
    assert!(!execution.agent_assignments.contains_key("m"));
    assert!(!execution.agent_assignments.contains_key("t"));
}

#[tokio::test]
async fn conditional_step_respects_context_key() {
    let harness = build_harness(
        ScriptedExecutor::new(),
        CapabilityDiscovery::with_default_pool(default_pool()),
    );

    let def = WorkflowDefinition::new("conditional", "Conditional", "").with_step(
        WorkflowStep::new(
            "gate",
            StepType::Conditional {
                context_key: "mode".to_string(),
                equals: json!("full"),
            },
        ),
    );
    assert!(harness.orchestrator.register_workflow(def).await.is_valid());

    // Condition unmet: skipped
    let skipped = harness
        .orchestrator
        .execute_workflow(
            "conditional",
            HashMap::from([("mode".to_string(), json!("lite"))]),
            ExecuteOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(skipped.skipped_steps, vec!["gate"]);

    // Condition met: dispatched
    let ran = harness
        .orchestrator
        .execute_workflow(
            "conditional",
            HashMap::from([("mode".to_string(), json!("full"))]),
            ExecuteOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(ran.completed_steps, vec!["gate"]);
    assert_eq!(ran.results["gate"]["agent"], "agent-1");
}

#[tokio::test]
async fn fallback_policy_absorbs_step_failure() {
    let harness = build_harness(
        ScriptedExecutor::new().always_failing("agent-bad", "validation failed"),
        CapabilityDiscovery::with_default_pool(vec![AgentRef::new("agent-bad", "Bad")])
            .pool("text_processing", vec![AgentRef::new("agent-good", "Good")]),
    );

    let fallback = WorkflowDefinition::new("plan-b", "Plan B", "").with_step(
        WorkflowStep::new("rescue", StepType::SingleAgent)
            .with_capabilities(vec![Capability::new("text_processing")]),
    );
    assert!(harness.orchestrator.register_workflow(fallback).await.is_valid());

    let def = WorkflowDefinition::new("plan-a", "Plan A", "")
        .with_step(WorkflowStep::new("main", StepType::SingleAgent))
        .with_error_handling(ErrorHandlingPolicy {
            on_step_failure: StepFailurePolicy::Fallback,
            fallback_workflow: Some("plan-b".to_string()),
        });
    assert!(harness.orchestrator.register_workflow(def).await.is_valid());

    let execution = harness
        .orchestrator
        .execute_workflow("plan-a", HashMap::new(), ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.results["main"]["fallback_workflow"], "plan-b");
    assert_eq!(
        execution.results["main"]["results"]["rescue"]["agent"],
        "agent-good"
    );
    // Fallback results merged into the parent context
    assert_eq!(execution.context["rescue"]["agent"], "agent-good");
}

#[tokio::test]
async fn backpressure_rejects_past_execution_ceiling() {
    let mut config = OrchestratorConfig::default();
    config.max_concurrent_executions = 1;

    let harness = Arc::new(build_harness_with_config(
        ScriptedExecutor::new().slow("agent-1", 300),
        CapabilityDiscovery::with_default_pool(vec![AgentRef::new("agent-1", "Slow")]),
        config,
    ));

    let def = WorkflowDefinition::new("slow", "Slow", "")
        .with_step(WorkflowStep::new("a", StepType::SingleAgent));
    assert!(harness.orchestrator.register_workflow(def).await.is_valid());

    let bg = {
        let harness = harness.clone();
        tokio::spawn(async move {
            harness
                .orchestrator
                .execute_workflow("slow", HashMap::new(), ExecuteOptions::default())
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(60)).await;
    let rejected = harness
        .orchestrator
        .execute_workflow("slow", HashMap::new(), ExecuteOptions::default())
        .await;
    assert!(matches!(
        rejected,
        Err(fleet_core::Error::CapacityExceeded(_))
    ));

    let first = bg.await.unwrap().unwrap();
    assert_eq!(first.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn cancel_discards_late_results_and_stops_dispatch() {
    // Documents the best-effort contract: the in-flight agent call is not
    // aborted, but its result is discarded and the next level never starts.
    let harness = Arc::new(build_harness(
        ScriptedExecutor::new().slow("agent-1", 250),
        CapabilityDiscovery::with_default_pool(vec![AgentRef::new("agent-1", "Slow")]),
    ));

    let def = WorkflowDefinition::new("cancellable", "Cancellable", "")
        .with_step(WorkflowStep::new("a", StepType::SingleAgent))
        .with_step(WorkflowStep::new("b", StepType::SingleAgent).with_dependencies(vec!["a"]));
    assert!(harness.orchestrator.register_workflow(def).await.is_valid());

    let bg = {
        let harness = harness.clone();
        tokio::spawn(async move {
            harness
                .orchestrator
                .execute_workflow("cancellable", HashMap::new(), ExecuteOptions::default())
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(80)).await;
    let details = harness.orchestrator.get_execution_details("").await;
    assert!(details.is_none());

    let running = harness.orchestrator.get_orchestration_status().await;
    let execution_id = running.recent_executions[0].execution_id.clone();
    harness
        .orchestrator
        .cancel_execution(&execution_id)
        .await
        .unwrap();

    let execution = bg.await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    // Step a's late result was discarded, and step b never dispatched:
    // the lone agent was called exactly once.
    assert!(execution.results.is_empty());
    assert_eq!(harness.executor.call_count("agent-1").await, 1);

    // Cancelling a terminal execution is an error
    assert!(harness
        .orchestrator
        .cancel_execution(&execution_id)
        .await
        .is_err());
}

#[tokio::test]
async fn pause_holds_at_level_boundary_until_resume() {
    let harness = Arc::new(build_harness(
        ScriptedExecutor::new().slow("agent-1", 200),
        CapabilityDiscovery::with_default_pool(vec![AgentRef::new("agent-1", "Steady")]),
    ));

    let def = WorkflowDefinition::new("pausable", "Pausable", "")
        .with_step(WorkflowStep::new("a", StepType::SingleAgent))
        .with_step(WorkflowStep::new("b", StepType::SingleAgent).with_dependencies(vec!["a"]));
    assert!(harness.orchestrator.register_workflow(def).await.is_valid());

    let bg = {
        let harness = harness.clone();
        tokio::spawn(async move {
            harness
                .orchestrator
                .execute_workflow("pausable", HashMap::new(), ExecuteOptions::default())
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(60)).await;
    let status = harness.orchestrator.get_orchestration_status().await;
    let execution_id = status.recent_executions[0].execution_id.clone();
    harness
        .orchestrator
        .pause_execution(&execution_id)
        .await
        .unwrap();

    // Level 1 finishes, but level 2 must not start while paused
    tokio::time::sleep(Duration::from_millis(400)).await;
    let details = harness
        .orchestrator
        .get_execution_details(&execution_id)
        .await
        .unwrap();
    assert_eq!(details.status, ExecutionStatus::Paused);
    assert!(details.completed_steps.contains(&"a".to_string()));
    assert!(!details.completed_steps.contains(&"b".to_string()));

    harness
        .orchestrator
        .resume_execution(&execution_id)
        .await
        .unwrap();
    let execution = bg.await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.completed_steps, vec!["a", "b"]);
}

#[tokio::test]
async fn status_surface_aggregates_counts_and_rates() {
    let harness = build_harness(
        ScriptedExecutor::new().always_failing("agent-1", "validation failed"),
        CapabilityDiscovery::with_default_pool(vec![AgentRef::new("agent-1", "Flaky")])
            .pool("text_processing", vec![AgentRef::new("agent-2", "Solid")]),
    );

    let good = WorkflowDefinition::new("good", "Good", "").with_step(
        WorkflowStep::new("a", StepType::SingleAgent)
            .with_capabilities(vec![Capability::new("text_processing")]),
    );
    let bad = WorkflowDefinition::new("bad", "Bad", "")
        .with_step(WorkflowStep::new("a", StepType::SingleAgent));
    assert!(harness.orchestrator.register_workflow(good).await.is_valid());
    assert!(harness.orchestrator.register_workflow(bad).await.is_valid());

    harness
        .orchestrator
        .execute_workflow("good", HashMap::new(), ExecuteOptions::default())
        .await
        .unwrap();
    harness
        .orchestrator
        .execute_workflow("bad", HashMap::new(), ExecuteOptions::default())
        .await
        .unwrap();

    let status = harness.orchestrator.get_orchestration_status().await;
    assert_eq!(status.registered_workflows, 2);
    assert_eq!(status.total_executions, 2);
    assert_eq!(status.completed_executions, 1);
    assert_eq!(status.failed_executions, 1);
    assert!((status.completion_rate - 0.5).abs() < f64::EPSILON);
    assert_eq!(status.recent_executions.len(), 2);
}

#[tokio::test]
async fn event_sink_failures_never_affect_outcomes() {
    init_tracing();
    let executor = Arc::new(ScriptedExecutor::new());
    let discovery: Arc<dyn AgentDiscovery> =
        Arc::new(CapabilityDiscovery::with_default_pool(default_pool()));
    let sink = Arc::new(CollectingSink::new(true));

    let pipeline = ExecutionPipeline::start(
        executor.clone(),
        PipelineConfig {
            max_concurrent_agents: 8,
            tick_interval_ms: 10,
            parallel_success_threshold: 0.5,
            sequential_retry_positions: 2,
            default_task_timeout_ms: 5_000,
        },
    );
    let recovery = Arc::new(RecoveryEngine::with_defaults(discovery.clone()));
    let orchestrator = Orchestrator::new(
        pipeline,
        recovery,
        discovery,
        OrchestratorConfig::default(),
    )
    .with_event_sink(sink.clone());

    assert!(orchestrator.register_workflow(diamond_workflow()).await.is_valid());
    let execution = orchestrator
        .execute_workflow("diamond", HashMap::new(), ExecuteOptions::default())
        .await
        .unwrap();

    // Every sink write failed, yet the execution is untouched
    assert_eq!(execution.status, ExecutionStatus::Completed);

    // And the events were still produced in order
    let events = sink.events.lock().await;
    assert!(matches!(
        events.first(),
        Some(OrchestrationEvent::WorkflowRegistered { .. })
    ));
    assert!(events
        .iter()
        .any(|e| matches!(e, OrchestrationEvent::ExecutionStarted { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, OrchestrationEvent::StepCompleted { .. })));
    assert!(matches!(
        events.last(),
        Some(OrchestrationEvent::ExecutionCompleted { success: true, .. })
    ));
}
