//! Execution Pipeline - priority-queued, concurrency-capped task runner
//!
//! Turns `AgentExecutionTask`s into `AgentExecutionResult`s by invoking the
//! external agent executor. A fixed-interval scheduler tick drains up to
//! `max_concurrent_agents - active` tasks from the highest non-empty band
//! and dispatches each on its own tokio task. Callers await completion
//! through a oneshot channel resolved exactly once per task.
//!
//! The queues and active counter are process-wide: tasks from unrelated
//! workflow executions interleave purely by priority and arrival.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use fleet_core::config::PipelineConfig;
use fleet_core::fault::classify_failure;
use fleet_core::traits::AgentExecutor;

use crate::queue::{QueuedTask, TaskQueues};
use crate::task::{
    AgentExecutionResult, AgentExecutionTask, BatchMetrics, PipelineExecutionResult, TaskMetrics,
};

/// Snapshot of pipeline load
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub queued_urgent: usize,
    pub queued_normal: usize,
    pub queued_low: usize,
    pub active: usize,
}

/// The execution pipeline
pub struct ExecutionPipeline {
    config: PipelineConfig,
    executor: Arc<dyn AgentExecutor>,
    queues: Mutex<TaskQueues>,
    active: AtomicUsize,
}

impl ExecutionPipeline {
    /// Create the pipeline and start its scheduler loop.
    ///
    /// The loop holds only a weak reference; dropping the last `Arc` stops
    /// scheduling on the next tick.
    pub fn start(executor: Arc<dyn AgentExecutor>, config: PipelineConfig) -> Arc<Self> {
        let pipeline = Arc::new(Self {
            config,
            executor,
            queues: Mutex::new(TaskQueues::new()),
            active: AtomicUsize::new(0),
        });

        let weak = Arc::downgrade(&pipeline);
        let tick = pipeline.config.tick_interval_ms;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(tick.max(1)));
            loop {
                interval.tick().await;
                let Some(pipeline) = weak.upgrade() else { break };
                pipeline.drain_ready().await;
            }
            debug!("Pipeline scheduler stopped");
        });

        pipeline
    }

    /// Enqueue one task; the returned receiver resolves exactly once with
    /// the task's result.
    pub async fn submit(
        &self,
        task: AgentExecutionTask,
        context: HashMap<String, Value>,
    ) -> oneshot::Receiver<AgentExecutionResult> {
        let (tx, rx) = oneshot::channel();
        let entry = QueuedTask {
            task,
            context,
            enqueued_at: Instant::now(),
            reply_to: tx,
        };

        let mut queues = self.queues.lock().await;
        queues.push(entry);
        rx
    }

    /// Submit and await one task
    pub async fn run_task(
        self: &Arc<Self>,
        task: AgentExecutionTask,
        context: HashMap<String, Value>,
    ) -> AgentExecutionResult {
        let task_id = task.task_id.clone();
        let rx = self.submit(task, context).await;
        match rx.await {
            Ok(result) => result,
            Err(_) => AgentExecutionResult::failure(
                task_id,
                "Pipeline dropped task before completion",
                TaskMetrics::default(),
            ),
        }
    }

    /// One scheduler tick: dispatch up to the available slots
    async fn drain_ready(self: &Arc<Self>) {
        let active = self.active.load(Ordering::SeqCst);
        let available = self.config.max_concurrent_agents.saturating_sub(active);
        if available == 0 {
            return;
        }

        let mut batch = Vec::with_capacity(available);
        {
            let mut queues = self.queues.lock().await;
            for _ in 0..available {
                match queues.pop_highest() {
                    Some(entry) => batch.push(entry),
                    None => break,
                }
            }
        }

        for entry in batch {
            self.dispatch(entry);
        }
    }

    /// Run one task on its own tokio task
    fn dispatch(self: &Arc<Self>, entry: QueuedTask) {
        self.active.fetch_add(1, Ordering::SeqCst);

        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let QueuedTask {
                task,
                context,
                enqueued_at,
                reply_to,
            } = entry;

            let queue_time_ms = enqueued_at.elapsed().as_millis() as u64;
            let started = Instant::now();
            let timeout = Duration::from_millis(task.timeout_ms.max(1));

            debug!(
                task_id = %task.task_id,
                agent_id = %task.agent.id,
                priority = %task.priority,
                queue_time_ms = queue_time_ms,
                "Dispatching task"
            );

            let outcome = tokio::time::timeout(
                timeout,
                pipeline
                    .executor
                    .execute(&task.agent.id, task.input.clone(), &context, task.timeout_ms),
            )
            .await;

            let processing_time_ms = started.elapsed().as_millis() as u64;
            let metrics = TaskMetrics {
                queue_time_ms,
                processing_time_ms,
                response_time_ms: processing_time_ms,
            };

            let result = match outcome {
                Ok(Ok(output)) => AgentExecutionResult::success(&task.task_id, output, metrics),
                Ok(Err(e)) => {
                    warn!(task_id = %task.task_id, agent_id = %task.agent.id, error = %e, "Task failed");
                    AgentExecutionResult::failure(&task.task_id, e.to_string(), metrics)
                }
                Err(_) => {
                    warn!(task_id = %task.task_id, agent_id = %task.agent.id, timeout_ms = task.timeout_ms, "Task timed out");
                    AgentExecutionResult::failure(
                        &task.task_id,
                        format!("Agent execution timeout after {}ms", task.timeout_ms),
                        metrics,
                    )
                }
            };

            pipeline.active.fetch_sub(1, Ordering::SeqCst);

            // Receiver may be gone if the caller's execution was cancelled;
            // the late result is discarded.
            let _ = reply_to.send(result);
        });
    }

    /// Current queue/active snapshot
    pub async fn stats(&self) -> PipelineStats {
        let queues = self.queues.lock().await;
        let (queued_urgent, queued_normal, queued_low) = queues.depths();
        PipelineStats {
            queued_urgent,
            queued_normal,
            queued_low,
            active: self.active.load(Ordering::SeqCst),
        }
    }

    // === Step-level entry points ===

    /// Run one agent; pass-through success/failure
    pub async fn execute_single_agent_step(
        self: &Arc<Self>,
        task: AgentExecutionTask,
        context: HashMap<String, Value>,
    ) -> PipelineExecutionResult {
        let started = Instant::now();
        let agent_id = task.agent.id.clone();
        let result = self.run_task(task, context).await;

        PipelineExecutionResult {
            success: result.success,
            output: result.output.clone(),
            execution_time_ms: started.elapsed().as_millis() as u64,
            agents_used: vec![agent_id],
            performance_metrics: BatchMetrics::from_results(std::slice::from_ref(&result)),
            errors: result.error.into_iter().collect(),
            warnings: Vec::new(),
        }
    }

    /// Run N agents concurrently; the step succeeds when the success
    /// fraction reaches `parallel_success_threshold`.
    pub async fn execute_parallel_agents_step(
        self: &Arc<Self>,
        tasks: Vec<AgentExecutionTask>,
        context: HashMap<String, Value>,
    ) -> PipelineExecutionResult {
        let started = Instant::now();
        if tasks.is_empty() {
            return empty_step_result("parallel step received no tasks");
        }

        let agents: Vec<(String, String)> = tasks
            .iter()
            .map(|t| (t.agent.id.clone(), t.agent.name.clone()))
            .collect();

        // Enqueue everything first so the batch competes as one arrival set
        let mut task_ids = Vec::with_capacity(tasks.len());
        let mut receivers = Vec::with_capacity(tasks.len());
        for task in tasks {
            task_ids.push(task.task_id.clone());
            receivers.push(self.submit(task, context.clone()).await);
        }

        let results: Vec<AgentExecutionResult> = task_ids
            .into_iter()
            .zip(join_all(receivers).await)
            .map(|(task_id, received)| {
                received.unwrap_or_else(|_| {
                    AgentExecutionResult::failure(
                        task_id,
                        "Pipeline dropped task before completion",
                        TaskMetrics::default(),
                    )
                })
            })
            .collect();

        let total = results.len();
        let successful = results.iter().filter(|r| r.success).count();
        let success =
            successful as f64 / total as f64 >= self.config.parallel_success_threshold;

        let errors: Vec<String> = results.iter().filter_map(|r| r.error.clone()).collect();
        let mut warnings = Vec::new();
        if success && successful < total {
            warnings.push(format!(
                "{} of {} parallel agents failed; step succeeded by threshold",
                total - successful,
                total
            ));
        }

        let output = if total == 1 {
            results[0].output.clone()
        } else {
            let max_execution_time_ms = results
                .iter()
                .map(|r| r.metrics.processing_time_ms)
                .max()
                .unwrap_or(0);
            json!({
                "agents": agents
                    .iter()
                    .zip(results.iter())
                    .map(|((agent_id, agent_name), result)| json!({
                        "agent_id": agent_id,
                        "agent_name": agent_name,
                        "success": result.success,
                        "output": result.output,
                    }))
                    .collect::<Vec<_>>(),
                "summary": {
                    "agent_count": total,
                    "max_execution_time_ms": max_execution_time_ms,
                },
            })
        };

        PipelineExecutionResult {
            success,
            output,
            execution_time_ms: started.elapsed().as_millis() as u64,
            agents_used: agents.into_iter().map(|(id, _)| id).collect(),
            performance_metrics: BatchMetrics::from_results(&results),
            errors,
            warnings,
        }
    }

    /// Run N agents one at a time, feeding each output into the next input.
    ///
    /// A failure in one of the first `sequential_retry_positions` positions
    /// continues the chain with the unchanged prior input when the error
    /// classifies as retryable; any other failure stops the chain early.
    pub async fn execute_sequential_agents_step(
        self: &Arc<Self>,
        tasks: Vec<AgentExecutionTask>,
        context: HashMap<String, Value>,
    ) -> PipelineExecutionResult {
        let started = Instant::now();
        if tasks.is_empty() {
            return empty_step_result("sequential step received no tasks");
        }

        let total = tasks.len();
        let mut agents_used = Vec::with_capacity(total);
        let mut results: Vec<AgentExecutionResult> = Vec::with_capacity(total);
        let mut agent_outputs = Vec::with_capacity(total);
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut current_input: Option<Value> = None;
        let mut last_success_output = Value::Null;
        let mut last_succeeded = false;
        let mut halted = false;

        for (position, mut task) in tasks.into_iter().enumerate() {
            if let Some(input) = current_input.clone() {
                task.input = input;
            }
            let agent_id = task.agent.id.clone();
            agents_used.push(agent_id.clone());

            let result = self.run_task(task, context.clone()).await;
            agent_outputs.push(json!({
                "agent_id": agent_id,
                "success": result.success,
                "output": result.output,
            }));

            if result.success {
                last_success_output = result.output.clone();
                current_input = Some(result.output.clone());
                last_succeeded = true;
                results.push(result);
                continue;
            }

            last_succeeded = false;
            let message = result.error.clone().unwrap_or_default();
            errors.push(message.clone());
            results.push(result);

            let retryable = classify_failure(&message).default_retryable();
            if retryable && position < self.config.sequential_retry_positions {
                warnings.push(format!(
                    "agent {} failed at position {}; continuing chain with prior input",
                    agent_id,
                    position + 1
                ));
                continue;
            }

            halted = true;
            if position + 1 < total {
                warnings.push(format!(
                    "chain halted at position {} of {}",
                    position + 1,
                    total
                ));
            }
            break;
        }

        let successful = results.iter().filter(|r| r.success).count();
        let output = json!({
            "final_output": last_success_output,
            "agent_outputs": agent_outputs,
            "successful": successful,
            "failed": results.len() - successful,
        });

        PipelineExecutionResult {
            success: last_succeeded && !halted,
            output,
            execution_time_ms: started.elapsed().as_millis() as u64,
            agents_used,
            performance_metrics: BatchMetrics::from_results(&results),
            errors,
            warnings,
        }
    }
}

fn empty_step_result(message: &str) -> PipelineExecutionResult {
    PipelineExecutionResult {
        success: false,
        output: Value::Null,
        execution_time_ms: 0,
        agents_used: Vec::new(),
        performance_metrics: BatchMetrics::default(),
        errors: vec![message.to_string()],
        warnings: Vec::new(),
    }
}
