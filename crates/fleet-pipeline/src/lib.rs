//! fleet-pipeline: Priority-queued agent execution
//!
//! Features:
//! - Three priority bands with a global concurrency cap
//! - Fixed-interval scheduler tick with slot-based draining
//! - One-shot completion channels per task
//! - Single, parallel, and sequential step entry points with batch metrics

pub mod pipeline;
pub mod queue;
pub mod task;

pub use pipeline::{ExecutionPipeline, PipelineStats};
pub use task::{
    AgentExecutionResult, AgentExecutionTask, BatchMetrics, PipelineExecutionResult, TaskMetrics,
};
