//! Collaborator traits for the fleetd engine
//!
//! These are the seams to the external world: agent discovery, the remote
//! agent execution call, and the write-only analytics sink. The engine is
//! generic over them; tests supply in-process implementations.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::Result;
use crate::events::OrchestrationEvent;
use crate::types::{DiscoveryQuery, DiscoveryResult};

/// Agent discovery interface - capability matching and health scoring
/// live behind this boundary.
#[async_trait]
pub trait AgentDiscovery: Send + Sync {
    /// Find agents able to perform a task, ordered best-first.
    /// May return zero agents; the caller treats that as assignment failure.
    async fn discover(&self, query: DiscoveryQuery) -> Result<DiscoveryResult>;
}

/// Remote agent execution - the sole foreign I/O boundary invoked by the
/// execution pipeline.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Execute one task on one agent. The returned value is the agent's
    /// output; errors surface as `Err`.
    async fn execute(
        &self,
        agent_id: &str,
        input: Value,
        context: &HashMap<String, Value>,
        timeout_ms: u64,
    ) -> Result<Value>;
}

/// Write-only event sink for external analytics.
///
/// Failures to record must never affect orchestration outcomes; callers
/// log and continue.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record(&self, event: OrchestrationEvent) -> Result<()>;
}
