//! fleet-recovery: Prioritized error recovery
//!
//! Features:
//! - Pluggable strategy chain, tried in ascending priority order
//! - Built-ins: alternative agent, timeout extension, capability
//!   relaxation, step decomposition (extension point), graceful degradation
//! - Jittered exponential retry-delay computation
//! - Attempt history for the status surface

pub mod backoff;
pub mod builtin;
pub mod engine;
pub mod strategy;

pub use backoff::retry_delay_ms;
pub use engine::RecoveryEngine;
pub use strategy::{
    RecoveryAction, RecoveryAttempt, RecoveryContext, RecoveryResult, RecoveryStrategy,
};
