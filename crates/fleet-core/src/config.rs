//! Environment Configuration Loader
//!
//! Loads environment variables from the canonical location:
//! `/etc/fleet/environment`, falling back to `.env` for development.
//! Tuning knobs read through `get_config_*` so every deployment shares
//! one configuration surface.

use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Default path for the environment file
pub const DEFAULT_ENV_FILE: &str = "/etc/fleet/environment";

/// Alternative paths to check (in order of priority)
pub const ENV_FILE_PATHS: &[&str] = &["/etc/fleet/environment", "/etc/fleet.env", ".env"];

/// Global ceiling on concurrently executing agent tasks
pub const DEFAULT_MAX_CONCURRENT_AGENTS: usize = 10;

/// Scheduler tick interval in milliseconds
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;

/// Fraction of parallel-step tasks that must succeed for the step to succeed
pub const PARALLEL_SUCCESS_THRESHOLD: f64 = 0.5;

/// How many leading positions of a sequential chain may continue past a
/// retryable failure
pub const SEQUENTIAL_RETRY_POSITIONS: usize = 2;

/// Default per-task timeout in milliseconds
pub const DEFAULT_TASK_TIMEOUT_MS: u64 = 30_000;

/// Hard ceiling on step timeouts reachable through timeout extension
pub const MAX_STEP_TIMEOUT_MS: u64 = 300_000;

/// Ceiling on concurrently running workflow executions
pub const DEFAULT_MAX_CONCURRENT_EXECUTIONS: usize = 10;

/// Load environment variables from the canonical configuration file.
///
/// Checks `FLEET_ENV_FILE` first, then each path in `ENV_FILE_PATHS`.
/// Existing environment variables are never overridden.
/// Returns the path that was loaded, or None if no file was found.
pub fn load_environment() -> Option<String> {
    if let Ok(custom_path) = std::env::var("FLEET_ENV_FILE") {
        if let Some(path) = try_load_env_file(&custom_path) {
            return Some(path);
        }
    }

    for path in ENV_FILE_PATHS {
        if let Some(loaded_path) = try_load_env_file(path) {
            return Some(loaded_path);
        }
    }

    debug!("No environment file found, using existing environment");
    None
}

/// Try to load an environment file from the given path.
fn try_load_env_file(path: &str) -> Option<String> {
    let path_obj = Path::new(path);

    if !path_obj.exists() {
        return None;
    }

    match fs::read_to_string(path_obj) {
        Ok(content) => {
            let mut loaded_count = 0;
            let mut skipped_count = 0;

            for line in content.lines() {
                let line = line.trim();

                if line.is_empty() || line.starts_with('#') {
                    continue;
                }

                if let Some((key, value)) = parse_env_line(line) {
                    if std::env::var(&key).is_err() {
                        std::env::set_var(&key, &value);
                        loaded_count += 1;
                    } else {
                        skipped_count += 1;
                        debug!("Skipped (already set): {}", key);
                    }
                }
            }

            info!(
                "Loaded {} environment variables from {} ({} skipped - already set)",
                loaded_count, path, skipped_count
            );

            Some(path.to_string())
        }
        Err(e) => {
            warn!("Failed to read environment file {}: {}", path, e);
            None
        }
    }
}

/// Parse a single environment line into key-value pair.
fn parse_env_line(line: &str) -> Option<(String, String)> {
    let mut parts = line.splitn(2, '=');
    let key = parts.next()?.trim();
    let value = parts.next()?.trim();

    if key.is_empty() {
        return None;
    }

    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value);

    Some((key.to_string(), value.to_string()))
}

/// Get a configuration value with a default.
pub fn get_config(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get an optional configuration value.
pub fn get_config_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Get a boolean configuration value.
pub fn get_config_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
        .unwrap_or(default)
}

/// Get an integer configuration value.
pub fn get_config_int(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Tuning for the execution pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Global ceiling on concurrently dispatched tasks, shared by all workflows
    pub max_concurrent_agents: usize,
    /// Scheduler tick interval in milliseconds
    pub tick_interval_ms: u64,
    /// Success fraction required for a parallel step
    pub parallel_success_threshold: f64,
    /// Leading chain positions that may continue past a retryable failure
    pub sequential_retry_positions: usize,
    /// Applied when a task does not carry its own timeout
    pub default_task_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_agents: get_config_int(
                "FLEET_MAX_CONCURRENT_AGENTS",
                DEFAULT_MAX_CONCURRENT_AGENTS as i64,
            ) as usize,
            tick_interval_ms: get_config_int(
                "FLEET_TICK_INTERVAL_MS",
                DEFAULT_TICK_INTERVAL_MS as i64,
            ) as u64,
            parallel_success_threshold: PARALLEL_SUCCESS_THRESHOLD,
            sequential_retry_positions: SEQUENTIAL_RETRY_POSITIONS,
            default_task_timeout_ms: get_config_int(
                "FLEET_TASK_TIMEOUT_MS",
                DEFAULT_TASK_TIMEOUT_MS as i64,
            ) as u64,
        }
    }
}

/// Tuning for the workflow orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Ceiling on concurrently running executions (backpressure, not a queue)
    pub max_concurrent_executions: usize,
    /// Recognized capability tokens; unknown tokens warn at registration
    pub known_capabilities: Vec<String>,
    /// How many finished executions the status surface retains
    pub max_recent_executions: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: get_config_int(
                "FLEET_MAX_CONCURRENT_EXECUTIONS",
                DEFAULT_MAX_CONCURRENT_EXECUTIONS as i64,
            ) as usize,
            known_capabilities: default_capability_catalog(),
            max_recent_executions: 100,
        }
    }
}

/// Capability tokens the fleet currently advertises
pub fn default_capability_catalog() -> Vec<String> {
    [
        "text_processing",
        "code_generation",
        "code_review",
        "data_analysis",
        "data_extraction",
        "summarization",
        "translation",
        "image_analysis",
        "search",
        "planning",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
