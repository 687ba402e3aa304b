//! Topological leveling
//!
//! A level is a maximal set of steps whose dependencies are all already
//! resolved. Levels execute strictly in sequence; steps within a level
//! run concurrently.

use std::collections::HashSet;

use fleet_core::workflow::WorkflowDefinition;
use fleet_core::{Error, Result};

/// Compute execution levels for a validated definition.
///
/// Repeatedly collects every unresolved step whose dependencies are
/// resolved. Registration-time validation rejects cycles, so a stuck loop
/// with steps remaining is an internal-consistency error.
pub fn compute_levels(def: &WorkflowDefinition) -> Result<Vec<Vec<String>>> {
    let mut resolved: HashSet<&str> = HashSet::new();
    let mut remaining: Vec<&str> = def.steps.iter().map(|s| s.id.as_str()).collect();
    let mut levels = Vec::new();

    while !remaining.is_empty() {
        let ready: Vec<&str> = remaining
            .iter()
            .copied()
            .filter(|id| {
                def.step(id)
                    .map(|s| s.dependencies.iter().all(|d| resolved.contains(d.as_str())))
                    .unwrap_or(false)
            })
            .collect();

        if ready.is_empty() {
            return Err(Error::internal(format!(
                "Workflow '{}' has {} unresolvable steps; cycle detection should have rejected it",
                def.id,
                remaining.len()
            )));
        }

        for id in &ready {
            resolved.insert(id);
        }
        remaining.retain(|id| !resolved.contains(id));
        levels.push(ready.into_iter().map(String::from).collect());
    }

    Ok(levels)
}
