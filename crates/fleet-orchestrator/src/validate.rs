//! Workflow definition validation
//!
//! Registration-time checks: duplicate step ids, unresolved dependencies,
//! cycles (reported with the offending path), and unrecognized capability
//! tokens. Errors block registration; warnings do not.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use fleet_core::workflow::WorkflowDefinition;

/// Severity of a validation issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Warning,
    Error,
}

/// One validation finding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Machine-readable code: missing_dependency, circular_dependency,
    /// invalid_capability, duplicate_step_id
    pub code: String,
    pub severity: IssueSeverity,
    pub message: String,
    #[serde(default)]
    pub step_id: Option<String>,
}

/// Outcome of validating a definition
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// True when no error-severity issue exists
    pub fn is_valid(&self) -> bool {
        !self
            .issues
            .iter()
            .any(|i| i.severity == IssueSeverity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Warning)
    }

    fn error(&mut self, code: &str, step_id: Option<&str>, message: String) {
        self.issues.push(ValidationIssue {
            code: code.to_string(),
            severity: IssueSeverity::Error,
            message,
            step_id: step_id.map(String::from),
        });
    }

    fn warning(&mut self, code: &str, step_id: Option<&str>, message: String) {
        self.issues.push(ValidationIssue {
            code: code.to_string(),
            severity: IssueSeverity::Warning,
            message,
            step_id: step_id.map(String::from),
        });
    }
}

/// Validate a workflow definition against the capability catalog
pub fn validate_definition(
    def: &WorkflowDefinition,
    known_capabilities: &[String],
) -> ValidationReport {
    let mut report = ValidationReport::default();

    // Duplicate step ids
    let mut seen_ids = HashSet::new();
    for step in &def.steps {
        if !seen_ids.insert(step.id.as_str()) {
            report.error(
                "duplicate_step_id",
                Some(&step.id),
                format!("Duplicate step id: {}", step.id),
            );
        }
    }

    // Dependencies must resolve within the definition
    for step in &def.steps {
        for dep in &step.dependencies {
            if !seen_ids.contains(dep.as_str()) {
                report.error(
                    "missing_dependency",
                    Some(&step.id),
                    format!("Step '{}' depends on unknown step '{}'", step.id, dep),
                );
            }
        }
    }

    // Cycle detection, reporting the offending path
    if let Some(cycle) = find_cycle(def) {
        report.error(
            "circular_dependency",
            cycle.first().map(String::as_str),
            format!("Dependency cycle: {}", cycle.join(" -> ")),
        );
    }

    // Capability tokens (non-fatal)
    for step in &def.steps {
        for capability in &step.required_capabilities {
            if !known_capabilities.contains(&capability.name) {
                report.warning(
                    "invalid_capability",
                    Some(&step.id),
                    format!(
                        "Step '{}' requires unrecognized capability '{}'",
                        step.id, capability.name
                    ),
                );
            }
        }
    }

    report
}

/// Find one dependency cycle, if any, as the path of step ids closing it
fn find_cycle(def: &WorkflowDefinition) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    let adjacency: HashMap<&str, &Vec<String>> = def
        .steps
        .iter()
        .map(|s| (s.id.as_str(), &s.dependencies))
        .collect();

    let mut marks: HashMap<&str, Mark> = def
        .steps
        .iter()
        .map(|s| (s.id.as_str(), Mark::Unvisited))
        .collect();

    fn visit<'a>(
        node: &'a str,
        adjacency: &HashMap<&'a str, &'a Vec<String>>,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        marks.insert(node, Mark::InProgress);
        path.push(node);

        if let Some(deps) = adjacency.get(node) {
            for dep in deps.iter() {
                match marks.get(dep.as_str()) {
                    Some(Mark::InProgress) => {
                        // Close the loop from the first occurrence
                        let start = path.iter().position(|n| *n == dep.as_str()).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            path[start..].iter().map(|s| s.to_string()).collect();
                        cycle.push(dep.clone());
                        return Some(cycle);
                    }
                    Some(Mark::Unvisited) => {
                        if let Some(cycle) = visit(dep.as_str(), adjacency, marks, path) {
                            return Some(cycle);
                        }
                    }
                    _ => {}
                }
            }
        }

        path.pop();
        marks.insert(node, Mark::Done);
        None
    }

    let ids: Vec<&str> = def.steps.iter().map(|s| s.id.as_str()).collect();
    for id in ids {
        if marks.get(id) == Some(&Mark::Unvisited) {
            let mut path = Vec::new();
            if let Some(cycle) = visit(id, &adjacency, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}
