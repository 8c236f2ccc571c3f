//! Execution DTOs

use serde::{Deserialize, Serialize};

use crate::domain::execution::{Execution, Phase};

/// Flattened view of an execution and its progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub name: String,
    pub namespace: String,
    pub pipeline: String,
    pub repo: String,
    pub branch: String,
    pub phase: Phase,
    pub executing: Vec<String>,
    pub completed_tasks: Vec<String>,
    pub failure: Option<String>,
}

impl From<&Execution> for ExecutionSummary {
    fn from(execution: &Execution) -> Self {
        Self {
            name: execution.name().to_string(),
            namespace: execution.namespace().to_string(),
            pipeline: execution.spec.pipeline.clone(),
            repo: execution.spec.repo.clone(),
            branch: execution.spec.branch.clone(),
            phase: execution.status().phase(),
            executing: execution.status().executing.iter().cloned().collect(),
            completed_tasks: execution.status().completed_tasks.clone(),
            failure: execution.status().failure.as_ref().map(|f| f.to_string()),
        }
    }
}
