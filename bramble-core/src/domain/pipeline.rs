//! Pipeline domain types
//!
//! The operator treats a pipeline as an opaque set of named tasks with
//! declared dependencies. Each task runs as one job against the cloned
//! repository.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

use crate::naming;

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "bramble.dev",
    version = "v1alpha1",
    kind = "Pipeline",
    namespaced,
    derive = "PartialEq"
)]
pub struct PipelineSpec {
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
}

impl Pipeline {
    pub fn namespaced(namespace: &str, name: &str, spec: PipelineSpec) -> Self {
        let mut pipeline = Pipeline::new(name, spec);
        pipeline.metadata.namespace = Some(namespace.to_string());
        pipeline
    }

    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }
}

/// A single task within a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    pub name: String,

    /// Container image the task runs in
    pub image: String,

    /// Command executed in the repository checkout. Empty runs the image entrypoint.
    #[serde(default)]
    pub command: Vec<String>,

    /// Names of tasks that must complete before this one runs
    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            command: Vec::new(),
            depends_on: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_command(mut self, command: &[&str]) -> Self {
        self.command = command.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn depends_on(mut self, task: impl Into<String>) -> Self {
        self.depends_on.push(task.into());
        self
    }
}

/// Configuration errors in a pipeline definition
///
/// Retrying cannot fix any of these, so the reconciler records them as a
/// terminal failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("Task name cannot be empty")]
    EmptyTaskName,

    #[error("Duplicate task name: {0}")]
    DuplicateTask(String),

    #[error("Tasks '{first}' and '{second}' map to the same job name")]
    JobNameCollision { first: String, second: String },

    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("Cycle detected in task dependencies involving: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("Task '{0}' is not part of the pipeline")]
    UnknownTask(String),

    #[error("Generated job name '{0}' is longer than 63 characters")]
    JobNameTooLong(String),
}

impl PipelineSpec {
    pub fn task(&self, name: &str) -> Option<&TaskSpec> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.task(name).is_some()
    }

    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|t| t.name.as_str())
    }

    /// Validate the pipeline definition
    ///
    /// Checks:
    /// - No empty (or all-punctuation) or duplicate task names
    /// - No two tasks share a sanitized job name
    /// - All dependency references point to existing tasks
    /// - No cycles in the dependency graph
    pub fn validate(&self) -> Result<(), PipelineError> {
        let mut seen = HashSet::new();
        let mut job_names: HashMap<String, &str> = HashMap::new();

        for task in &self.tasks {
            if task.name.is_empty() || naming::sanitize(&task.name).is_empty() {
                return Err(PipelineError::EmptyTaskName);
            }
            if !seen.insert(task.name.as_str()) {
                return Err(PipelineError::DuplicateTask(task.name.clone()));
            }
            let sanitized = naming::sanitize(&task.name);
            if let Some(first) = job_names.insert(sanitized, &task.name) {
                return Err(PipelineError::JobNameCollision {
                    first: first.to_string(),
                    second: task.name.clone(),
                });
            }
        }

        for task in &self.tasks {
            for dep in &task.depends_on {
                if !seen.contains(dep.as_str()) {
                    return Err(PipelineError::UnknownDependency {
                        task: task.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        self.detect_cycles()
    }

    /// Detect cycles in the task dependency graph using Kahn's algorithm.
    fn detect_cycles(&self) -> Result<(), PipelineError> {
        let index: HashMap<&str, usize> = self
            .tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.as_str(), i))
            .collect();

        let n = self.tasks.len();
        let mut in_degree = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![vec![]; n];

        for (idx, task) in self.tasks.iter().enumerate() {
            for dep in &task.depends_on {
                let dep_idx = index[dep.as_str()];
                dependents[dep_idx].push(idx);
                in_degree[idx] += 1;
            }
        }

        let mut queue: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut visited = 0;

        while let Some(node) = queue.pop() {
            visited += 1;
            for &next in &dependents[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push(next);
                }
            }
        }

        if visited != n {
            let stuck = (0..n)
                .filter(|&i| in_degree[i] > 0)
                .map(|i| self.tasks[i].name.clone())
                .collect();
            return Err(PipelineError::Cycle(stuck));
        }

        Ok(())
    }
}
