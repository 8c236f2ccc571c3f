//! Execution domain types
//!
//! An Execution is one declarative request to run a pipeline against a
//! repository branch. Its status is the only durable record of progress:
//! every transition helper below is monotonic, so a status computed from a
//! fresh read can never undo work an earlier reconcile recorded.

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{CustomResource, Resource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::domain::meta::ObjectKey;

/// Desired state of an execution. Immutable once created.
#[derive(CustomResource, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "bramble.dev",
    version = "v1alpha1",
    kind = "Execution",
    namespaced,
    status = "ExecutionStatus",
    derive = "PartialEq",
    shortname = "exec"
)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSpec {
    /// Name of the pipeline (in the same namespace) to execute
    pub pipeline: String,

    /// Git repository hosting the code to run the pipeline against
    pub repo: String,

    pub branch: String,

    #[serde(default)]
    pub clone_dir: String,
}

static EMPTY_STATUS: ExecutionStatus = ExecutionStatus {
    volume_provisioned: false,
    repo_cloned: false,
    executing: BTreeSet::new(),
    completed: false,
    completed_tasks: Vec::new(),
    error: false,
    failure: None,
};

impl Execution {
    /// Creates a new execution with an empty status
    pub fn namespaced(namespace: &str, name: &str, spec: ExecutionSpec) -> Self {
        let mut execution = Execution::new(name, spec);
        execution.metadata.namespace = Some(namespace.to_string());
        execution
    }

    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace(), self.name())
    }

    /// Current status. An object the reconciler never wrote reads as empty.
    pub fn status(&self) -> &ExecutionStatus {
        self.status.as_ref().unwrap_or(&EMPTY_STATUS)
    }

    pub fn status_mut(&mut self) -> &mut ExecutionStatus {
        self.status.get_or_insert_with(ExecutionStatus::default)
    }

    /// Controller reference placed on every child object
    pub fn owner_reference(&self) -> Option<OwnerReference> {
        self.controller_owner_ref(&())
    }

    /// Directory (relative to the execution's source path) the repo is cloned into
    pub fn clone_dir(&self) -> &str {
        if self.spec.clone_dir.is_empty() {
            self.name()
        } else {
            &self.spec.clone_dir
        }
    }
}

/// Observed state of an execution, owned by the reconciler
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStatus {
    #[serde(default)]
    pub volume_provisioned: bool,

    #[serde(default)]
    pub repo_cloned: bool,

    /// Tasks whose jobs have been launched but not yet observed to finish
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub executing: BTreeSet<String>,

    #[serde(default)]
    pub completed: bool,

    /// Finished tasks in completion order. Append-only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub completed_tasks: Vec<String>,

    #[serde(default)]
    pub error: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
}

impl ExecutionStatus {
    /// True once the execution completed or failed
    pub fn is_terminal(&self) -> bool {
        self.completed || self.error
    }

    pub fn is_task_completed(&self, task: &str) -> bool {
        self.completed_tasks.iter().any(|t| t == task)
    }

    pub fn mark_volume_provisioned(&mut self) -> bool {
        !std::mem::replace(&mut self.volume_provisioned, true)
    }

    pub fn mark_repo_cloned(&mut self) -> bool {
        !std::mem::replace(&mut self.repo_cloned, true)
    }

    /// Records a launched task. Completed or already executing tasks are ignored.
    pub fn start_task(&mut self, task: &str) -> bool {
        if self.is_task_completed(task) {
            return false;
        }
        self.executing.insert(task.to_string())
    }

    /// Moves a task from `executing` to the end of `completed_tasks`
    pub fn complete_task(&mut self, task: &str) -> bool {
        let was_executing = self.executing.remove(task);
        if self.is_task_completed(task) {
            return was_executing;
        }
        self.completed_tasks.push(task.to_string());
        true
    }

    /// Records a terminal failure. The first recorded failure wins.
    pub fn fail(&mut self, failure: Failure) -> bool {
        if self.error {
            return false;
        }
        self.error = true;
        self.failure = Some(failure);
        true
    }

    pub fn mark_completed(&mut self) -> bool {
        !std::mem::replace(&mut self.completed, true)
    }

    /// Lifecycle phase derived from the status flags
    pub fn phase(&self) -> Phase {
        if self.error {
            Phase::Error
        } else if self.completed {
            Phase::Completed
        } else if !self.executing.is_empty() || !self.completed_tasks.is_empty() {
            Phase::Executing
        } else if self.repo_cloned {
            Phase::RepoCloned
        } else if self.volume_provisioned {
            Phase::VolumeProvisioned
        } else {
            Phase::Init
        }
    }

    /// Returns true if `self` does not undo anything recorded in `previous`
    pub fn is_successor_of(&self, previous: &ExecutionStatus) -> bool {
        let flags_kept = (!previous.volume_provisioned || self.volume_provisioned)
            && (!previous.repo_cloned || self.repo_cloned)
            && (!previous.completed || self.completed)
            && (!previous.error || self.error);

        flags_kept && self.completed_tasks.starts_with(&previous.completed_tasks)
    }
}

/// Lifecycle phase of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Init,
    VolumeProvisioned,
    RepoCloned,
    Executing,
    Completed,
    Error,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "Init",
            Phase::VolumeProvisioned => "VolumeProvisioned",
            Phase::RepoCloned => "RepoCloned",
            Phase::Executing => "Executing",
            Phase::Completed => "Completed",
            Phase::Error => "Error",
        };
        f.write_str(name)
    }
}

/// Where an execution failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum FailureStage {
    Clone,
    Task,
    Configuration,
}

/// Point of failure recorded alongside `error = true`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Failure {
    pub stage: FailureStage,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,

    pub message: String,

    pub failed_at: DateTime<Utc>,
}

impl Failure {
    pub fn clone_failed(message: impl Into<String>) -> Self {
        Self {
            stage: FailureStage::Clone,
            task: None,
            message: message.into(),
            failed_at: Utc::now(),
        }
    }

    pub fn task_failed(task: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage: FailureStage::Task,
            task: Some(task.into()),
            message: message.into(),
            failed_at: Utc::now(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self {
            stage: FailureStage::Configuration,
            task: None,
            message: message.into(),
            failed_at: Utc::now(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.stage, &self.task) {
            (FailureStage::Task, Some(task)) => write!(f, "task '{}' failed: {}", task, self.message),
            (FailureStage::Task, None) => write!(f, "task failed: {}", self.message),
            (FailureStage::Clone, _) => write!(f, "clone failed: {}", self.message),
            (FailureStage::Configuration, _) => {
                write!(f, "configuration error: {}", self.message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ExecutionSpec {
        ExecutionSpec {
            pipeline: "p1".to_string(),
            repo: "git://x/y".to_string(),
            branch: "main".to_string(),
            clone_dir: String::new(),
        }
    }

    #[test]
    fn test_parse_cluster_object() {
        let raw = r#"{
            "apiVersion": "bramble.dev/v1alpha1",
            "kind": "Execution",
            "metadata": {
                "name": "run-1",
                "namespace": "ci",
                "uid": "6f1c3f4e-2a55-4c1e-9a3d-0d0b8f7c1a11",
                "resourceVersion": "4711",
                "generation": 1,
                "managedFields": []
            },
            "spec": {"pipeline": "p1", "repo": "git://x/y", "branch": "main", "cloneDir": "src"},
            "status": {"volumeProvisioned": true, "executing": ["build"], "error": false}
        }"#;

        let execution: Execution = serde_json::from_str(raw).unwrap();
        assert_eq!(execution.name(), "run-1");
        assert_eq!(execution.namespace(), "ci");
        assert_eq!(execution.metadata.resource_version.as_deref(), Some("4711"));
        assert!(execution.metadata.uid.is_some());
        assert_eq!(execution.clone_dir(), "src");
        assert!(execution.status().volume_provisioned);
        assert!(!execution.status().repo_cloned);
        assert!(execution.status().executing.contains("build"));
        assert_eq!(execution.status().phase(), Phase::Executing);
    }

    #[test]
    fn test_missing_status_defaults() {
        let raw = r#"{
            "apiVersion": "bramble.dev/v1alpha1",
            "kind": "Execution",
            "metadata": {"name": "run-2", "namespace": "default"},
            "spec": {"pipeline": "p1", "repo": "git://x/y", "branch": "main"}
        }"#;

        let execution: Execution = serde_json::from_str(raw).unwrap();
        assert!(execution.status.is_none());
        assert_eq!(execution.status(), &ExecutionStatus::default());
        assert_eq!(execution.clone_dir(), "run-2");
        assert_eq!(execution.status().phase(), Phase::Init);

        let mut execution = execution;
        execution.status_mut().mark_volume_provisioned();
        assert_eq!(execution.status().phase(), Phase::VolumeProvisioned);
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let mut status = ExecutionStatus::default();
        status.mark_volume_provisioned();
        status.start_task("build");
        status.complete_task("build");

        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["volumeProvisioned"], true);
        assert_eq!(value["completedTasks"][0], "build");
        assert!(value.get("executing").is_none());
        assert!(value.get("failure").is_none());
    }

    #[test]
    fn test_flags_only_move_forward() {
        let mut status = ExecutionStatus::default();
        assert!(status.mark_volume_provisioned());
        assert!(!status.mark_volume_provisioned());
        assert!(status.mark_repo_cloned());
        assert!(!status.mark_repo_cloned());
        assert!(status.mark_completed());
        assert!(!status.mark_completed());
    }

    #[test]
    fn test_task_lifecycle() {
        let mut status = ExecutionStatus::default();
        assert!(status.start_task("build"));
        assert!(!status.start_task("build"));
        assert_eq!(status.phase(), Phase::Executing);

        assert!(status.complete_task("build"));
        assert!(status.executing.is_empty());
        assert_eq!(status.completed_tasks, vec!["build"]);

        // Completing twice neither duplicates nor reorders
        assert!(!status.complete_task("build"));
        assert_eq!(status.completed_tasks, vec!["build"]);

        // A completed task is never restarted
        assert!(!status.start_task("build"));
        assert!(status.executing.is_empty());
    }

    #[test]
    fn test_first_failure_wins() {
        let mut status = ExecutionStatus::default();
        assert!(status.fail(Failure::task_failed("build", "exit code 1")));
        assert!(!status.fail(Failure::clone_failed("late")));

        let failure = status.failure.as_ref().unwrap();
        assert_eq!(failure.stage, FailureStage::Task);
        assert_eq!(failure.task.as_deref(), Some("build"));
        assert_eq!(status.phase(), Phase::Error);
        assert!(status.is_terminal());
    }

    #[test]
    fn test_successor_check() {
        let mut before = ExecutionStatus::default();
        before.mark_volume_provisioned();
        before.start_task("a");
        before.complete_task("a");

        let mut after = before.clone();
        after.start_task("b");
        after.complete_task("b");
        assert!(after.is_successor_of(&before));

        let mut regressed = after.clone();
        regressed.volume_provisioned = false;
        assert!(!regressed.is_successor_of(&before));

        let mut reordered = after.clone();
        reordered.completed_tasks = vec!["b".to_string(), "a".to_string()];
        assert!(!reordered.is_successor_of(&before));
    }

    #[test]
    fn test_failure_display() {
        assert_eq!(
            Failure::task_failed("test", "BackoffLimitExceeded").to_string(),
            "task 'test' failed: BackoffLimitExceeded"
        );
        assert_eq!(
            Failure::configuration("cycle").to_string(),
            "configuration error: cycle"
        );
    }

    #[test]
    fn test_new_execution() {
        let execution = Execution::namespaced("ci", "run-3", spec());
        assert_eq!(execution.key().to_string(), "ci/run-3");
        assert!(execution.metadata.uid.is_none());
        assert!(!execution.status().is_terminal());
        // Owner references need a uid the cluster assigns
        assert!(execution.owner_reference().is_none());
    }

    #[test]
    fn test_owner_reference() {
        let mut execution = Execution::namespaced("ci", "run-4", spec());
        execution.metadata.uid = Some("uid-4".to_string());

        let owner = execution.owner_reference().unwrap();
        assert_eq!(owner.api_version, "bramble.dev/v1alpha1");
        assert_eq!(owner.kind, "Execution");
        assert_eq!(owner.name, "run-4");
        assert_eq!(owner.uid, "uid-4");
        assert_eq!(owner.controller, Some(true));
    }
}
