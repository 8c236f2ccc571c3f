//! Task Scheduler
//!
//! Decides which pipeline tasks may start and runs each one as a job
//! against the cloned repository. Dependency resolution is pure; only
//! `launch_task` and `observe_task` touch the cluster.

use bramble_client::{ChildKind, ClientError, ClusterClient};
use bramble_core::domain::execution::{Execution, ExecutionStatus};
use bramble_core::domain::outcome::UnitOutcome;
use bramble_core::domain::pipeline::{PipelineError, PipelineSpec, TaskSpec};
use bramble_core::naming;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Container, EnvVar};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::config::ReconcileSettings;
use crate::reconciler::{Ensured, child_labels, ensure_child, unit_job};

/// Tasks ready to start, in pipeline declaration order
///
/// A task is ready when it is neither completed nor executing and every
/// task it depends on has completed.
pub fn next_runnable(
    pipeline: &PipelineSpec,
    completed: &[String],
    executing: &BTreeSet<String>,
) -> Vec<String> {
    let done = |name: &str| completed.iter().any(|c| c == name);

    pipeline
        .tasks
        .iter()
        .filter(|task| !done(&task.name) && !executing.contains(&task.name))
        .filter(|task| task.depends_on.iter().all(|dep| done(dep)))
        .map(|task| task.name.clone())
        .collect()
}

/// Checks a pipeline can run for this execution
///
/// On top of the pipeline's own validation, the status must not reference
/// tasks the pipeline lacks and every generated job name must fit a label.
pub fn check_pipeline(
    execution: &Execution,
    pipeline: &PipelineSpec,
    status: &ExecutionStatus,
) -> Result<(), PipelineError> {
    pipeline.validate()?;

    let recorded = status.executing.iter().chain(status.completed_tasks.iter());
    for task in recorded {
        if !pipeline.contains(task) {
            return Err(PipelineError::UnknownTask(task.clone()));
        }
    }

    for task in pipeline.task_names() {
        let job_name = naming::task_job_name(execution.name(), task);
        if !naming::fits_label(&job_name) {
            return Err(PipelineError::JobNameTooLong(job_name));
        }
    }

    Ok(())
}

pub fn task_job(execution: &Execution, task: &TaskSpec, settings: &ReconcileSettings) -> Job {
    let mut labels = child_labels(execution);
    labels.insert(naming::LABEL_TASK.to_string(), naming::sanitize(&task.name));

    let mut env = [
        ("BRAMBLE_EXECUTION", execution.name()),
        ("BRAMBLE_TASK", task.name.as_str()),
        ("BRAMBLE_REPO", execution.spec.repo.as_str()),
        ("BRAMBLE_BRANCH", execution.spec.branch.as_str()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect::<BTreeMap<_, _>>();
    env.extend(task.env.clone());

    let container = Container {
        name: naming::sanitize(&task.name),
        image: Some(task.image.clone()),
        command: (!task.command.is_empty()).then(|| task.command.clone()),
        env: Some(
            env.into_iter()
                .map(|(name, value)| EnvVar {
                    name,
                    value: Some(value),
                    ..Default::default()
                })
                .collect(),
        ),
        working_dir: Some(format!(
            "{}/{}",
            settings.source_path(execution.name()),
            execution.clone_dir()
        )),
        ..Default::default()
    };

    unit_job(
        execution,
        settings,
        naming::task_job_name(execution.name(), &task.name),
        labels,
        container,
    )
}

/// Creates a task's job
pub async fn launch_task(
    client: &dyn ClusterClient,
    execution: &Execution,
    task: &TaskSpec,
    settings: &ReconcileSettings,
) -> Result<Ensured, ClientError> {
    let name = naming::task_job_name(execution.name(), &task.name);
    let created = client.create_job(&task_job(execution, task, settings)).await;
    let state = ensure_child(client, execution, ChildKind::Job, &name, created).await?;

    match state {
        Ensured::Created => info!(
            execution = %execution.key(),
            task = %task.name,
            "Launched job {} ({})", name, task.image
        ),
        Ensured::Existing => {
            debug!(execution = %execution.key(), task = %task.name, "Task job already exists")
        }
        Ensured::Foreign(_) => {}
    }

    Ok(state)
}

/// Observes a task's job
///
/// A job that vanished while its task is executing fails the task: its
/// outcome can no longer be known, and running it again could repeat side
/// effects of a run that already happened.
pub async fn observe_task(
    client: &dyn ClusterClient,
    execution: &Execution,
    task: &TaskSpec,
) -> Result<UnitOutcome, ClientError> {
    let name = naming::task_job_name(execution.name(), &task.name);

    match client.get_job_outcome(execution.namespace(), &name).await? {
        Some(outcome) => Ok(outcome),
        None => {
            warn!(
                execution = %execution.key(),
                task = %task.name,
                "Job {} is missing", name
            );
            Ok(UnitOutcome::Failed {
                reason: "job disappeared before its outcome was observed".to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bramble_client::InMemoryCluster;
    use bramble_core::domain::execution::ExecutionSpec;

    fn diamond() -> PipelineSpec {
        PipelineSpec {
            tasks: vec![
                TaskSpec::new("a", "alpine"),
                TaskSpec::new("b", "alpine").depends_on("a"),
                TaskSpec::new("c", "alpine").depends_on("a"),
                TaskSpec::new("d", "alpine").depends_on("b").depends_on("c"),
            ],
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn execution(clone_dir: &str) -> Execution {
        Execution::namespaced(
            "ci",
            "run-1",
            ExecutionSpec {
                pipeline: "p1".to_string(),
                repo: "git://x/y".to_string(),
                branch: "main".to_string(),
                clone_dir: clone_dir.to_string(),
            },
        )
    }

    #[test]
    fn test_next_runnable_follows_dependencies() {
        let pipeline = diamond();
        let none = BTreeSet::new();

        assert_eq!(next_runnable(&pipeline, &[], &none), names(&["a"]));
        assert_eq!(next_runnable(&pipeline, &names(&["a"]), &none), names(&["b", "c"]));
        assert_eq!(next_runnable(&pipeline, &names(&["a", "c"]), &none), names(&["b"]));
        assert_eq!(
            next_runnable(&pipeline, &names(&["a", "c", "b"]), &none),
            names(&["d"])
        );
        assert!(next_runnable(&pipeline, &names(&["a", "b", "c", "d"]), &none).is_empty());
    }

    #[test]
    fn test_next_runnable_skips_executing() {
        let pipeline = diamond();
        let executing: BTreeSet<String> = names(&["b"]).into_iter().collect();
        assert_eq!(next_runnable(&pipeline, &names(&["a"]), &executing), names(&["c"]));
    }

    #[test]
    fn test_check_pipeline_rejects_unknown_status_task() {
        let mut status = ExecutionStatus::default();
        status.start_task("deploy");
        assert_eq!(
            check_pipeline(&execution(""), &diamond(), &status),
            Err(PipelineError::UnknownTask("deploy".to_string()))
        );
    }

    #[test]
    fn test_check_pipeline_rejects_long_job_names() {
        let pipeline = PipelineSpec {
            tasks: vec![TaskSpec::new("x".repeat(60), "alpine")],
        };
        assert!(matches!(
            check_pipeline(&execution(""), &pipeline, &ExecutionStatus::default()),
            Err(PipelineError::JobNameTooLong(_))
        ));
    }

    fn env(container: &Container, name: &str) -> Option<String> {
        container
            .env
            .iter()
            .flatten()
            .find(|var| var.name == name)
            .and_then(|var| var.value.clone())
    }

    #[test]
    fn test_task_job_shape() {
        let mut task = TaskSpec::new("Unit_Tests", "rust:1").with_command(&["cargo", "test"]);
        task.env.insert("RUST_LOG".to_string(), "debug".to_string());
        task.env.insert("BRAMBLE_BRANCH".to_string(), "override".to_string());

        let job = task_job(&execution("src"), &task, &ReconcileSettings::default());
        assert_eq!(job.metadata.name.as_deref(), Some("run-1-task-unit-tests"));
        let labels = job.metadata.labels.clone().unwrap();
        assert_eq!(labels[naming::LABEL_TASK], "unit-tests");

        let pod = job.spec.unwrap().template.spec.unwrap();
        let claim = pod.volumes.unwrap()[0].persistent_volume_claim.clone().unwrap();
        assert_eq!(claim.claim_name, "run-1-pvc");

        let container = &pod.containers[0];
        assert_eq!(container.name, "unit-tests");
        assert_eq!(container.command, Some(names(&["cargo", "test"])));
        assert_eq!(container.volume_mounts.as_ref().unwrap()[0].mount_path, "/src/run-1");
        assert_eq!(container.working_dir.as_deref(), Some("/src/run-1/src"));
        assert_eq!(env(container, "RUST_LOG").as_deref(), Some("debug"));
        assert_eq!(env(container, "BRAMBLE_TASK").as_deref(), Some("Unit_Tests"));
        // Task env wins over the injected defaults
        assert_eq!(env(container, "BRAMBLE_BRANCH").as_deref(), Some("override"));
    }

    #[test]
    fn test_task_without_command_uses_entrypoint() {
        let job = task_job(
            &execution(""),
            &TaskSpec::new("lint", "alpine"),
            &ReconcileSettings::default(),
        );
        let pod = job.spec.unwrap().template.spec.unwrap();
        assert!(pod.containers[0].command.is_none());
    }

    #[tokio::test]
    async fn test_missing_job_fails_task() {
        let cluster = InMemoryCluster::new();
        let execution = cluster.insert_execution(execution(""));
        let settings = ReconcileSettings::default();
        let task = TaskSpec::new("a", "alpine");

        assert_eq!(
            launch_task(&cluster, &execution, &task, &settings).await.unwrap(),
            Ensured::Created
        );
        assert!(cluster.remove_job("ci", "run-1-task-a"));

        let outcome = observe_task(&cluster, &execution, &task).await.unwrap();
        assert_eq!(
            outcome,
            UnitOutcome::Failed {
                reason: "job disappeared before its outcome was observed".to_string()
            }
        );
        // Never re-run behind the status' back
        assert!(cluster.job("ci", "run-1-task-a").is_none());
    }
}
