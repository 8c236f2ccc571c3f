//! Execution Reconciler
//!
//! Drives one Execution a step closer to its desired state per call:
//!
//! 1. **Volume**: provision the volume and claim
//! 2. **Clone**: clone the repository into the volume
//! 3. **Tasks**: launch runnable tasks and observe running ones
//!
//! Each pass reads the execution fresh, does at most one phase of work and
//! records the result with a single conditional status write. Children are
//! always created before the status write that records them, so a pass
//! interrupted between the two is healed by the next one.

pub mod fetcher;
pub mod provisioner;
pub mod scheduler;


use bramble_client::{ChildKind, ClientError, ClusterClient};
use bramble_core::domain::execution::{Execution, ExecutionStatus, Failure};
use bramble_core::domain::meta::ObjectKey;
use bramble_core::domain::outcome::UnitOutcome;
use bramble_core::naming;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::controller::Action;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::config::ReconcileSettings;

const SOURCE_VOLUME: &str = "source";

/// Transient reconcile failures. Retrying later may succeed.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Cluster request failed: {0}")]
    Client(#[from] ClientError),

    #[error("Refusing to write a status for {0} that undoes recorded progress")]
    StatusRegression(ObjectKey),
}

impl ReconcileError {
    /// True if another writer updated the execution first
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Client(err) if err.is_conflict())
    }
}

/// Outcome of creating a child that may already exist
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ensured {
    Created,
    /// Already there, labelled as this execution's
    Existing,
    /// The name is taken by an object this execution does not own
    Foreign(String),
}

impl Ensured {
    /// Combines two creates: foreign wins, then created
    pub fn and(self, other: Ensured) -> Ensured {
        match (self, other) {
            (Ensured::Foreign(reason), _) | (_, Ensured::Foreign(reason)) => {
                Ensured::Foreign(reason)
            }
            (Ensured::Existing, Ensured::Existing) => Ensured::Existing,
            _ => Ensured::Created,
        }
    }
}

/// Reconciles the execution identified by `key`
pub async fn reconcile(
    client: &dyn ClusterClient,
    key: &ObjectKey,
    settings: &ReconcileSettings,
) -> Result<Action, ReconcileError> {
    let span = info_span!("reconcile", execution = %key);
    reconcile_execution(client, key, settings).instrument(span).await
}

async fn reconcile_execution(
    client: &dyn ClusterClient,
    key: &ObjectKey,
    settings: &ReconcileSettings,
) -> Result<Action, ReconcileError> {
    let Some(execution) = client.get_execution(key).await? else {
        debug!("Execution no longer exists");
        return Ok(Action::await_change());
    };

    if execution.status().is_terminal() {
        debug!(phase = %execution.status().phase(), "Execution already finished");
        return Ok(Action::await_change());
    }

    let mut status = execution.status().clone();

    if !status.repo_cloned {
        if let Err(err) = fetcher::validate_source(&execution) {
            warn!("Invalid source: {}", err);
            return fail(client, &execution, status, Failure::configuration(err.to_string())).await;
        }
    }

    if !status.volume_provisioned {
        if let Ensured::Foreign(reason) =
            provisioner::ensure_volume(client, &execution, settings).await?
        {
            return fail(client, &execution, status, Failure::configuration(reason)).await;
        }
        status.mark_volume_provisioned();
        write_status(client, &execution, status).await?;
        return Ok(Action::requeue(Duration::ZERO));
    }

    if !status.repo_cloned {
        return clone_phase(client, &execution, status, settings).await;
    }

    task_phase(client, &execution, status, settings).await
}

async fn clone_phase(
    client: &dyn ClusterClient,
    execution: &Execution,
    mut status: ExecutionStatus,
    settings: &ReconcileSettings,
) -> Result<Action, ReconcileError> {
    match fetcher::ensure_clone(client, execution, settings).await? {
        Ensured::Created => return Ok(Action::requeue(settings.poll_interval)),
        Ensured::Foreign(reason) => {
            return fail(client, execution, status, Failure::configuration(reason)).await;
        }
        Ensured::Existing => {}
    }

    match fetcher::observe_clone(client, execution).await? {
        UnitOutcome::Succeeded => {
            info!("Repository cloned");
            status.mark_repo_cloned();
            write_status(client, execution, status).await?;
            Ok(Action::requeue(Duration::ZERO))
        }
        UnitOutcome::Failed { reason } => {
            warn!("Clone failed: {}", reason);
            fail(client, execution, status, Failure::clone_failed(reason)).await
        }
        UnitOutcome::Running => Ok(Action::requeue(settings.poll_interval)),
    }
}

async fn task_phase(
    client: &dyn ClusterClient,
    execution: &Execution,
    mut status: ExecutionStatus,
    settings: &ReconcileSettings,
) -> Result<Action, ReconcileError> {
    let pipeline_key = ObjectKey::new(execution.namespace(), execution.spec.pipeline.as_str());
    let Some(pipeline) = client.get_pipeline(&pipeline_key).await? else {
        warn!(pipeline = %pipeline_key, "Pipeline not found, waiting for it to appear");
        return Ok(Action::requeue(settings.poll_interval));
    };
    let tasks = &pipeline.spec;

    if let Err(err) = scheduler::check_pipeline(execution, tasks, &status) {
        warn!(pipeline = %pipeline_key, "Invalid pipeline: {}", err);
        return fail(client, execution, status, Failure::configuration(err.to_string())).await;
    }

    // Declaration order keeps completion order stable within one pass
    let executing: Vec<_> = tasks
        .tasks
        .iter()
        .filter(|task| status.executing.contains(&task.name))
        .collect();

    for task in executing {
        match scheduler::observe_task(client, execution, task).await? {
            UnitOutcome::Succeeded => {
                info!(task = %task.name, "Task completed");
                status.complete_task(&task.name);
            }
            UnitOutcome::Failed { reason } => {
                warn!(task = %task.name, "Task failed: {}", reason);
                status.fail(Failure::task_failed(task.name.as_str(), reason));
            }
            UnitOutcome::Running => {}
        }
    }

    if status.error {
        write_status(client, execution, status).await?;
        return Ok(Action::await_change());
    }

    if tasks.task_names().all(|name| status.is_task_completed(name)) {
        info!(tasks = tasks.tasks.len(), "All tasks completed");
        status.mark_completed();
        write_status(client, execution, status).await?;
        return Ok(Action::await_change());
    }

    let mut runnable = scheduler::next_runnable(tasks, &status.completed_tasks, &status.executing);
    if settings.max_parallel_tasks > 0 {
        let room = settings
            .max_parallel_tasks
            .saturating_sub(status.executing.len());
        if runnable.len() > room {
            debug!(waiting = runnable.len() - room, "Parallel task limit reached");
        }
        runnable.truncate(room);
    }

    for name in runnable {
        let Some(task) = tasks.task(&name) else {
            continue;
        };
        if let Ensured::Foreign(reason) =
            scheduler::launch_task(client, execution, task, settings).await?
        {
            return fail(client, execution, status, Failure::configuration(reason)).await;
        }
        status.start_task(&name);
    }

    write_status(client, execution, status).await?;
    Ok(Action::requeue(settings.poll_interval))
}

/// Records a terminal failure and stops reconciling
async fn fail(
    client: &dyn ClusterClient,
    execution: &Execution,
    mut status: ExecutionStatus,
    failure: Failure,
) -> Result<Action, ReconcileError> {
    status.fail(failure);
    write_status(client, execution, status).await?;
    Ok(Action::await_change())
}

/// Writes `status` back if it differs from what was loaded
///
/// The write carries the loaded resource version, so it fails with a
/// conflict if anyone else wrote in between.
async fn write_status(
    client: &dyn ClusterClient,
    loaded: &Execution,
    status: ExecutionStatus,
) -> Result<(), ReconcileError> {
    if &status == loaded.status() {
        return Ok(());
    }

    if !status.is_successor_of(loaded.status()) {
        return Err(ReconcileError::StatusRegression(loaded.key()));
    }

    let mut updated = loaded.clone();
    updated.status = Some(status);
    client.replace_execution_status(&updated).await?;

    debug!(phase = %updated.status().phase(), "Status written");
    Ok(())
}

/// Settles a create call
///
/// A taken name counts as this execution's child only when the existing
/// object carries every label [`child_labels`] would have put on it.
pub(crate) async fn ensure_child(
    client: &dyn ClusterClient,
    execution: &Execution,
    kind: ChildKind,
    name: &str,
    created: Result<(), ClientError>,
) -> Result<Ensured, ClientError> {
    match created {
        Ok(()) => return Ok(Ensured::Created),
        Err(err) if err.is_already_exists() => {}
        Err(err) => return Err(err),
    }

    let Some(labels) = client.get_labels(kind, execution.namespace(), name).await? else {
        // Deleted between the create and the read; the next pass creates it
        return Err(ClientError::NotFound(format!("{} {}", kind, name)));
    };

    let owned = child_labels(execution)
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value));
    if owned {
        Ok(Ensured::Existing)
    } else {
        Ok(Ensured::Foreign(format!(
            "{} '{}' already exists and belongs to another execution",
            kind, name
        )))
    }
}

/// Labels put on every child of an execution
pub(crate) fn child_labels(execution: &Execution) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from([
        (
            naming::LABEL_EXECUTION.to_string(),
            naming::child_base(execution.name()),
        ),
        (
            naming::LABEL_NAMESPACE.to_string(),
            execution.namespace().to_string(),
        ),
    ]);
    if let Some(uid) = &execution.metadata.uid {
        labels.insert(naming::LABEL_EXECUTION_UID.to_string(), uid.clone());
    }
    labels
}

/// Run-to-completion job with the execution's claim mounted at its source path
pub(crate) fn unit_job(
    execution: &Execution,
    settings: &ReconcileSettings,
    name: String,
    labels: BTreeMap<String, String>,
    mut container: Container,
) -> Job {
    container.volume_mounts = Some(vec![VolumeMount {
        name: SOURCE_VOLUME.to_string(),
        mount_path: settings.source_path(execution.name()),
        ..Default::default()
    }]);

    Job {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(execution.namespace().to_string()),
            labels: Some(labels.clone()),
            owner_references: execution.owner_reference().map(|owner| vec![owner]),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(settings.job_backoff_limit),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    containers: vec![container],
                    volumes: Some(vec![Volume {
                        name: SOURCE_VOLUME.to_string(),
                        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                            claim_name: naming::claim_name(execution.name()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}
