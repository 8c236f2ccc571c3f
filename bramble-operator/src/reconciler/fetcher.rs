//! Source Fetcher
//!
//! Clones the execution's repository into its volume with a one-shot job.

use bramble_client::{ChildKind, ClientError, ClusterClient};
use bramble_core::domain::execution::Execution;
use bramble_core::domain::outcome::UnitOutcome;
use bramble_core::naming;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Container;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::ReconcileSettings;
use crate::reconciler::{Ensured, child_labels, ensure_child, unit_job};

const CLONER_CONTAINER: &str = "cloner";

/// Problems with an execution's source description
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("Repository cannot be empty")]
    EmptyRepo,

    #[error("Branch cannot be empty")]
    EmptyBranch,

    #[error("Clone directory '{0}' must be a relative path inside the volume")]
    InvalidCloneDir(String),

    #[error("Generated job name '{0}' is longer than 63 characters")]
    NameTooLong(String),
}

/// Checks the source fields before anything is cloned
pub fn validate_source(execution: &Execution) -> Result<(), SourceError> {
    if execution.spec.repo.trim().is_empty() {
        return Err(SourceError::EmptyRepo);
    }
    if execution.spec.branch.trim().is_empty() {
        return Err(SourceError::EmptyBranch);
    }

    let dir = execution.clone_dir();
    let bad_segment = |part: &str| part.is_empty() || part == "." || part == "..";
    if dir.split('/').any(bad_segment) {
        return Err(SourceError::InvalidCloneDir(dir.to_string()));
    }

    let cloner = naming::cloner_name(execution.name());
    if !naming::fits_label(&cloner) {
        return Err(SourceError::NameTooLong(cloner));
    }

    Ok(())
}

/// Quotes a value for a POSIX shell
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Command run by the clone job
///
/// Removes a leftover directory from an earlier attempt so a retried pod
/// starts from a clean checkout.
pub fn clone_command(execution: &Execution) -> Vec<String> {
    let dir = shell_quote(execution.clone_dir());
    let script = format!(
        "rm -rf {dir} && git clone {repo} --branch={branch} {dir}",
        dir = dir,
        repo = shell_quote(&execution.spec.repo),
        branch = shell_quote(&execution.spec.branch),
    );

    vec!["sh".to_string(), "-c".to_string(), script]
}

pub fn clone_job(execution: &Execution, settings: &ReconcileSettings) -> Job {
    let container = Container {
        name: CLONER_CONTAINER.to_string(),
        image: Some(settings.clone_image.clone()),
        command: Some(clone_command(execution)),
        working_dir: Some(settings.source_path(execution.name())),
        ..Default::default()
    };

    unit_job(
        execution,
        settings,
        naming::cloner_name(execution.name()),
        child_labels(execution),
        container,
    )
}

/// Ensures the clone job exists
///
/// Only an [`Ensured::Existing`] job is worth probing for an outcome.
pub async fn ensure_clone(
    client: &dyn ClusterClient,
    execution: &Execution,
    settings: &ReconcileSettings,
) -> Result<Ensured, ClientError> {
    let name = naming::cloner_name(execution.name());
    let created = client.create_job(&clone_job(execution, settings)).await;
    let state = ensure_child(client, execution, ChildKind::Job, &name, created).await?;

    match state {
        Ensured::Created => info!(
            execution = %execution.key(),
            "Cloning {} ({}) into {}",
            execution.spec.repo,
            execution.spec.branch,
            settings.source_path(execution.name())
        ),
        Ensured::Existing => {
            debug!(execution = %execution.key(), "Clone job {} already exists", name)
        }
        Ensured::Foreign(_) => {}
    }

    Ok(state)
}

/// Observes the clone job. A job that is not there yet counts as running.
pub async fn observe_clone(
    client: &dyn ClusterClient,
    execution: &Execution,
) -> Result<UnitOutcome, ClientError> {
    let name = naming::cloner_name(execution.name());
    let outcome = client.get_job_outcome(execution.namespace(), &name).await?;
    Ok(outcome.unwrap_or(UnitOutcome::Running))
}
