//! Controller loop
//!
//! Watches executions (and the jobs they own) through a `kube` runtime
//! controller. Every change to an execution or one of its jobs triggers a
//! reconcile; the runtime runs at most one reconcile per execution at a
//! time and bounds how many run at once.

pub mod context;

pub use context::Context;

use anyhow::Result;
use bramble_core::domain::execution::Execution;
use bramble_core::naming;
use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::watcher;
use kube::{Api, Client};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::reconciler::{self, ReconcileError};

/// One reconcile pass, as invoked by the runtime
///
/// The cached object only names the execution; the reconciler reads it
/// fresh before acting.
pub async fn reconcile(
    execution: Arc<Execution>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let key = execution.key();
    let action = reconciler::reconcile(ctx.client.as_ref(), &key, &ctx.settings).await?;
    ctx.reset(&key);
    Ok(action)
}

/// Retries a failed pass with per-execution exponential backoff
pub fn error_policy(execution: Arc<Execution>, error: &ReconcileError, ctx: Arc<Context>) -> Action {
    let key = execution.key();
    let delay = ctx.record_failure(&key);

    if error.is_conflict() {
        debug!(execution = %key, "Status changed underneath, retrying: {}", error);
    } else {
        warn!(execution = %key, "Reconcile failed, retrying in {:?}: {}", delay, error);
    }

    Action::requeue(delay)
}

/// Runs the controller until its watch streams end
pub async fn run(kube: Client, ctx: Arc<Context>, config: &Config) -> Result<()> {
    let (executions, jobs): (Api<Execution>, Api<Job>) = match &config.namespace {
        Some(ns) => (
            Api::namespaced(kube.clone(), ns),
            Api::namespaced(kube, ns),
        ),
        None => (Api::all(kube.clone()), Api::all(kube)),
    };

    info!(
        instance = %config.instance_id,
        "Starting controller (namespace: {}, max concurrent: {})",
        config.namespace.as_deref().unwrap_or("<all>"),
        config.max_concurrent_reconciles
    );

    let concurrency = u16::try_from(config.max_concurrent_reconciles).unwrap_or(u16::MAX);

    Controller::new(executions, watcher::Config::default())
        .owns(jobs, watcher::Config::default().labels(naming::LABEL_EXECUTION))
        .with_config(controller::Config::default().concurrency(concurrency))
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, action)) => debug!(execution = %object, "Reconciled: {:?}", action),
                Err(e) => debug!("Controller event: {}", e),
            }
        })
        .await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconcileSettings;
    use bramble_client::{ClusterClient, InMemoryCluster};
    use bramble_core::domain::execution::ExecutionSpec;
    use std::time::Duration;

    fn execution(namespace: &str, name: &str) -> Execution {
        Execution::namespaced(
            namespace,
            name,
            ExecutionSpec {
                pipeline: "p1".to_string(),
                repo: "git://x/y".to_string(),
                branch: "main".to_string(),
                clone_dir: String::new(),
            },
        )
    }

    fn context(cluster: Arc<InMemoryCluster>) -> Arc<Context> {
        Arc::new(Context::new(cluster, ReconcileSettings::default()))
    }

    #[tokio::test]
    async fn test_reconcile_reads_fresh_state() {
        let cluster = Arc::new(InMemoryCluster::new());
        let stored = cluster.insert_execution(execution("ci", "run-1"));
        let ctx = context(Arc::clone(&cluster));

        // The cached copy claims the volume is done; the stored one does not
        let mut cached = stored.clone();
        cached.status_mut().mark_volume_provisioned();

        let action = reconcile(Arc::new(cached), Arc::clone(&ctx)).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::ZERO));
        assert_eq!(cluster.volume_names(), vec!["ci.run-1-pv"]);
        assert!(cluster.execution(&stored.key()).unwrap().status().volume_provisioned);
    }

    #[tokio::test]
    async fn test_failures_back_off_and_reset() {
        let cluster = Arc::new(InMemoryCluster::new());
        let stored = Arc::new(cluster.insert_execution(execution("ci", "run-1")));
        let ctx = context(Arc::clone(&cluster));
        cluster.fail_creates_of("ci.run-1-pv");

        for expected in [500, 1000, 2000] {
            let err = reconcile(Arc::clone(&stored), Arc::clone(&ctx))
                .await
                .unwrap_err();
            assert!(!err.is_conflict());
            let action = error_policy(Arc::clone(&stored), &err, Arc::clone(&ctx));
            assert_eq!(action, Action::requeue(Duration::from_millis(expected)));
        }

        cluster.clear_failures();
        reconcile(Arc::clone(&stored), Arc::clone(&ctx)).await.unwrap();
        assert_eq!(ctx.failure_count(&stored.key()), 0);
    }

    #[tokio::test]
    async fn test_deleted_execution_awaits_change() {
        let cluster = Arc::new(InMemoryCluster::new());
        let stored = cluster.insert_execution(execution("ci", "run-1"));
        cluster.remove_execution(&stored.key());

        let ctx = context(Arc::clone(&cluster));
        let action = reconcile(Arc::new(stored), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert!(cluster.list_executions(None).await.unwrap().is_empty());
    }
}
