//! In-memory cluster
//!
//! A process-local implementation of [`ClusterClient`] with the same
//! create/conflict semantics as the API server. Jobs start out running;
//! tests drive them to completion with [`InMemoryCluster::set_job_outcome`].

use async_trait::async_trait;
use bramble_core::domain::execution::Execution;
use bramble_core::domain::meta::ObjectKey;
use bramble_core::domain::outcome::UnitOutcome;
use bramble_core::domain::pipeline::Pipeline;
use chrono::Utc;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::{ChildKind, ClusterClient};
use crate::error::{ClientError, Result};

/// A cluster that lives in memory
#[derive(Default)]
pub struct InMemoryCluster {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    executions: BTreeMap<ObjectKey, Execution>,
    pipelines: BTreeMap<ObjectKey, Pipeline>,
    volumes: BTreeMap<String, PersistentVolume>,
    claims: BTreeMap<ObjectKey, PersistentVolumeClaim>,
    jobs: BTreeMap<ObjectKey, StoredJob>,
    next_version: u64,
    /// Names whose create calls fail with a server error
    failing_creates: HashSet<String>,
    /// Number of create calls that actually created an object
    created: usize,
}

struct StoredJob {
    job: Job,
    outcome: UnitOutcome,
}

impl State {
    fn bump_version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    /// Stamps the fields the API server assigns on create
    fn admit(&mut self, meta: &mut ObjectMeta) {
        meta.uid = Some(Uuid::new_v4().to_string());
        meta.resource_version = Some(self.bump_version());
        meta.creation_timestamp = Some(Time(Utc::now()));
        self.created += 1;
    }

    fn check_create(&self, name: &str) -> Result<()> {
        if self.failing_creates.contains(name) {
            return Err(ClientError::api_error(
                500,
                format!("injected failure creating {}", name),
            ));
        }
        Ok(())
    }
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stores an execution as if a user had applied it
    pub fn insert_execution(&self, mut execution: Execution) -> Execution {
        let mut state = self.state();
        execution
            .metadata
            .uid
            .get_or_insert_with(|| Uuid::new_v4().to_string());
        execution.metadata.resource_version = Some(state.bump_version());
        state.executions.insert(execution.key(), execution.clone());
        execution
    }

    pub fn insert_pipeline(&self, pipeline: Pipeline) {
        self.state()
            .pipelines
            .insert(ObjectKey::of(&pipeline), pipeline);
    }

    pub fn remove_execution(&self, key: &ObjectKey) -> Option<Execution> {
        self.state().executions.remove(key)
    }

    /// Current stored copy of an execution
    pub fn execution(&self, key: &ObjectKey) -> Option<Execution> {
        self.state().executions.get(key).cloned()
    }

    /// Bumps the stored resource version, as a concurrent writer would
    pub fn touch_execution(&self, key: &ObjectKey) {
        let mut state = self.state();
        let version = state.bump_version();
        if let Some(execution) = state.executions.get_mut(key) {
            execution.metadata.resource_version = Some(version);
        }
    }

    /// Sets the observed outcome of a job. Returns false if the job does not exist.
    pub fn set_job_outcome(&self, namespace: &str, name: &str, outcome: UnitOutcome) -> bool {
        match self.state().jobs.get_mut(&ObjectKey::new(namespace, name)) {
            Some(job) => {
                job.outcome = outcome;
                true
            }
            None => false,
        }
    }

    pub fn remove_job(&self, namespace: &str, name: &str) -> bool {
        self.state()
            .jobs
            .remove(&ObjectKey::new(namespace, name))
            .is_some()
    }

    pub fn job(&self, namespace: &str, name: &str) -> Option<Job> {
        self.state()
            .jobs
            .get(&ObjectKey::new(namespace, name))
            .map(|j| j.job.clone())
    }

    /// Names of all jobs in creation-independent (sorted) order
    pub fn job_names(&self) -> Vec<String> {
        self.state().jobs.keys().map(|k| k.name.clone()).collect()
    }

    pub fn volume_names(&self) -> Vec<String> {
        self.state().volumes.keys().cloned().collect()
    }

    pub fn volume(&self, name: &str) -> Option<PersistentVolume> {
        self.state().volumes.get(name).cloned()
    }

    pub fn claim(&self, namespace: &str, name: &str) -> Option<PersistentVolumeClaim> {
        self.state()
            .claims
            .get(&ObjectKey::new(namespace, name))
            .cloned()
    }

    /// Number of objects created through the client API
    pub fn created_count(&self) -> usize {
        self.state().created
    }

    /// Makes every create of `name` fail with a server error
    pub fn fail_creates_of(&self, name: impl Into<String>) {
        self.state().failing_creates.insert(name.into());
    }

    pub fn clear_failures(&self) {
        self.state().failing_creates.clear();
    }
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn get_execution(&self, key: &ObjectKey) -> Result<Option<Execution>> {
        Ok(self.state().executions.get(key).cloned())
    }

    async fn list_executions(&self, namespace: Option<&str>) -> Result<Vec<Execution>> {
        Ok(self
            .state()
            .executions
            .values()
            .filter(|e| namespace.is_none_or(|ns| e.namespace() == ns))
            .cloned()
            .collect())
    }

    async fn create_execution(&self, execution: &Execution) -> Result<Execution> {
        let key = execution.key();
        let mut state = self.state();
        state.check_create(&key.name)?;
        if state.executions.contains_key(&key) {
            return Err(ClientError::AlreadyExists(format!("execution {}", key)));
        }

        let mut stored = execution.clone();
        state.admit(&mut stored.metadata);
        state.executions.insert(key, stored.clone());
        Ok(stored)
    }

    async fn replace_execution_status(&self, execution: &Execution) -> Result<Execution> {
        let key = execution.key();
        let mut state = self.state();
        let version = state.bump_version();

        let stored = state
            .executions
            .get_mut(&key)
            .ok_or_else(|| ClientError::NotFound(format!("execution {}", key)))?;

        if stored.metadata.resource_version != execution.metadata.resource_version {
            return Err(ClientError::Conflict(format!(
                "execution {} has been modified (stored {:?}, given {:?})",
                key, stored.metadata.resource_version, execution.metadata.resource_version
            )));
        }

        stored.status = execution.status.clone();
        stored.metadata.resource_version = Some(version);
        Ok(stored.clone())
    }

    async fn get_pipeline(&self, key: &ObjectKey) -> Result<Option<Pipeline>> {
        Ok(self.state().pipelines.get(key).cloned())
    }

    async fn list_pipelines(&self, namespace: &str) -> Result<Vec<Pipeline>> {
        Ok(self
            .state()
            .pipelines
            .values()
            .filter(|p| p.metadata.namespace.as_deref() == Some(namespace))
            .cloned()
            .collect())
    }

    async fn create_volume(&self, volume: &PersistentVolume) -> Result<()> {
        let name = volume.metadata.name.clone().unwrap_or_default();
        let mut state = self.state();
        state.check_create(&name)?;
        if state.volumes.contains_key(&name) {
            return Err(ClientError::AlreadyExists(format!("volume {}", name)));
        }
        let mut stored = volume.clone();
        state.admit(&mut stored.metadata);
        state.volumes.insert(name, stored);
        Ok(())
    }

    async fn create_volume_claim(&self, claim: &PersistentVolumeClaim) -> Result<()> {
        let key = ObjectKey::of(claim);
        let mut state = self.state();
        state.check_create(&key.name)?;
        if state.claims.contains_key(&key) {
            return Err(ClientError::AlreadyExists(format!("claim {}", key)));
        }
        let mut stored = claim.clone();
        state.admit(&mut stored.metadata);
        state.claims.insert(key, stored);
        Ok(())
    }

    async fn create_job(&self, job: &Job) -> Result<()> {
        let key = ObjectKey::of(job);
        let mut state = self.state();
        state.check_create(&key.name)?;
        if state.jobs.contains_key(&key) {
            return Err(ClientError::AlreadyExists(format!("job {}", key)));
        }
        let mut stored = job.clone();
        state.admit(&mut stored.metadata);
        state.jobs.insert(
            key,
            StoredJob {
                job: stored,
                outcome: UnitOutcome::Running,
            },
        );
        Ok(())
    }

    async fn get_job_outcome(&self, namespace: &str, name: &str) -> Result<Option<UnitOutcome>> {
        Ok(self
            .state()
            .jobs
            .get(&ObjectKey::new(namespace, name))
            .map(|j| j.outcome.clone()))
    }

    async fn get_labels(
        &self,
        kind: ChildKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        let state = self.state();
        let key = ObjectKey::new(namespace, name);
        let meta = match kind {
            ChildKind::Volume => state.volumes.get(name).map(|v| &v.metadata),
            ChildKind::Claim => state.claims.get(&key).map(|c| &c.metadata),
            ChildKind::Job => state.jobs.get(&key).map(|j| &j.job.metadata),
        };
        Ok(meta.map(|m| m.labels.clone().unwrap_or_default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bramble_core::domain::execution::ExecutionSpec;

    fn execution(name: &str) -> Execution {
        Execution::namespaced(
            "ci",
            name,
            ExecutionSpec {
                pipeline: "p1".to_string(),
                repo: "git://x/y".to_string(),
                branch: "main".to_string(),
                clone_dir: String::new(),
            },
        )
    }

    #[tokio::test]
    async fn test_status_write_requires_current_version() {
        let cluster = InMemoryCluster::new();
        let stored = cluster.insert_execution(execution("run-1"));

        let mut first = stored.clone();
        first.status_mut().mark_volume_provisioned();
        let written = cluster.replace_execution_status(&first).await.unwrap();
        assert_ne!(written.metadata.resource_version, stored.metadata.resource_version);

        // A second writer still holding the old version loses
        let mut stale = stored.clone();
        stale.status_mut().mark_repo_cloned();
        let err = cluster.replace_execution_status(&stale).await.unwrap_err();
        assert!(err.is_conflict());

        let current = cluster.execution(&stored.key()).unwrap();
        assert!(current.status().volume_provisioned);
        assert!(!current.status().repo_cloned);
    }

    #[tokio::test]
    async fn test_duplicate_create_reports_already_exists() {
        let cluster = InMemoryCluster::new();
        let created = cluster.create_execution(&execution("run-1")).await.unwrap();
        assert!(created.metadata.uid.is_some());

        let err = cluster.create_execution(&execution("run-1")).await.unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(cluster.created_count(), 1);
    }

    #[tokio::test]
    async fn test_list_filters_namespace() {
        let cluster = InMemoryCluster::new();
        cluster.insert_execution(execution("run-1"));
        let mut other = execution("run-2");
        other.metadata.namespace = Some("other".to_string());
        cluster.insert_execution(other);

        assert_eq!(cluster.list_executions(Some("ci")).await.unwrap().len(), 1);
        assert_eq!(cluster.list_executions(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_labels_of_created_child() {
        let cluster = InMemoryCluster::new();
        let mut job = Job::default();
        job.metadata.name = Some("run-1-cloner".to_string());
        job.metadata.namespace = Some("ci".to_string());
        job.metadata.labels = Some(BTreeMap::from([(
            "bramble-execution".to_string(),
            "run-1".to_string(),
        )]));
        cluster.create_job(&job).await.unwrap();

        let labels = cluster
            .get_labels(ChildKind::Job, "ci", "run-1-cloner")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(labels.get("bramble-execution").map(String::as_str), Some("run-1"));
        assert!(
            cluster
                .get_labels(ChildKind::Claim, "ci", "run-1-pvc")
                .await
                .unwrap()
                .is_none()
        );
        assert!(cluster.job("ci", "run-1-cloner").unwrap().metadata.uid.is_some());
    }
}
