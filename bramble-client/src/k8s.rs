//! Cluster client backed by typed `kube` API handles

use async_trait::async_trait;
use bramble_core::domain::execution::Execution;
use bramble_core::domain::meta::ObjectKey;
use bramble_core::domain::outcome::UnitOutcome;
use bramble_core::domain::pipeline::Pipeline;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use kube::api::{Api, ListParams, PostParams};
use kube::{Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt::Debug;
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::{ChildKind, ClusterClient};

/// Talks to a real API server
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Underlying `kube` client, shared with watch streams
    pub fn kube_client(&self) -> Client {
        self.client.clone()
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

async fn create_child<K>(api: Api<K>, object: &K) -> Result<()>
where
    K: Resource + Clone + Debug + Serialize + DeserializeOwned,
{
    api.create(&PostParams::default(), object).await?;
    Ok(())
}

async fn labels_of<K>(api: Api<K>, name: &str) -> Result<Option<BTreeMap<String, String>>>
where
    K: Resource + Clone + Debug + DeserializeOwned,
{
    Ok(api
        .get_opt(name)
        .await?
        .map(|object| object.meta().labels.clone().unwrap_or_default()))
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_execution(&self, key: &ObjectKey) -> Result<Option<Execution>> {
        let api: Api<Execution> = self.namespaced(&key.namespace);
        Ok(api.get_opt(&key.name).await?)
    }

    async fn list_executions(&self, namespace: Option<&str>) -> Result<Vec<Execution>> {
        let api: Api<Execution> = match namespace {
            Some(ns) => self.namespaced(ns),
            None => Api::all(self.client.clone()),
        };
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn create_execution(&self, execution: &Execution) -> Result<Execution> {
        let api: Api<Execution> = self.namespaced(execution.namespace());
        Ok(api.create(&PostParams::default(), execution).await?)
    }

    async fn replace_execution_status(&self, execution: &Execution) -> Result<Execution> {
        debug!(
            "Replacing status of {} at version {:?}",
            execution.key(),
            execution.metadata.resource_version
        );

        // The body carries metadata.resourceVersion, so a stale write is rejected
        let body = serde_json::to_vec(execution).map_err(|e| ClientError::ParseError(e.to_string()))?;
        let api: Api<Execution> = self.namespaced(execution.namespace());
        Ok(api
            .replace_status(execution.name(), &PostParams::default(), body)
            .await?)
    }

    async fn get_pipeline(&self, key: &ObjectKey) -> Result<Option<Pipeline>> {
        let api: Api<Pipeline> = self.namespaced(&key.namespace);
        Ok(api.get_opt(&key.name).await?)
    }

    async fn list_pipelines(&self, namespace: &str) -> Result<Vec<Pipeline>> {
        let api: Api<Pipeline> = self.namespaced(namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn create_volume(&self, volume: &PersistentVolume) -> Result<()> {
        debug!("Creating volume {:?}", volume.metadata.name);
        create_child(Api::all(self.client.clone()), volume).await
    }

    async fn create_volume_claim(&self, claim: &PersistentVolumeClaim) -> Result<()> {
        debug!("Creating claim {}", ObjectKey::of(claim));
        let namespace = claim.metadata.namespace.as_deref().unwrap_or_default();
        create_child(self.namespaced(namespace), claim).await
    }

    async fn create_job(&self, job: &Job) -> Result<()> {
        debug!("Creating job {}", ObjectKey::of(job));
        let namespace = job.metadata.namespace.as_deref().unwrap_or_default();
        create_child(self.namespaced(namespace), job).await
    }

    async fn get_job_outcome(&self, namespace: &str, name: &str) -> Result<Option<UnitOutcome>> {
        let api: Api<Job> = self.namespaced(namespace);
        Ok(api.get_opt(name).await?.map(|job| UnitOutcome::from_job(&job)))
    }

    async fn get_labels(
        &self,
        kind: ChildKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        match kind {
            ChildKind::Volume => {
                labels_of::<PersistentVolume>(Api::all(self.client.clone()), name).await
            }
            ChildKind::Claim => {
                labels_of::<PersistentVolumeClaim>(self.namespaced(namespace), name).await
            }
            ChildKind::Job => labels_of::<Job>(self.namespaced(namespace), name).await,
        }
    }
}
