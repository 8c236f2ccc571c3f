//! Bramble Cluster Client
//!
//! The operator never talks to the cluster directly: every component
//! receives a [`ClusterClient`] handle. Two implementations ship here:
//!
//! - [`KubeClusterClient`]: typed `kube` API handles against a real cluster
//! - [`InMemoryCluster`]: a process-local cluster for tests and dry runs
//!
//! # Example
//!
//! ```no_run
//! use bramble_client::{ClusterClient, ClusterConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = ClusterConfig::new("https://127.0.0.1:6443").connect().await?;
//!
//!     for execution in client.list_executions(Some("ci")).await? {
//!         println!("{}: {}", execution.name(), execution.status().phase());
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
mod k8s;
pub mod memory;

// Re-export commonly used types
pub use config::ClusterConfig;
pub use error::{ClientError, Result};
pub use k8s::KubeClusterClient;
pub use memory::InMemoryCluster;

use async_trait::async_trait;
use bramble_core::domain::execution::Execution;
use bramble_core::domain::meta::ObjectKey;
use bramble_core::domain::outcome::UnitOutcome;
use bramble_core::domain::pipeline::Pipeline;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use std::collections::BTreeMap;
use std::fmt;

/// Kinds of child objects an execution owns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildKind {
    /// Cluster-scoped, the namespace is ignored
    Volume,
    Claim,
    Job,
}

impl fmt::Display for ChildKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            ChildKind::Volume => "volume",
            ChildKind::Claim => "claim",
            ChildKind::Job => "job",
        };
        f.write_str(kind)
    }
}

/// Access to the cluster API
///
/// Create calls fail with [`ClientError::AlreadyExists`] when the name is
/// taken; callers that create idempotently check who owns the existing
/// object through [`ClusterClient::get_labels`]. Status writes fail with
/// [`ClientError::Conflict`] when based on a stale `resourceVersion`.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetches an execution, `None` if it does not exist
    async fn get_execution(&self, key: &ObjectKey) -> Result<Option<Execution>>;

    /// Lists executions in one namespace, or in all namespaces
    async fn list_executions(&self, namespace: Option<&str>) -> Result<Vec<Execution>>;

    /// Creates a new execution
    async fn create_execution(&self, execution: &Execution) -> Result<Execution>;

    /// Replaces the status of an execution
    ///
    /// The write is conditional on `execution.metadata.resource_version`
    /// matching the stored version.
    async fn replace_execution_status(&self, execution: &Execution) -> Result<Execution>;

    /// Fetches a pipeline, `None` if it does not exist
    async fn get_pipeline(&self, key: &ObjectKey) -> Result<Option<Pipeline>>;

    /// Lists pipelines in a namespace
    async fn list_pipelines(&self, namespace: &str) -> Result<Vec<Pipeline>>;

    /// Creates a cluster-scoped volume
    async fn create_volume(&self, volume: &PersistentVolume) -> Result<()>;

    /// Creates a volume claim
    async fn create_volume_claim(&self, claim: &PersistentVolumeClaim) -> Result<()>;

    /// Creates a run-to-completion job
    async fn create_job(&self, job: &Job) -> Result<()>;

    /// Observes a job's outcome, `None` if the job does not exist
    async fn get_job_outcome(&self, namespace: &str, name: &str) -> Result<Option<UnitOutcome>>;

    /// Labels of an existing child object, `None` if it does not exist
    async fn get_labels(
        &self,
        kind: ChildKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>>;
}
