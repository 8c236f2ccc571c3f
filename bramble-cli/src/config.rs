//! Configuration module
//!
//! Handles CLI configuration: which cluster to talk to and which namespace
//! commands act on.

use anyhow::{Context, Result};
use bramble_client::{ClusterConfig, KubeClusterClient};

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace executions are created in and looked up from
    pub namespace: String,

    /// Cluster API URL; falls back to the kubeconfig or in-cluster service when unset
    pub api_url: Option<String>,

    /// Bearer token for the cluster API
    pub token: Option<String>,
}

impl Config {
    /// Connection settings: explicit flags over the environment
    pub fn cluster(&self) -> ClusterConfig {
        let mut cluster = ClusterConfig::from_env();
        if let Some(url) = &self.api_url {
            cluster.api_url = Some(url.clone());
        }
        if let Some(token) = &self.token {
            cluster.token = Some(token.clone());
        }
        cluster
    }

    /// Connects a cluster client from the configured connection settings
    pub async fn client(&self) -> Result<KubeClusterClient> {
        self.cluster()
            .connect()
            .await
            .context("Failed to connect to the cluster")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_environment() {
        let config = Config {
            namespace: "ci".to_string(),
            api_url: Some("https://10.0.0.1:6443".to_string()),
            token: Some("secret".to_string()),
        };
        let cluster = config.cluster();
        assert_eq!(cluster.api_url.as_deref(), Some("https://10.0.0.1:6443"));
        assert_eq!(cluster.token.as_deref(), Some("secret"));
    }
}
