//! Cluster connection settings
//!
//! Resolution order used by [`ClusterConfig::kube_config`]:
//! 1. `BRAMBLE_API_URL` (plus optional `BRAMBLE_API_TOKEN`)
//! 2. Whatever `kube` infers: the local kubeconfig, then the in-cluster
//!    service account

use kube::Client;

use crate::error::{ClientError, Result};
use crate::k8s::KubeClusterClient;

/// Connection settings for the cluster API
#[derive(Debug, Clone, Default)]
pub struct ClusterConfig {
    /// Base URL of the API server (e.g., "https://10.96.0.1:443").
    /// Unset means infer from the environment.
    pub api_url: Option<String>,

    /// Bearer token sent with every request
    pub token: Option<String>,

    /// Skip TLS verification (development clusters only)
    pub insecure_tls: bool,
}

impl ClusterConfig {
    /// Creates settings for an explicit API server with no authentication
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: Some(api_url.into()),
            ..Self::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Reads settings from the environment
    ///
    /// Environment variables (all optional):
    /// - BRAMBLE_API_URL (overrides kubeconfig and in-cluster discovery)
    /// - BRAMBLE_API_TOKEN
    /// - BRAMBLE_INSECURE_TLS ("true" or "1" to skip verification)
    pub fn from_env() -> Self {
        Self {
            api_url: std::env::var("BRAMBLE_API_URL").ok().filter(|u| !u.is_empty()),
            token: std::env::var("BRAMBLE_API_TOKEN").ok().filter(|t| !t.is_empty()),
            insecure_tls: std::env::var("BRAMBLE_INSECURE_TLS")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false),
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(api_url) = &self.api_url {
            if !api_url.starts_with("http://") && !api_url.starts_with("https://") {
                return Err(ClientError::ConfigError(
                    "api_url must start with http:// or https://".into(),
                ));
            }
        }

        Ok(())
    }

    /// Resolves these settings into a `kube` client configuration
    pub async fn kube_config(&self) -> Result<kube::Config> {
        self.validate()?;

        let mut config = match &self.api_url {
            Some(api_url) => {
                let uri = api_url.parse().map_err(|e| {
                    ClientError::ConfigError(format!("Invalid api_url '{}': {}", api_url, e))
                })?;
                kube::Config::new(uri)
            }
            None => kube::Config::infer().await.map_err(|e| {
                ClientError::ConfigError(format!(
                    "BRAMBLE_API_URL not set and no cluster could be inferred: {}",
                    e
                ))
            })?,
        };

        if let Some(token) = &self.token {
            config.auth_info.token = Some(token.clone().into());
        }
        if self.insecure_tls {
            config.accept_invalid_certs = true;
        }

        Ok(config)
    }

    /// Builds a `kube` client from these settings
    pub async fn kube_client(&self) -> Result<Client> {
        let config = self.kube_config().await?;
        Client::try_from(config).map_err(|e| ClientError::ConfigError(e.to_string()))
    }

    /// Connects a cluster client from these settings
    pub async fn connect(&self) -> Result<KubeClusterClient> {
        Ok(KubeClusterClient::new(self.kube_client().await?))
    }
}
