//! Bramble Operator
//!
//! Reconciles Execution resources: provisions a volume, clones the
//! repository into it and runs the pipeline's tasks as jobs in dependency
//! order.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Reconciler: One idempotent step of an execution per call
//! - Controller: Watch-driven `kube` runtime controller with retry backoff
//! - API: Read-only HTTP view of pipelines and executions
//!
//! All progress lives in the Execution status, so the operator can be
//! restarted at any point and picks up where it left off.

mod api;
mod config;
mod controller;
mod reconciler;

use anyhow::{Context, Result};
use bramble_client::{ClusterClient, ClusterConfig, KubeClusterClient};
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::controller::Context as ReconcileContext;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bramble_operator=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Bramble Operator");

    let config = load_config()?;
    info!(
        "Loaded configuration: instance_id={}, namespace={}, bind_addr={}",
        config.instance_id,
        config.namespace.as_deref().unwrap_or("<all>"),
        config.bind_addr
    );

    let cluster_config = ClusterConfig::from_env();
    info!(
        "Using cluster API at {}",
        cluster_config.api_url.as_deref().unwrap_or("<inferred>")
    );
    let kube_client = cluster_config
        .kube_client()
        .await
        .context("Failed to build cluster client")?;
    let client: Arc<dyn ClusterClient> = Arc::new(KubeClusterClient::new(kube_client.clone()));

    wait_for_cluster(client.as_ref(), config.namespace.as_deref()).await?;

    let app = api::create_router(Arc::clone(&client), config.namespace.clone());
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;
    info!("API listening on {}", config.bind_addr);

    let ctx = Arc::new(ReconcileContext::new(client, config.reconcile.clone()));

    tokio::select! {
        result = controller::run(kube_client, ctx, &config) => {
            if let Err(e) = &result {
                error!("Controller error: {:#}", e);
            }
            result
        }
        result = axum::serve(listener, app).into_future() => {
            result.context("API server failed")
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, stopping");
            Ok(())
        }
    }
}

/// Loads configuration from environment variables and validates it
fn load_config() -> Result<Config> {
    let config = Config::from_env().context("Failed to load configuration from environment")?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Waits until the cluster API answers, with exponential backoff
///
/// The operator often starts alongside the API server it talks to.
async fn wait_for_cluster(client: &dyn ClusterClient, namespace: Option<&str>) -> Result<()> {
    const MAX_RETRIES: u32 = 10;
    const INITIAL_DELAY_MS: u64 = 500;
    const MAX_DELAY_MS: u64 = 30_000;

    let mut attempt = 0;
    let mut delay_ms = INITIAL_DELAY_MS;

    loop {
        attempt += 1;

        match client.list_executions(namespace).await {
            Ok(executions) => {
                info!(
                    "Cluster reachable after {} attempt(s), {} execution(s) present",
                    attempt,
                    executions.len()
                );
                return Ok(());
            }
            Err(e) => {
                if attempt >= MAX_RETRIES {
                    error!("Cluster unreachable after {} attempts", MAX_RETRIES);
                    return Err(anyhow::anyhow!("Failed to reach cluster API: {}", e));
                }

                warn!(
                    "Failed to reach cluster API (attempt {}/{}): {}",
                    attempt, MAX_RETRIES, e
                );
                warn!("Retrying in {} ms...", delay_ms);

                tokio::time::sleep(Duration::from_millis(delay_ms)).await;

                // Exponential backoff with cap
                delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
            }
        }
    }
}
