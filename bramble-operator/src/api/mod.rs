//! API Module
//!
//! Read-only HTTP API of the operator, for dashboards and the CLI.
//! Everything is served straight from the cluster; the operator keeps no
//! state of its own.

pub mod error;
pub mod executions;
pub mod health;
pub mod pipelines;

use axum::{Router, http::Method, routing::get};
use bramble_client::ClusterClient;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::error::{ApiError, ApiResult};

const DEFAULT_NAMESPACE: &str = "default";

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub client: Arc<dyn ClusterClient>,

    /// Namespace the operator watches, `None` for all
    pub namespace: Option<String>,
}

/// `?namespace=` filter accepted by the list endpoints
#[derive(Debug, Default, Deserialize)]
pub struct NamespaceQuery {
    pub namespace: Option<String>,
}

impl NamespaceQuery {
    /// The requested namespace; an empty value is rejected
    pub fn requested(&self) -> ApiResult<Option<&str>> {
        match self.namespace.as_deref() {
            Some("") => Err(ApiError::BadRequest(
                "namespace cannot be empty".to_string(),
            )),
            other => Ok(other),
        }
    }
}

impl AppState {
    /// Namespace for endpoints that need exactly one
    pub fn namespace_or_default<'a>(&'a self, requested: Option<&'a str>) -> &'a str {
        requested
            .or(self.namespace.as_deref())
            .unwrap_or(DEFAULT_NAMESPACE)
    }
}

/// Create the API router with all endpoints
pub fn create_router(client: Arc<dyn ClusterClient>, namespace: Option<String>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Pipeline endpoints
        .route("/api/pipelines", get(pipelines::list_pipelines))
        // Execution endpoints
        .route("/api/executions", get(executions::list_executions))
        .route(
            "/api/executions/{namespace}/{name}",
            get(executions::get_execution),
        )
        // Add state and middleware
        .with_state(AppState { client, namespace })
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
