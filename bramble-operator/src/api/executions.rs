//! Execution API Handlers
//!
//! Read-only view of executions and their progress.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use bramble_core::domain::meta::ObjectKey;
use bramble_core::dto::execution::ExecutionSummary;

use crate::api::error::{ApiError, ApiResult};
use crate::api::{AppState, NamespaceQuery};

/// GET /api/executions
/// List executions, optionally restricted to one namespace
pub async fn list_executions(
    State(state): State<AppState>,
    Query(query): Query<NamespaceQuery>,
) -> ApiResult<Json<Vec<ExecutionSummary>>> {
    let namespace = query.requested()?.or(state.namespace.as_deref());
    tracing::debug!("Listing executions in {}", namespace.unwrap_or("all namespaces"));

    let executions = state.client.list_executions(namespace).await?;

    Ok(Json(executions.iter().map(ExecutionSummary::from).collect()))
}

/// GET /api/executions/{namespace}/{name}
/// Get one execution
pub async fn get_execution(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<Json<ExecutionSummary>> {
    let key = ObjectKey::new(namespace, name);
    tracing::debug!("Getting execution {}", key);

    let execution = state
        .client
        .get_execution(&key)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Execution {} not found", key)))?;

    Ok(Json(ExecutionSummary::from(&execution)))
}
