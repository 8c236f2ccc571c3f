//! Pipeline API Handlers
//!
//! Read-only view of the pipelines executions can reference.

use axum::{
    Json,
    extract::{Query, State},
};
use bramble_core::dto::pipeline::PipelineSummary;

use crate::api::error::ApiResult;
use crate::api::{AppState, NamespaceQuery};

/// GET /api/pipelines
/// List pipelines with their tasks
pub async fn list_pipelines(
    State(state): State<AppState>,
    Query(query): Query<NamespaceQuery>,
) -> ApiResult<Json<Vec<PipelineSummary>>> {
    let namespace = state.namespace_or_default(query.requested()?);
    tracing::debug!("Listing pipelines in {}", namespace);

    let pipelines = state.client.list_pipelines(namespace).await?;

    Ok(Json(pipelines.iter().map(PipelineSummary::from).collect()))
}
