use axum::extract::{Path, State};
use axum::Json;
use serde_json::json;
use stepwise_core::runtime::{InstanceStatus, QueryResponse};

use crate::error::AppError;
use crate::state::AppState;

/// POST /workflows: start an instance from a payload document.
pub async fn start_workflow(
    State(app): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, AppError> {
    let engine = app.engine.clone();
    let instance_id = tokio::task::spawn_blocking(move || engine.start(payload))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(json!({ "success": true, "instance_id": instance_id })))
}

/// GET /workflows: all instances, newest first.
pub async fn list_workflows(
    State(app): State<AppState>,
) -> Result<Json<Vec<InstanceStatus>>, AppError> {
    let engine = app.engine.clone();
    let list = tokio::task::spawn_blocking(move || engine.list())
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(list))
}

/// GET /workflows/{instance_id}: final result, or current status while running.
pub async fn query_workflow(
    State(app): State<AppState>,
    Path(instance_id): Path<String>,
) -> Result<Json<QueryResponse>, AppError> {
    let engine = app.engine.clone();
    let response = tokio::task::spawn_blocking(move || engine.query(&instance_id))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(response))
}
