use axum::extract::State;
use axum::Json;
use serde_json::json;
use stepwise_core::orchestrator::CorrelatedEvent;

use crate::error::AppError;
use crate::state::AppState;

/// POST /raise-event: deliver the completion event for an async action.
///
/// Body: `{"instance_id", "correlation_id", "response"}`. A duplicate event
/// for a token that was already delivered is accepted and ignored.
pub async fn raise_event(
    State(app): State<AppState>,
    Json(event): Json<CorrelatedEvent>,
) -> Result<Json<serde_json::Value>, AppError> {
    tracing::info!(
        instance_id = %event.instance_id,
        correlation_id = %event.correlation_id,
        "completion event received"
    );
    let engine = app.engine.clone();
    let delivered = tokio::task::spawn_blocking(move || engine.raise_event(event))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(json!({ "success": true, "delivered": delivered })))
}
