pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use stepwise_core::Engine;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(engine: Arc<Engine>) -> Router {
    let app_state = state::AppState::new(engine);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Workflows
        .route("/workflows", get(routes::workflows::list_workflows))
        .route("/workflows", post(routes::workflows::start_workflow))
        .route(
            "/workflows/{instance_id}",
            get(routes::workflows::query_workflow),
        )
        // Correlated completion events
        .route("/raise-event", post(routes::events::raise_event))
        .route("/health", get(routes::health::health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Serve on a listener the caller already bound (useful with port 0),
/// resuming unfinished instances first.
pub async fn serve_on(engine: Arc<Engine>, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let actual_port = listener.local_addr()?.port();

    let resumed = engine.resume_incomplete()?;
    if resumed > 0 {
        tracing::info!(resumed, "resumed unfinished instances");
    }

    let app = build_router(engine);
    tracing::info!("stepwise server listening on http://localhost:{actual_port}");
    axum::serve(listener, app).await?;
    Ok(())
}
