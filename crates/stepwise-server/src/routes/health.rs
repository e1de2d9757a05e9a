/// GET /health: liveness probe.
pub async fn health() -> &'static str {
    "Ok"
}
