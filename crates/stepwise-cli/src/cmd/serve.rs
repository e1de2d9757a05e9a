use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use stepwise_core::Engine;

pub fn run(root: &Path, port: Option<u16>) -> anyhow::Result<()> {
    let mut config = super::load_config(root)?;
    if let Some(port) = port {
        config.server.port = port;
    }
    for w in config.validate() {
        tracing::warn!(level = ?w.level, "{}", w.message);
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let engine = Arc::new(
            Engine::from_config(root, &config).context("failed to open engine")?,
        );
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.server.port))
            .await
            .with_context(|| format!("failed to bind port {}", config.server.port))?;
        let actual_port = listener.local_addr()?.port();

        println!(
            "stepwise → http://localhost:{actual_port}  (dispatch: {}, max attempts: {}, sidecar: {})",
            config.dispatch.mode.as_str(),
            engine.policy().max_attempts,
            config.sidecar.base_url()
        );

        tokio::select! {
            res = stepwise_server::serve_on(engine, listener) => res,
            _ = tokio::signal::ctrl_c() => Ok(()),
        }
    })
}
