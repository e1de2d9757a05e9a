pub mod config;
pub mod event;
pub mod serve;
pub mod workflow;

use std::path::Path;

use anyhow::Context;
use stepwise_core::config::{ConfigOverrides, EngineConfig};

/// Load `.stepwise/config.yaml` and apply environment overrides
/// (`USE_RETRIES`, `DAPR_HTTP_PORT`, `APP_PORT`).
pub fn load_config(root: &Path) -> anyhow::Result<EngineConfig> {
    let mut config = EngineConfig::load(root).context("failed to load config")?;
    config.apply_overrides(&env_overrides()?);
    Ok(config)
}

fn env_overrides() -> anyhow::Result<ConfigOverrides> {
    Ok(ConfigOverrides {
        use_retries: std::env::var("USE_RETRIES").ok().map(|v| parse_flag(&v)),
        sidecar_http_port: env_port("DAPR_HTTP_PORT")?,
        server_port: env_port("APP_PORT")?,
    })
}

fn env_port(name: &str) -> anyhow::Result<Option<u16>> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => {
            let port = v
                .trim()
                .parse()
                .with_context(|| format!("{name}={v} is not a valid port"))?;
            Ok(Some(port))
        }
        _ => Ok(None),
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Server URL for client commands: `--url`, else the configured port.
pub fn client_url(root: &Path, explicit: Option<&str>) -> anyhow::Result<String> {
    let config = load_config(root)?;
    Ok(server_url(explicit, &config))
}

/// Base URL of the server client commands talk to.
pub fn server_url(explicit: Option<&str>, config: &EngineConfig) -> String {
    match explicit {
        Some(url) => url.trim_end_matches('/').to_string(),
        None => format!("http://localhost:{}", config.server.port),
    }
}

/// GET `url` and return the JSON body.
pub fn get_json(url: &str) -> anyhow::Result<serde_json::Value> {
    into_json(ureq::get(url).call(), url)
}

/// POST `body` to `url` and return the JSON body.
pub fn post_json(url: &str, body: &serde_json::Value) -> anyhow::Result<serde_json::Value> {
    into_json(ureq::post(url).send_json(body), url)
}

fn into_json(
    result: Result<ureq::Response, ureq::Error>,
    url: &str,
) -> anyhow::Result<serde_json::Value> {
    match result {
        Ok(resp) => resp
            .into_json()
            .with_context(|| format!("invalid JSON from {url}")),
        Err(ureq::Error::Status(code, resp)) => {
            let body = resp.into_string().unwrap_or_default();
            let message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
                .unwrap_or(body);
            anyhow::bail!("server returned {code}: {message}")
        }
        Err(e) => Err(anyhow::anyhow!(e).context(format!("request to {url} failed"))),
    }
}
