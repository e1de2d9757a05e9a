//! HTTP transport through the local application sidecar.
//!
//! Service invocation: `POST {base}/v1.0/invoke/{target}/method/{method}`.
//! Publishing: `POST {base}/v1.0/publish/{pubsub}/{topic}`.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::config::SidecarConfig;
use crate::dispatch::{
    EventPublisher, InvokeResponse, PublishRequest, ServiceInvoker, TransportError,
};

pub struct SidecarClient {
    client: reqwest::Client,
    base_url: String,
    method: String,
    pubsub: String,
}

impl SidecarClient {
    pub fn new(config: &SidecarConfig) -> Self {
        Self::with_base_url(config, config.base_url())
    }

    /// Like `new`, but talking to `base_url` instead of `host:http_port`.
    pub fn with_base_url(config: &SidecarConfig, base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            method: config.method.clone(),
            pubsub: config.pubsub.clone(),
        }
    }

    pub fn invoke_url(&self, target: &str) -> String {
        format!(
            "{}/v1.0/invoke/{target}/method/{}",
            self.base_url, self.method
        )
    }

    pub fn publish_url(&self, topic: &str) -> String {
        format!("{}/v1.0/publish/{}/{topic}", self.base_url, self.pubsub)
    }
}

#[async_trait]
impl ServiceInvoker for SidecarClient {
    async fn invoke(
        &self,
        target: &str,
        correlation_id: &str,
        content: &str,
    ) -> Result<InvokeResponse, TransportError> {
        let url = self.invoke_url(target);
        debug!(%url, correlation_id, "invoking service");
        let resp = self
            .client
            .post(&url)
            .json(&json!({ "correlation_id": correlation_id, "content": content }))
            .send()
            .await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok(InvokeResponse { status, body })
    }
}

#[async_trait]
impl EventPublisher for SidecarClient {
    async fn publish(&self, topic: &str, request: &PublishRequest) -> Result<(), TransportError> {
        let url = self.publish_url(topic);
        debug!(%url, correlation_id = %request.correlation_id, "publishing");
        let resp = self.client.post(&url).json(request).send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(TransportError(format!("publish to '{topic}' returned {status}: {body}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn client(server: &Server) -> SidecarClient {
        SidecarClient::with_base_url(&SidecarConfig::default(), server.url())
    }

    #[test]
    fn urls_follow_sidecar_layout() {
        let c = SidecarClient::new(&SidecarConfig::default());
        assert_eq!(
            c.invoke_url("app1"),
            "http://localhost:3500/v1.0/invoke/app1/method/process"
        );
        assert_eq!(
            c.publish_url("app1"),
            "http://localhost:3500/v1.0/publish/pubsub/app1"
        );
    }

    #[tokio::test]
    async fn invoke_posts_correlation_and_content() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1.0/invoke/app1/method/process")
            .match_body(Matcher::Json(
                json!({"correlation_id": "wf-0", "content": "content1"}),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"processed":"content1"}"#)
            .create_async()
            .await;

        let resp = client(&server)
            .invoke("app1", "wf-0", "content1")
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, r#"{"processed":"content1"}"#);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn invoke_reports_error_status_without_failing() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/v1.0/invoke/app1/method/process")
            .with_status(429)
            .with_body("rate limited")
            .create_async()
            .await;

        let resp = client(&server).invoke("app1", "wf-0", "x").await.unwrap();
        assert!(resp.is_rate_limited());
        assert!(!resp.is_success());
        assert_eq!(resp.body, "rate limited");
    }

    #[tokio::test]
    async fn invoke_transport_error_is_err() {
        let c = SidecarClient::with_base_url(&SidecarConfig::default(), "http://127.0.0.1:1");
        assert!(c.invoke("app1", "wf-0", "x").await.is_err());
    }

    #[tokio::test]
    async fn publish_posts_request_body() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1.0/publish/pubsub/app2")
            .match_body(Matcher::Json(json!({
                "instance_id": "wf",
                "correlation_id": "wf-1",
                "content": "content2"
            })))
            .with_status(204)
            .create_async()
            .await;

        let request = PublishRequest {
            instance_id: "wf".into(),
            correlation_id: "wf-1".into(),
            content: "content2".into(),
        };
        client(&server).publish("app2", &request).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn publish_error_status_is_err() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/v1.0/publish/pubsub/app2")
            .with_status(500)
            .with_body("broker down")
            .create_async()
            .await;

        let request = PublishRequest {
            instance_id: "wf".into(),
            correlation_id: "wf-1".into(),
            content: "x".into(),
        };
        let err = client(&server).publish("app2", &request).await.unwrap_err();
        assert!(err.0.contains("broker down"), "{err}");
    }
}
