//! HTTP transport against a OneBot API endpoint

use super::traits::{MessageTransport, SendRequest, StatusReport};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use onebot_shared::limits;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// OneBot HTTP API client
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a client for the API at `base_url`
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(limits::REQUEST_TIMEOUT_MS))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    /// Accepts only HTTP 200 with `status: "ok"` in the body
    async fn check(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let text = response.text().await.context("Failed to read API response")?;
        if status != reqwest::StatusCode::OK {
            bail!("API answered {}: {}", status, text);
        }
        let body: Value = serde_json::from_str(&text)
            .with_context(|| format!("API answered with non-JSON body: {}", text))?;
        if body.get("status").and_then(Value::as_str) != Some("ok") {
            bail!("API rejected the request: {}", text);
        }
        Ok(body)
    }
}

/// Whether a status body reports the endpoint online
pub fn is_online(body: &Value) -> bool {
    body.pointer("/data/online").and_then(Value::as_bool) == Some(true)
}

#[async_trait]
impl MessageTransport for HttpTransport {
    async fn get_status(&self) -> Result<StatusReport> {
        let response = self
            .client
            .get(self.url("get_status"))
            .send()
            .await
            .context("Status request failed")?;
        let body = Self::check(response).await?;
        Ok(StatusReport {
            online: is_online(&body),
        })
    }

    async fn send_msg(&self, request: &SendRequest) -> Result<()> {
        let response = self
            .client
            .post(self.url("send_msg"))
            .json(request)
            .send()
            .await
            .context("Send request failed")?;
        let body = Self::check(response).await?;
        debug!("send_msg answered {}", body);
        Ok(())
    }

    async fn clean_cache(&self) -> Result<()> {
        let response = self
            .client
            .get(self.url("clean_cache"))
            .send()
            .await
            .context("Clean-cache request failed")?;
        Self::check(response).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "HTTP"
    }
}
