//! Single-shot model invocation with timeout and error classification (C4).
//!
//! Grounded on `examples/Kaikei-e-Alt/recap-worker/recap-worker/src/clients/alt_backend.rs`'s
//! `Client::builder().connect_timeout(..).timeout(..).build()` idiom. The provider itself is a
//! non-goal, so this module only owns the trait boundary, the timeout wrapper, and one HTTP
//! adapter speaking a generic OpenAI-compatible chat-completions shape; no vendor-specific
//! request field or hardcoded host appears anywhere below.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};

use crate::error::WorkerError;

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub num_ctx: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelResponseMessage {
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelResponseChoice {
    pub message: ModelResponseMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelResponse {
    pub choices: Vec<ModelResponseChoice>,
}

impl ModelResponse {
    /// The `choices[0].message.content` payload callers actually want. Empty string if the
    /// provider returned no choices.
    #[must_use]
    pub fn first_content(&self) -> &str {
        self.choices
            .first()
            .map_or("", |choice| choice.message.content.as_str())
    }
}

/// Abstraction over "some multi-modal model server answers chat-completion requests". No
/// concrete vendor, host, or wire dialect is assumed beyond the OpenAI-compatible shape.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn invoke(&self, request: ModelRequest) -> Result<ModelResponse, WorkerError>;
}

/// Issue `request` against `provider`, failing with [`WorkerError::Timeout`] if it does not
/// complete within `timeout`. The caller owns retry policy; this never retries internally.
pub async fn call_with_timeout(
    provider: &dyn ModelProvider,
    request: ModelRequest,
    timeout: Duration,
) -> Result<ModelResponse, WorkerError> {
    match tokio::time::timeout(timeout, provider.invoke(request)).await {
        Ok(result) => result,
        Err(_elapsed) => Err(WorkerError::Timeout(timeout)),
    }
}

#[derive(Debug, Clone)]
pub struct HttpModelProviderConfig {
    pub base_url: String,
    pub connect_timeout: Duration,
    pub total_timeout: Duration,
}

/// Production adapter: POSTs to `{base_url}/v1/chat/completions`.
#[derive(Debug, Clone)]
pub struct HttpModelProvider {
    client: Client,
    base_url: Url,
}

impl HttpModelProvider {
    pub fn new(config: HttpModelProviderConfig) -> Result<Self, WorkerError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.total_timeout)
            .build()
            .map_err(|e| WorkerError::ProviderPermanent(format!("failed to build HTTP client: {e}")))?;
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| WorkerError::ProviderPermanent(format!("invalid model provider base URL: {e}")))?;
        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl ModelProvider for HttpModelProvider {
    async fn invoke(&self, request: ModelRequest) -> Result<ModelResponse, WorkerError> {
        let url = self
            .base_url
            .join("v1/chat/completions")
            .map_err(|e| WorkerError::ProviderPermanent(format!("failed to build request URL: {e}")))?;

        let response = self.client.post(url).json(&request).send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                WorkerError::ProviderTransient(format!("model provider request failed: {e}"))
            } else {
                WorkerError::ProviderPermanent(format!("model provider request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                Err(WorkerError::ProviderTransient(format!(
                    "model provider returned {status}: {body}"
                )))
            } else {
                Err(WorkerError::ProviderPermanent(format!(
                    "model provider returned {status}: {body}"
                )))
            };
        }

        response
            .json::<ModelResponse>()
            .await
            .map_err(|e| WorkerError::ProviderPermanent(format!("failed to decode model response: {e}")))
    }
}
