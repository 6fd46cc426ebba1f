//! HTTP transport for the Anthropic Messages endpoint.

use reqwest::{Client, StatusCode};
use serde::Deserialize;

use super::types::{MessagesRequest, MessagesResponse};
use crate::error::ErrorKind;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model API returned {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("unreadable model response: {0}")]
    InvalidResponse(String),

    #[error("missing API key: {0}")]
    MissingApiKey(String),

    #[error("model request timed out after {0}s")]
    Timeout(u64),
}

impl LlmError {
    /// Every model failure means the backend could not answer.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ModelBackendUnavailable
    }
}

/// `{"type": "error", "error": {"type": ..., "message": ...}}`
#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

/// Turn a non-success response into an error, preferring the API's own
/// error message over the raw body.
fn api_failure(status: StatusCode, retry_after: Option<u64>, body: &str) -> LlmError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return LlmError::RateLimited { retry_after };
    }
    let message = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => format!("{} ({})", envelope.error.message, envelope.error.kind),
        Err(_) if body.trim().is_empty() => "(no body)".to_string(),
        Err(_) => body.trim().to_string(),
    };
    LlmError::ApiError {
        status: status.as_u16(),
        message,
    }
}

#[derive(Debug)]
pub struct AnthropicClient {
    http: Client,
    api_key: String,
    endpoint: String,
}

impl AnthropicClient {
    /// `base_url` may carry a trailing slash; proxies and mock servers work
    /// as long as they serve `/v1/messages`.
    pub fn new(api_key: String, base_url: &str) -> Self {
        Self {
            http: Client::new(),
            api_key,
            endpoint: format!("{}/v1/messages", base_url.trim_end_matches('/')),
        }
    }

    pub async fn send(&self, request: &MessagesRequest) -> Result<MessagesResponse, LlmError> {
        let response = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(api_failure(status, retry_after, &body));
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }
}
