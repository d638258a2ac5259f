use std::time::Duration;

use crate::error::RelayError;

pub mod types;

pub use types::{GenerateChunk, GenerateResponse, InferenceRequest, ListResponse, ModelInfo, SamplingOptions};

/// HTTP client for the Ollama API.
///
/// No overall request timeout is set on the inner client: a streaming
/// response can legitimately run for minutes. Callers bound each wait
/// themselves (see [`crate::relay::Relay`]); only connection setup is
/// bounded here.
#[derive(Clone)]
pub struct Client {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl Client {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn map_err(&self, err: reqwest::Error) -> RelayError {
        RelayError::from_reqwest(err, &self.base_url, self.timeout.as_secs())
    }

    /// Starts a streaming generate call and returns the response once headers
    /// arrive. A non-success status is turned into `BackendHttp` carrying the
    /// backend's body.
    pub async fn generate_stream(&self, request: &InferenceRequest) -> Result<reqwest::Response, RelayError> {
        let url = format!("{}/api/generate", self.base_url);
        let response = self.client.post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_err(e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::BackendHttp { status, body });
        }

        Ok(response)
    }

    /// Non-streaming generate. The whole call, body included, is bounded by
    /// the configured timeout.
    pub async fn generate(&self, request: &InferenceRequest) -> Result<GenerateResponse, RelayError> {
        let url = format!("{}/api/generate", self.base_url);
        let response = self.client.post(&url)
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_err(e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::BackendHttp { status, body });
        }

        response.json().await.map_err(|e| self.map_err(e))
    }

    pub async fn list(&self) -> Result<ListResponse, RelayError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.client.get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.map_err(e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::BackendHttp { status, body });
        }

        response.json().await.map_err(|e| self.map_err(e))
    }
}
