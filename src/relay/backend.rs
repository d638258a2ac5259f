use bytes::Bytes;
use futures::stream::BoxStream;
use futures_util::StreamExt;

use crate::api::{Client, InferenceRequest};
use crate::error::RelayError;

/// Raw body of a streaming generate call, chunked as it arrives.
pub type ByteStream = BoxStream<'static, Result<Bytes, RelayError>>;

/// The inference backend as seen by the relay and the router. The production
/// implementation is [`Client`]; tests substitute scripted backends.
#[async_trait::async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Opens a streaming call. Resolves once response headers are in; a
    /// non-success status is an error here, before any byte is streamed.
    async fn open_stream(&self, request: &InferenceRequest) -> Result<ByteStream, RelayError>;

    /// Single-shot completion returning the full answer text.
    async fn complete(&self, request: &InferenceRequest) -> Result<String, RelayError>;

    /// Model identifiers the backend can serve.
    async fn models(&self) -> Result<Vec<String>, RelayError>;

    fn endpoint(&self) -> &str;
}

#[async_trait::async_trait]
impl InferenceBackend for Client {
    async fn open_stream(&self, request: &InferenceRequest) -> Result<ByteStream, RelayError> {
        let response = self.generate_stream(request).await?;
        let timeout_secs = self.timeout().as_secs();
        let stream = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| RelayError::from_body_error(e, timeout_secs)));
        Ok(stream.boxed())
    }

    async fn complete(&self, request: &InferenceRequest) -> Result<String, RelayError> {
        Ok(self.generate(request).await?.response)
    }

    async fn models(&self) -> Result<Vec<String>, RelayError> {
        let list = self.list().await?;
        Ok(list.models.into_iter().map(|m| m.name).collect())
    }

    fn endpoint(&self) -> &str {
        self.base_url()
    }
}
