//! LLM provider abstraction
//!
//! The loop only needs one operation from a model: stream a response to the
//! current conversation. Text arrives as deltas, then one assembled
//! `Completed` response carrying any tool calls.

mod error;
mod openai;
mod streaming;
mod types;

pub use error::{LlmError, LlmErrorKind};
pub use openai::OpenAIService;
pub use types::*;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Stream of model output for one invocation
pub type LlmStream = Pin<Box<dyn Stream<Item = Result<LlmStreamEvent, LlmError>> + Send>>;

/// Common interface for LLM providers
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Open a streaming completion. Errors here happen before any output.
    async fn stream(&self, request: &LlmRequest) -> Result<LlmStream, LlmError>;

    /// Get the model ID
    fn model_id(&self) -> &str;
}

#[async_trait]
impl<T: LlmService + ?Sized> LlmService for Arc<T> {
    async fn stream(&self, request: &LlmRequest) -> Result<LlmStream, LlmError> {
        (**self).stream(request).await
    }

    fn model_id(&self) -> &str {
        (**self).model_id()
    }
}

/// Connection settings for the OpenAI-compatible endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct LlmConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub temperature: f32,
    pub request_timeout: Duration,
    /// Extra attempts when opening the stream fails with a retryable error
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            request_timeout: Duration::from_secs(120),
            max_retries: 2,
        }
    }
}

/// Logging wrapper for LLM services
pub struct LoggingService {
    inner: Arc<dyn LlmService>,
    model_id: String,
}

impl LoggingService {
    pub fn new(inner: Arc<dyn LlmService>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl LlmService for LoggingService {
    async fn stream(&self, request: &LlmRequest) -> Result<LlmStream, LlmError> {
        let start = std::time::Instant::now();
        let result = self.inner.stream(request).await;

        match result {
            Ok(stream) => {
                tracing::debug!(
                    model = %self.model_id,
                    open_ms = %start.elapsed().as_millis(),
                    messages = request.messages.len(),
                    "LLM stream opened"
                );
                let model_id = self.model_id.clone();
                let logged = stream.inspect(move |item| match item {
                    Ok(LlmStreamEvent::Completed(response)) => {
                        tracing::info!(
                            model = %model_id,
                            duration_ms = %start.elapsed().as_millis(),
                            input_tokens = response.usage.input_tokens,
                            output_tokens = response.usage.output_tokens,
                            tool_calls = response.tool_calls.len(),
                            "LLM request completed"
                        );
                    }
                    Err(e) => {
                        tracing::error!(
                            model = %model_id,
                            duration_ms = %start.elapsed().as_millis(),
                            error = %e.message,
                            "LLM stream failed"
                        );
                    }
                    Ok(LlmStreamEvent::TextDelta(_)) => {}
                });
                Ok(Box::pin(logged))
            }
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %start.elapsed().as_millis(),
                    error = %e.message,
                    retryable = e.kind.is_retryable(),
                    "LLM request failed"
                );
                Err(e)
            }
        }
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
