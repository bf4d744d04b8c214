//! Mock implementations for testing
//!
//! These mocks enable turn-level testing without real I/O.

use super::traits::ToolExecutor;
use crate::llm::{
    LlmError, LlmRequest, LlmResponse, LlmService, LlmStream, LlmStreamEvent, ToolDefinition,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Mock LLM
// ============================================================================

/// What one queued model call does
enum Scripted {
    /// Fail before any output
    OpenError(LlmError),
    /// Stream these items, then end
    Items(Vec<Result<LlmStreamEvent, LlmError>>),
}

/// Mock LLM that replays queued responses as streams
pub struct MockLlm {
    script: Mutex<VecDeque<Scripted>>,
    model_id: String,
    /// Record of all requests made
    pub requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlm {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            model_id: model_id.into(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful response; its text arrives as a single delta
    pub fn queue_response(&self, response: LlmResponse) {
        let mut items = Vec::new();
        if !response.content.is_empty() {
            items.push(Ok(LlmStreamEvent::TextDelta(response.content.clone())));
        }
        items.push(Ok(LlmStreamEvent::Completed(response)));
        self.push(Scripted::Items(items));
    }

    /// Queue a text response delivered as the given deltas
    pub fn queue_deltas(&self, deltas: &[&str]) {
        let mut items: Vec<_> = deltas
            .iter()
            .map(|d| Ok(LlmStreamEvent::TextDelta((*d).to_string())))
            .collect();
        items.push(Ok(LlmStreamEvent::Completed(LlmResponse::text(deltas.concat()))));
        self.push(Scripted::Items(items));
    }

    /// Queue a raw stream (for mid-stream failures)
    pub fn queue_stream(&self, items: Vec<Result<LlmStreamEvent, LlmError>>) {
        self.push(Scripted::Items(items));
    }

    /// Queue an error returned when the stream is opened
    pub fn queue_error(&self, error: LlmError) {
        self.push(Scripted::OpenError(error));
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn push(&self, scripted: Scripted) {
        self.script.lock().unwrap().push_back(scripted);
    }

    fn next(&self, request: &LlmRequest) -> Result<LlmStream, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        let scripted = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Scripted::OpenError(LlmError::network("No mock response queued")));
        match scripted {
            Scripted::OpenError(e) => Err(e),
            Scripted::Items(items) => Ok(Box::pin(futures::stream::iter(items))),
        }
    }
}

#[async_trait]
impl LlmService for MockLlm {
    async fn stream(&self, request: &LlmRequest) -> Result<LlmStream, LlmError> {
        self.next(request)
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ============================================================================
// Delayed Mock LLM (for cancellation testing)
// ============================================================================

/// Mock LLM that waits before opening the stream
pub struct DelayedMockLlm {
    inner: MockLlm,
    delay: Duration,
    /// Notified when a request starts (for test synchronization)
    pub request_started: Arc<Notify>,
}

impl DelayedMockLlm {
    pub fn new(model_id: impl Into<String>, delay: Duration) -> Self {
        Self {
            inner: MockLlm::new(model_id),
            delay,
            request_started: Arc::new(Notify::new()),
        }
    }

    pub fn queue_response(&self, response: LlmResponse) {
        self.inner.queue_response(response);
    }
}

#[async_trait]
impl LlmService for DelayedMockLlm {
    async fn stream(&self, request: &LlmRequest) -> Result<LlmStream, LlmError> {
        self.request_started.notify_one();
        tokio::time::sleep(self.delay).await;
        self.inner.next(request)
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}

// ============================================================================
// Mock Tool Executor
// ============================================================================

#[derive(Clone)]
struct MockTool {
    output: String,
    delay: Duration,
}

/// Mock tool executor with predefined outputs and optional delays
pub struct MockToolExecutor {
    tools: HashMap<String, MockTool>,
    definitions: Vec<ToolDefinition>,
    /// Record of tool executions in start order
    pub executions: Mutex<Vec<(String, Value)>>,
    /// Names in completion order
    pub completions: Mutex<Vec<String>>,
}

impl MockToolExecutor {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            definitions: Vec::new(),
            executions: Mutex::new(Vec::new()),
            completions: Mutex::new(Vec::new()),
        }
    }

    /// Add a tool with a predefined output
    pub fn with_tool(self, name: impl Into<String>, output: impl Into<String>) -> Self {
        self.with_delayed_tool(name, output, Duration::ZERO)
    }

    /// Add a tool that sleeps before answering
    pub fn with_delayed_tool(
        mut self,
        name: impl Into<String>,
        output: impl Into<String>,
        delay: Duration,
    ) -> Self {
        let name = name.into();
        self.definitions.push(ToolDefinition {
            name: name.clone(),
            description: format!("Mock {name}"),
            input_schema: serde_json::json!({ "type": "object", "properties": {} }),
        });
        self.tools.insert(
            name,
            MockTool {
                output: output.into(),
                delay,
            },
        );
        self
    }

    pub fn recorded_executions(&self) -> Vec<(String, Value)> {
        self.executions.lock().unwrap().clone()
    }

    pub fn recorded_completions(&self) -> Vec<String> {
        self.completions.lock().unwrap().clone()
    }
}

impl Default for MockToolExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for MockToolExecutor {
    async fn execute(&self, name: &str, input: Value, cancel: CancellationToken) -> Option<String> {
        let tool = self.tools.get(name)?.clone();
        self.executions
            .lock()
            .unwrap()
            .push((name.to_string(), input));

        if !tool.delay.is_zero() {
            tokio::select! {
                () = tokio::time::sleep(tool.delay) => {}
                () = cancel.cancelled() => return Some("[cancelled]".to_string()),
            }
        }

        self.completions.lock().unwrap().push(name.to_string());
        Some(tool.output)
    }

    fn supports(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.definitions.clone()
    }
}
