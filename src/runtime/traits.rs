//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the controller with mock implementations.

use crate::llm::ToolDefinition;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Executor for tools
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute a tool by name with cancellation support.
    /// `None` when no capability has that name.
    async fn execute(&self, name: &str, input: Value, cancel: CancellationToken) -> Option<String>;

    /// Whether `name` resolves to a registered capability
    fn supports(&self, name: &str) -> bool;

    /// Get tool definitions for LLM
    fn definitions(&self) -> Vec<ToolDefinition>;
}

#[async_trait]
impl<T: ToolExecutor + ?Sized> ToolExecutor for Arc<T> {
    async fn execute(&self, name: &str, input: Value, cancel: CancellationToken) -> Option<String> {
        (**self).execute(name, input, cancel).await
    }

    fn supports(&self, name: &str) -> bool {
        (**self).supports(name)
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        (**self).definitions()
    }
}
