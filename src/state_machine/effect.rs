//! Effects produced by state transitions

use crate::conversation::{ToolCall, ToolResult};

/// Effects to be executed after state transition, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Invoke the model with the full conversation
    RequestModel { iteration: u32 },

    /// Append an assistant message to the conversation
    AppendAssistant {
        content: String,
        tool_calls: Vec<ToolCall>,
    },

    /// Run every call of the batch (concurrently allowed)
    DispatchTools { calls: Vec<ToolCall> },

    /// Append tool messages in request order
    AppendToolResults { results: Vec<ToolResult> },

    /// Emit an answer the model did not stream
    EmitFinalAnswer { text: String },

    /// Report a turn-fatal failure
    Fail { message: String },

    /// The loop is terminal; close the event stream
    Finish,
}

impl Effect {
    pub fn append_assistant(content: impl Into<String>) -> Self {
        Effect::AppendAssistant {
            content: content.into(),
            tool_calls: vec![],
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Effect::Fail {
            message: message.into(),
        }
    }
}
