//! Events that drive the loop

use crate::conversation::{ToolCall, ToolResult};

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Start the turn
    Begin,

    // Model events
    ModelResponded {
        content: String,
        tool_calls: Vec<ToolCall>,
    },
    ModelFailed {
        message: String,
    },

    // Tool events
    /// All calls of the batch finished; results are in request order
    ToolsCompleted {
        results: Vec<ToolResult>,
    },
    /// A call named a capability that is not registered
    DispatchFailed {
        message: String,
    },

    /// Caller cancelled or the client went away
    Cancelled,
}
