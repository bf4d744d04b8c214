//! Conversation history for a single turn
//!
//! Messages are immutable once appended; `ConversationState` enforces the
//! ordering invariants the model endpoint depends on.

mod message;
mod state;

pub use message::{Message, Role, ToolCall, ToolResult};
pub use state::{ConversationState, ProtocolViolation};
