//! Append-only conversation history for one turn

use super::message::{Message, Role, ToolCall, ToolResult};
use std::collections::HashSet;
use thiserror::Error;

/// Conversation invariant failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("Conversation has no messages")]
    Empty,
    #[error("Message {index}: {role} messages cannot carry tool calls")]
    UnexpectedToolCalls { index: usize, role: &'static str },
    #[error("Message {index}: {role} messages cannot carry a tool_call_id")]
    UnexpectedToolCallId { index: usize, role: &'static str },
    #[error("Message {index}: tool message is missing its tool_call_id")]
    MissingToolCallId { index: usize },
    #[error("Message {index}: tool result '{call_id}' does not answer an outstanding tool call")]
    OrphanToolResult { index: usize, call_id: String },
    #[error("Message {index}: tool call id '{call_id}' is used more than once")]
    DuplicateToolCallId { index: usize, call_id: String },
    #[error("Message {index}: tool calls [{ids}] were never answered")]
    UnresolvedToolCalls { index: usize, ids: String },
    #[error("Message {index}: unsupported role '{role}'")]
    UnsupportedRole { index: usize, role: String },
}

/// Ordered message history owned by the controller for one turn.
///
/// Invariants:
/// - index 0 is a system message
/// - every tool message answers exactly one unresolved call of the
///   immediately preceding assistant message
/// - a tool call id appended during the turn is never reused in that turn
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationState {
    messages: Vec<Message>,
    /// Call ids of the latest assistant message still awaiting a result
    outstanding: Vec<String>,
    /// Every call id appended since the turn started
    issued: HashSet<String>,
}

impl ConversationState {
    /// Build the state from caller-supplied history, inserting the system
    /// prompt when the history does not start with one.
    pub fn from_history(
        prior: Vec<Message>,
        system_prompt: &str,
    ) -> Result<Self, ProtocolViolation> {
        if prior.is_empty() {
            return Err(ProtocolViolation::Empty);
        }

        let mut messages = prior;
        if messages[0].role != Role::System {
            messages.insert(0, Message::system(system_prompt));
        }

        let outstanding = validate(&messages)?;
        if !outstanding.is_empty() {
            return Err(ProtocolViolation::UnresolvedToolCalls {
                index: messages.len(),
                ids: outstanding.join(", "),
            });
        }

        Ok(Self {
            messages,
            outstanding,
            issued: HashSet::new(),
        })
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Append an assistant message. All earlier tool calls must be resolved.
    pub fn append_assistant(
        &mut self,
        content: impl Into<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Result<(), ProtocolViolation> {
        let index = self.messages.len();
        if !self.outstanding.is_empty() {
            return Err(ProtocolViolation::UnresolvedToolCalls {
                index,
                ids: self.outstanding.join(", "),
            });
        }

        let ids = unique_call_ids(index, &tool_calls)?;
        if let Some(reused) = ids.iter().find(|id| self.issued.contains(*id)) {
            return Err(ProtocolViolation::DuplicateToolCallId {
                index,
                call_id: reused.clone(),
            });
        }
        self.issued.extend(ids.iter().cloned());
        self.messages
            .push(Message::assistant_with_tools(content, tool_calls));
        self.outstanding = ids;
        Ok(())
    }

    /// Append tool results in the given order. Each must answer an
    /// outstanding call of the preceding assistant message.
    pub fn append_tool_results(
        &mut self,
        results: Vec<ToolResult>,
    ) -> Result<(), ProtocolViolation> {
        // Check the whole batch first so a bad result leaves the state untouched
        let mut remaining = self.outstanding.clone();
        for (offset, result) in results.iter().enumerate() {
            resolve(&mut remaining, self.messages.len() + offset, &result.call_id)?;
        }

        self.messages.extend(results.into_iter().map(Message::tool));
        self.outstanding = remaining;
        Ok(())
    }

    /// Content of the newest assistant message without tool calls
    pub fn final_answer(&self) -> Option<&str> {
        self.messages
            .last()
            .filter(|m| m.role == Role::Assistant && !m.has_tool_calls())
            .map(|m| m.content.as_str())
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

/// Check every invariant over a full message list, returning the call ids
/// still outstanding at the end.
fn validate(messages: &[Message]) -> Result<Vec<String>, ProtocolViolation> {
    let mut outstanding: Vec<String> = Vec::new();

    for (index, msg) in messages.iter().enumerate() {
        if msg.has_tool_calls() && msg.role != Role::Assistant {
            return Err(ProtocolViolation::UnexpectedToolCalls {
                index,
                role: msg.role.as_str(),
            });
        }
        if msg.tool_call_id.is_some() && msg.role != Role::Tool {
            return Err(ProtocolViolation::UnexpectedToolCallId {
                index,
                role: msg.role.as_str(),
            });
        }

        match msg.role {
            Role::Tool => {
                let call_id = msg
                    .tool_call_id
                    .as_deref()
                    .ok_or(ProtocolViolation::MissingToolCallId { index })?;
                resolve(&mut outstanding, index, call_id)?;
            }
            Role::Assistant => {
                if !outstanding.is_empty() {
                    return Err(ProtocolViolation::UnresolvedToolCalls {
                        index,
                        ids: outstanding.join(", "),
                    });
                }
                outstanding = unique_call_ids(index, &msg.tool_calls)?;
            }
            Role::System | Role::User => {
                if !outstanding.is_empty() {
                    return Err(ProtocolViolation::UnresolvedToolCalls {
                        index,
                        ids: outstanding.join(", "),
                    });
                }
            }
        }
    }

    Ok(outstanding)
}

fn resolve(
    outstanding: &mut Vec<String>,
    index: usize,
    call_id: &str,
) -> Result<(), ProtocolViolation> {
    match outstanding.iter().position(|id| id == call_id) {
        Some(pos) => {
            outstanding.remove(pos);
            Ok(())
        }
        None => Err(ProtocolViolation::OrphanToolResult {
            index,
            call_id: call_id.to_string(),
        }),
    }
}

fn unique_call_ids(index: usize, calls: &[ToolCall]) -> Result<Vec<String>, ProtocolViolation> {
    let mut ids: Vec<String> = Vec::with_capacity(calls.len());
    for call in calls {
        if ids.contains(&call.id) {
            return Err(ProtocolViolation::DuplicateToolCallId {
                index,
                call_id: call.id.clone(),
            });
        }
        ids.push(call.id.clone());
    }
    Ok(ids)
}
