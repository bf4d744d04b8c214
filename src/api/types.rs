//! API request and response types

use crate::conversation::{Message, ProtocolViolation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Chat completion request
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[allow(dead_code)] // Accepted for client compatibility; sessions are not tracked
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default = "default_stream")]
    pub stream: bool,
}

fn default_stream() -> bool {
    true
}

/// One inbound message
#[derive(Debug, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    /// `text` (default) or `object_string`
    #[serde(default)]
    pub content_type: Option<String>,
}

impl ChatMessage {
    /// Flatten `object_string` parts into plain text. Text parts come first,
    /// then one `[File/Image: <id>]` line per attachment. Anything that does
    /// not parse is passed through untouched.
    pub fn normalized_content(&self) -> String {
        if self.content_type.as_deref() != Some("object_string") {
            return self.content.clone();
        }
        let Ok(parts) = serde_json::from_str::<Vec<Value>>(&self.content) else {
            return self.content.clone();
        };

        let mut text_parts = Vec::new();
        let mut file_parts = Vec::new();
        for part in &parts {
            let field = |key: &str| part.get(key).and_then(Value::as_str).unwrap_or_default();
            match field("type") {
                "text" => text_parts.push(field("text").to_string()),
                "file" | "image" => file_parts.push(format!("[File/Image: {}]", field("file_id"))),
                _ => {}
            }
        }
        text_parts.extend(file_parts);
        let combined = text_parts.join("\n");
        if combined.is_empty() {
            self.content.clone()
        } else {
            combined
        }
    }

    fn into_message(self, index: usize) -> Result<Message, ProtocolViolation> {
        let content = self.normalized_content();
        match self.role.as_str() {
            "user" => Ok(Message::user(content)),
            "assistant" => Ok(Message::assistant(content)),
            "system" => Ok(Message::system(content)),
            _ => Err(ProtocolViolation::UnsupportedRole {
                index,
                role: self.role,
            }),
        }
    }
}

impl ChatRequest {
    /// Convert to conversation history; tool messages and unknown roles
    /// are not accepted from clients.
    pub fn history(self) -> Result<Vec<Message>, ProtocolViolation> {
        self.messages
            .into_iter()
            .enumerate()
            .map(|(index, message)| message.into_message(index))
            .collect()
    }
}

/// Non-streaming completion body
#[derive(Debug, Serialize)]
pub struct CompletionResponse {
    pub choices: Vec<Choice>,
}

#[derive(Debug, Serialize)]
pub struct Choice {
    pub message: AssistantMessage,
}

#[derive(Debug, Serialize)]
pub struct AssistantMessage {
    pub role: &'static str,
    pub content: String,
}

impl CompletionResponse {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            choices: vec![Choice {
                message: AssistantMessage {
                    role: "assistant",
                    content: content.into(),
                },
            }],
        }
    }
}

/// Knowledge ingest request
#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    /// Stored as the `source` of every chunk
    pub source: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub chunks: usize,
}

/// Health check body
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub message: &'static str,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
