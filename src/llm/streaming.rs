//! SSE parsing for OpenAI-compatible streaming chat completions
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"text"}}]}
//!
//! data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"rag_search","arguments":"{\"qu"}}]}}]}
//!
//! data: [DONE]
//! ```

use super::types::{LlmResponse, LlmStreamEvent, Usage};
use super::LlmError;
use crate::conversation::ToolCall;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::collections::BTreeMap;

/// Parse a raw byte stream into text deltas followed by one `Completed`.
pub(crate) fn parse_sse_stream<S>(
    byte_stream: S,
) -> impl Stream<Item = Result<LlmStreamEvent, LlmError>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    async_stream::stream! {
        let mut state = SseParserState::default();
        let mut bytes_stream = std::pin::pin!(byte_stream);
        // Raw bytes so multi-byte characters split across chunks survive
        let mut line_buf: Vec<u8> = Vec::new();

        while let Some(chunk) = bytes_stream.next().await {
            let chunk = match chunk {
                Ok(b) => b,
                Err(e) => {
                    yield Err(LlmError::from_reqwest("Stream read failed", &e));
                    return;
                }
            };
            line_buf.extend_from_slice(&chunk);

            while let Some(pos) = line_buf.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = line_buf.drain(..=pos).collect();
                let line = match String::from_utf8(raw) {
                    Ok(s) => s,
                    Err(e) => {
                        yield Err(LlmError::invalid_response(format!("Invalid UTF-8 in stream: {e}")));
                        return;
                    }
                };

                for event in state.process_line(line.trim_end_matches(['\n', '\r'])) {
                    let failed = event.is_err();
                    yield event;
                    if failed {
                        return;
                    }
                }
                if state.done {
                    yield Ok(LlmStreamEvent::Completed(state.take_response()));
                    return;
                }
            }
        }

        // Trailing data without a final blank line
        let rest = String::from_utf8_lossy(&line_buf).trim().to_string();
        if !rest.is_empty() {
            for event in state.process_line(&rest) {
                let failed = event.is_err();
                yield event;
                if failed {
                    return;
                }
            }
        }
        for event in state.dispatch_data() {
            let failed = event.is_err();
            yield event;
            if failed {
                return;
            }
        }

        yield Ok(LlmStreamEvent::Completed(state.take_response()));
    }
}

/// In-progress tool call assembled from fragments
#[derive(Debug, Default)]
struct ToolCallInProgress {
    id: String,
    name: String,
    arguments: String,
}

/// Tracks in-progress streaming state across SSE data lines
#[derive(Debug, Default)]
struct SseParserState {
    /// Accumulated `data:` payload of the current event
    current_data: String,
    text: String,
    tool_calls: BTreeMap<u64, ToolCallInProgress>,
    finish_reason: Option<String>,
    usage: Usage,
    done: bool,
}

impl SseParserState {
    fn process_line(&mut self, line: &str) -> Vec<Result<LlmStreamEvent, LlmError>> {
        if line.is_empty() {
            return self.dispatch_data();
        }

        if let Some(data) = line.strip_prefix("data:") {
            if !self.current_data.is_empty() {
                self.current_data.push('\n');
            }
            self.current_data.push_str(data.trim_start());
        }
        // event:, id: and comment lines carry nothing we use

        Vec::new()
    }

    fn dispatch_data(&mut self) -> Vec<Result<LlmStreamEvent, LlmError>> {
        let data = std::mem::take(&mut self.current_data);
        if data.is_empty() {
            return Vec::new();
        }
        if data == "[DONE]" {
            self.done = true;
            return Vec::new();
        }

        let json: Value = match serde_json::from_str(&data) {
            Ok(v) => v,
            Err(e) => {
                return vec![Err(LlmError::invalid_response(format!(
                    "Malformed stream chunk: {e}"
                )))]
            }
        };

        if let Some(error) = json.get("error") {
            let message = error["message"]
                .as_str()
                .unwrap_or("unknown streaming error");
            return vec![Err(LlmError::server_error(format!(
                "Model stream error: {message}"
            )))];
        }

        if let Some(usage) = json.get("usage").filter(|u| u.is_object()) {
            self.usage = Usage {
                input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0),
                output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
            };
        }

        let mut events = Vec::new();
        let Some(choice) = json["choices"].as_array().and_then(|c| c.first()) else {
            return events;
        };

        let delta = &choice["delta"];
        if let Some(content) = delta["content"].as_str() {
            if !content.is_empty() {
                self.text.push_str(content);
                events.push(Ok(LlmStreamEvent::TextDelta(content.to_string())));
            }
        }

        if let Some(fragments) = delta["tool_calls"].as_array() {
            for fragment in fragments {
                let index = fragment["index"].as_u64().unwrap_or(0);
                let entry = self.tool_calls.entry(index).or_default();
                if let Some(id) = fragment["id"].as_str() {
                    entry.id = id.to_string();
                }
                if let Some(name) = fragment["function"]["name"].as_str() {
                    entry.name.push_str(name);
                }
                if let Some(args) = fragment["function"]["arguments"].as_str() {
                    entry.arguments.push_str(args);
                }
            }
        }

        if let Some(reason) = choice["finish_reason"].as_str() {
            self.finish_reason = Some(reason.to_string());
        }

        events
    }

    fn take_response(&mut self) -> LlmResponse {
        let tool_calls = std::mem::take(&mut self.tool_calls)
            .into_iter()
            .filter(|(_, tc)| !tc.name.is_empty())
            .map(|(_, tc)| {
                let arguments = if tc.arguments.trim().is_empty() {
                    Value::Object(serde_json::Map::new())
                } else {
                    serde_json::from_str(&tc.arguments).unwrap_or_else(|e| {
                        tracing::warn!(tool = %tc.name, error = %e, "Unparseable tool arguments, using {{}}");
                        Value::Object(serde_json::Map::new())
                    })
                };
                let id = if tc.id.is_empty() {
                    format!("call_{}", uuid::Uuid::new_v4().simple())
                } else {
                    tc.id
                };
                ToolCall::new(id, tc.name, arguments)
            })
            .collect();

        LlmResponse {
            content: std::mem::take(&mut self.text),
            tool_calls,
            finish_reason: self.finish_reason.take(),
            usage: self.usage,
        }
    }
}
