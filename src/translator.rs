//! Loop events to wire protocol
//!
//! The controller emits a heterogeneous sequence of `LoopEvent`s while it
//! runs. `translate` maps every kind to at most one `WireEvent`;
//! `StreamTranslator` adds the terminal guarantees: one `done`, always last,
//! and nothing after it.

use crate::conversation::Role;
use futures::{Stream, StreamExt};
use serde::Serialize;

/// Literal payload of the terminal frame
pub const DONE_SENTINEL: &str = "[DONE]";

/// Internal events produced while a turn executes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopEvent {
    /// A model invocation is starting
    ModelStarted { iteration: u32 },
    /// Incremental model text
    ModelDelta { text: String },
    /// A model invocation finished
    ModelFinished { tool_calls: usize },
    ToolStarted { call_id: String, name: String },
    ToolFinished { call_id: String, name: String },
    /// Answer produced without the model (short-circuit or fallback)
    FinalAnswer { text: String },
    /// Turn-fatal failure
    Failed { message: String },
    /// Loop reached a terminal state
    Finished,
}

/// Outbound streaming protocol unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireEvent {
    Content { content: String, role: Role },
    Tool { content: String },
    Error { message: String },
    #[serde(skip)]
    Done,
}

impl WireEvent {
    pub fn content(text: impl Into<String>) -> Self {
        WireEvent::Content {
            content: text.into(),
            role: Role::Assistant,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, WireEvent::Done)
    }

    /// Payload of the `data:` line
    pub fn data(&self) -> String {
        if self.is_done() {
            return DONE_SENTINEL.to_string();
        }
        serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({ "type": "error", "message": e.to_string() }).to_string()
        })
    }

    /// Complete text/event-stream frame
    pub fn frame(&self) -> String {
        format!("data: {}\n\n", self.data())
    }
}

/// Notice shown while a capability runs
pub fn tool_notice(name: &str) -> String {
    format!("正在调用工具: {name}...")
}

/// Total mapping from loop events to wire events
pub fn translate(event: LoopEvent) -> Option<WireEvent> {
    match event {
        LoopEvent::ModelDelta { text } if text.is_empty() => None,
        LoopEvent::ModelDelta { text } | LoopEvent::FinalAnswer { text } => {
            Some(WireEvent::content(text))
        }
        LoopEvent::ToolStarted { name, .. } => Some(WireEvent::Tool {
            content: tool_notice(&name),
        }),
        LoopEvent::Failed { message } => {
            let message = if message.trim().is_empty() {
                "Internal error".to_string()
            } else {
                message
            };
            Some(WireEvent::Error { message })
        }
        LoopEvent::Finished => Some(WireEvent::Done),
        LoopEvent::ModelStarted { .. }
        | LoopEvent::ModelFinished { .. }
        | LoopEvent::ToolFinished { .. } => None,
    }
}

/// Stateful wrapper enforcing the terminal rules over `translate`
#[derive(Debug, Default)]
pub struct StreamTranslator {
    finished: bool,
}

impl StreamTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Translate one event. A failure is followed immediately by `done`.
    pub fn push(&mut self, event: LoopEvent) -> Vec<WireEvent> {
        if self.finished {
            return Vec::new();
        }

        let failed = matches!(event, LoopEvent::Failed { .. });
        let Some(wire) = translate(event) else {
            return Vec::new();
        };

        if wire.is_done() {
            self.finished = true;
            return vec![wire];
        }
        if failed {
            self.finished = true;
            return vec![wire, WireEvent::Done];
        }
        vec![wire]
    }

    /// Close the stream; yields `done` if it was not already sent
    pub fn finish(&mut self) -> Option<WireEvent> {
        if self.finished {
            None
        } else {
            self.finished = true;
            Some(WireEvent::Done)
        }
    }
}

/// Pull-based translation of a loop event stream.
///
/// Ends with exactly one `done`, even when the producer stops without
/// sending `Finished`.
pub fn translate_stream<S>(events: S) -> impl Stream<Item = WireEvent> + Send
where
    S: Stream<Item = LoopEvent> + Send + 'static,
{
    async_stream::stream! {
        let mut translator = StreamTranslator::new();
        let mut events = std::pin::pin!(events);

        while let Some(event) = events.next().await {
            for wire in translator.push(event) {
                yield wire;
            }
            if translator.is_finished() {
                break;
            }
        }

        if let Some(done) = translator.finish() {
            yield done;
        }
    }
}
