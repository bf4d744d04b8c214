//! Turn controller
//!
//! Owns the `ConversationState` for one turn, feeds events into the pure
//! `transition` function and executes the resulting effects. The only
//! suspension points are the model call and the tool batch; both race the
//! cancellation token.

use super::traits::ToolExecutor;
use super::{LoopConfig, TurnError, TurnReport};
use crate::conversation::{ConversationState, Message, ToolCall, ToolResult};
use crate::llm::{LlmError, LlmRequest, LlmService, LlmStreamEvent};
use crate::state_machine::{transition, Effect, Event, LoopState};
use crate::tools::DispatchError;
use crate::translator::{translate_stream, LoopEvent, WireEvent};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Loop events buffered between the controller and the transport
const EVENT_BUFFER: usize = 64;

/// Runs turns against one model and one tool executor
pub struct TurnController<L, T>
where
    L: LlmService + 'static,
    T: ToolExecutor + 'static,
{
    llm: L,
    tools: T,
    config: Arc<LoopConfig>,
}

/// Mutable bookkeeping for one running turn
struct Turn {
    conversation: ConversationState,
    events: mpsc::Sender<LoopEvent>,
    cancel: CancellationToken,
    answer: Option<String>,
    error: Option<TurnError>,
    model_calls: u32,
}

impl Turn {
    /// Forward an event; a closed receiver means nobody is listening any more
    async fn emit(&self, event: LoopEvent) {
        if self.events.send(event).await.is_err() && !self.cancel.is_cancelled() {
            tracing::debug!("Event receiver dropped, cancelling turn");
            self.cancel.cancel();
        }
    }
}

impl<L, T> TurnController<L, T>
where
    L: LlmService + 'static,
    T: ToolExecutor + 'static,
{
    pub fn new(llm: L, tools: T, config: Arc<LoopConfig>) -> Self {
        Self { llm, tools, config }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Run a turn on a background task and stream its wire events.
    ///
    /// Dropping the returned stream does not stop the task; cancel the
    /// token for that.
    pub fn spawn_turn(
        self: Arc<Self>,
        prior: Vec<Message>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = WireEvent> + Send + 'static {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(async move {
            self.run(prior, tx, cancel).await;
        });
        translate_stream(ReceiverStream::new(rx))
    }

    /// Run a turn with nobody watching its events; for callers that only
    /// want the report.
    pub async fn run_detached(&self, prior: Vec<Message>, cancel: CancellationToken) -> TurnReport {
        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        // Keep the receiver alive and empty, or the turn cancels itself
        let drain = async move { while rx.recv().await.is_some() {} };
        let (report, ()) = tokio::join!(self.run(prior, tx, cancel), drain);
        report
    }

    /// Run one turn to a terminal state.
    ///
    /// Always sends `LoopEvent::Finished` last, whatever the outcome.
    pub async fn run(
        &self,
        prior: Vec<Message>,
        events: mpsc::Sender<LoopEvent>,
        cancel: CancellationToken,
    ) -> TurnReport {
        let turn_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("turn", %turn_id);
        self.run_inner(prior, events, cancel).instrument(span).await
    }

    async fn run_inner(
        &self,
        prior: Vec<Message>,
        events: mpsc::Sender<LoopEvent>,
        cancel: CancellationToken,
    ) -> TurnReport {
        let start = Instant::now();
        tracing::info!(messages = prior.len(), model = %self.llm.model_id(), "Turn started");

        let conversation = match ConversationState::from_history(prior, &self.config.system_prompt) {
            Ok(c) => c,
            Err(violation) => {
                tracing::warn!(error = %violation, "Rejected conversation");
                let error = TurnError::from(violation);
                let message = error.to_string();
                let _ = events.send(LoopEvent::Failed { message: message.clone() }).await;
                let _ = events.send(LoopEvent::Finished).await;
                return TurnReport {
                    state: LoopState::Failed { message },
                    answer: None,
                    error: Some(error),
                    messages: Vec::new(),
                    model_calls: 0,
                };
            }
        };

        let mut turn = Turn {
            conversation,
            events,
            cancel,
            answer: None,
            error: None,
            model_calls: 0,
        };

        let state = self.drive(&mut turn).await;

        match &state {
            LoopState::Done { source } => tracing::info!(
                outcome = ?source,
                model_calls = turn.model_calls,
                duration_ms = %start.elapsed().as_millis(),
                "Turn finished"
            ),
            LoopState::Failed { message } => tracing::error!(
                error = %message,
                model_calls = turn.model_calls,
                "Turn failed"
            ),
            _ => tracing::info!(state = state.name(), model_calls = turn.model_calls, "Turn ended"),
        }

        TurnReport {
            state,
            answer: turn.answer,
            error: turn.error,
            messages: turn.conversation.into_messages(),
            model_calls: turn.model_calls,
        }
    }

    /// Event loop: transition, execute effects, repeat until terminal
    async fn drive(&self, turn: &mut Turn) -> LoopState {
        let context = &self.config.context;
        let mut state = LoopState::Idle;
        let mut event = Event::Begin;

        loop {
            let result = match transition(&state, context, event) {
                Ok(result) => result,
                Err(e) => return self.abort(turn, TurnError::Internal(e.to_string())).await,
            };
            tracing::debug!(from = state.name(), to = result.new_state.name(), "Transition");
            state = result.new_state;

            let mut next = None;
            for effect in result.effects {
                match self.execute_effect(turn, effect).await {
                    Ok(Some(produced)) => next = Some(produced),
                    Ok(None) => {}
                    Err(e) => return self.abort(turn, e).await,
                }
            }

            if state.is_terminal() {
                return state;
            }
            event = match next {
                Some(event) => event,
                None => {
                    let message = format!("No event produced in state {}", state.name());
                    return self.abort(turn, TurnError::Internal(message)).await;
                }
            };
        }
    }

    /// Fail the turn outside the state machine (effect or transition bug)
    async fn abort(&self, turn: &mut Turn, error: TurnError) -> LoopState {
        tracing::error!(error = %error, "Aborting turn");
        let message = error.to_string();
        turn.error = Some(error);
        turn.emit(LoopEvent::Failed {
            message: message.clone(),
        })
        .await;
        turn.emit(LoopEvent::Finished).await;
        LoopState::Failed { message }
    }

    async fn execute_effect(
        &self,
        turn: &mut Turn,
        effect: Effect,
    ) -> Result<Option<Event>, TurnError> {
        match effect {
            Effect::RequestModel { iteration } => Ok(Some(self.request_model(turn, iteration).await)),

            Effect::AppendAssistant {
                content,
                tool_calls,
            } => {
                turn.conversation.append_assistant(content, tool_calls)?;
                Ok(None)
            }

            Effect::DispatchTools { calls } => Ok(Some(self.dispatch_tools(turn, calls).await)),

            Effect::AppendToolResults { results } => {
                turn.conversation.append_tool_results(results)?;
                Ok(None)
            }

            Effect::EmitFinalAnswer { text } => {
                turn.emit(LoopEvent::FinalAnswer { text }).await;
                Ok(None)
            }

            Effect::Fail { message } => {
                turn.emit(LoopEvent::Failed { message }).await;
                Ok(None)
            }

            Effect::Finish => {
                if turn.answer.is_none() {
                    turn.answer = turn.conversation.final_answer().map(ToString::to_string);
                }
                turn.emit(LoopEvent::Finished).await;
                Ok(None)
            }
        }
    }

    /// Stream one model response, forwarding deltas as they arrive
    async fn request_model(&self, turn: &mut Turn, iteration: u32) -> Event {
        if turn.cancel.is_cancelled() {
            return Event::Cancelled;
        }

        turn.model_calls += 1;
        turn.emit(LoopEvent::ModelStarted { iteration }).await;

        let request = LlmRequest {
            messages: turn.conversation.messages().to_vec(),
            tools: self.tools.definitions(),
            max_tokens: None,
        };

        let cancel = turn.cancel.clone();
        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => return Event::Cancelled,
            opened = self.llm.stream(&request) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => return model_failed(turn, e),
        };

        loop {
            let item = tokio::select! {
                biased;
                () = cancel.cancelled() => return Event::Cancelled,
                item = stream.next() => item,
            };

            match item {
                Some(Ok(LlmStreamEvent::TextDelta(text))) => {
                    turn.emit(LoopEvent::ModelDelta { text }).await;
                }
                Some(Ok(LlmStreamEvent::Completed(response))) => {
                    turn.emit(LoopEvent::ModelFinished {
                        tool_calls: response.tool_calls.len(),
                    })
                    .await;
                    return Event::ModelResponded {
                        content: response.content,
                        tool_calls: response.tool_calls,
                    };
                }
                Some(Err(e)) => return model_failed(turn, e),
                None => {
                    return model_failed(
                        turn,
                        LlmError::invalid_response("Model stream ended without a response"),
                    )
                }
            }
        }
    }

    /// Run a tool batch concurrently; results come back in request order
    async fn dispatch_tools(&self, turn: &mut Turn, calls: Vec<ToolCall>) -> Event {
        // Resolve every name before anything runs
        if let Some(unknown) = calls.iter().find(|c| !self.tools.supports(&c.name)) {
            return dispatch_failed(turn, DispatchError::UnknownTool {
                name: unknown.name.clone(),
            });
        }

        for call in &calls {
            turn.emit(LoopEvent::ToolStarted {
                call_id: call.id.clone(),
                name: call.name.clone(),
            })
            .await;
        }

        let cancel = turn.cancel.clone();
        let runs = calls.iter().map(|call| self.run_tool(call, cancel.child_token()));
        let outputs = tokio::select! {
            biased;
            () = cancel.cancelled() => return Event::Cancelled,
            outputs = futures::future::join_all(runs) => outputs,
        };

        let mut results = Vec::with_capacity(calls.len());
        for (call, output) in calls.iter().zip(outputs) {
            let Some(content) = output else {
                return dispatch_failed(turn, DispatchError::UnknownTool {
                    name: call.name.clone(),
                });
            };
            turn.emit(LoopEvent::ToolFinished {
                call_id: call.id.clone(),
                name: call.name.clone(),
            })
            .await;
            results.push(ToolResult::new(call.id.clone(), content));
        }

        Event::ToolsCompleted { results }
    }

    async fn run_tool(&self, call: &ToolCall, cancel: CancellationToken) -> Option<String> {
        let start = Instant::now();
        let output = self
            .tools
            .execute(&call.name, call.arguments.clone(), cancel)
            .await;
        tracing::info!(
            tool = %call.name,
            call_id = %call.id,
            duration_ms = %start.elapsed().as_millis(),
            output_len = output.as_ref().map_or(0, String::len),
            "Tool finished"
        );
        output
    }
}

fn model_failed(turn: &mut Turn, error: LlmError) -> Event {
    let turn_error = TurnError::Model(error);
    let message = turn_error.to_string();
    turn.error = Some(turn_error);
    Event::ModelFailed { message }
}

fn dispatch_failed(turn: &mut Turn, error: DispatchError) -> Event {
    tracing::error!(error = %error, "Dispatch failed");
    let turn_error = TurnError::Dispatch(error);
    let message = turn_error.to_string();
    turn.error = Some(turn_error);
    Event::DispatchFailed { message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Role;
    use crate::llm::LlmResponse;
    use crate::runtime::testing::{DelayedMockLlm, MockLlm, MockToolExecutor};
    use crate::short_circuit::ShortCircuitPolicy;
    use crate::state_machine::{AnswerSource, LoopContext};
    use crate::translator::tool_notice;
    use serde_json::json;
    use std::time::Duration;

    const DOC_RESULT: &str = "文档已生成完成。\n\n[📄 点击下载《房屋租赁合同》](https://files.example/a.docx)\n\n提示：请仔细核对文档中的 [待定] 内容，根据实际情况填写完整。";

    fn config() -> Arc<LoopConfig> {
        Arc::new(LoopConfig {
            system_prompt: "SYS".to_string(),
            context: LoopContext::default(),
        })
    }

    fn controller(
        llm: MockLlm,
        tools: MockToolExecutor,
    ) -> Arc<TurnController<Arc<MockLlm>, Arc<MockToolExecutor>>> {
        Arc::new(TurnController::new(Arc::new(llm), Arc::new(tools), config()))
    }

    fn user(text: &str) -> Vec<Message> {
        vec![Message::user(text)]
    }

    fn call(id: &str, name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall::new(id, name, args)
    }

    async fn collect<L: LlmService + 'static, T: ToolExecutor + 'static>(
        controller: &Arc<TurnController<L, T>>,
        prior: Vec<Message>,
    ) -> Vec<WireEvent> {
        Arc::clone(controller)
            .spawn_turn(prior, CancellationToken::new())
            .collect()
            .await
    }

    /// Run directly and keep both the loop events and the report
    async fn run_direct<L: LlmService + 'static, T: ToolExecutor + 'static>(
        controller: &TurnController<L, T>,
        prior: Vec<Message>,
    ) -> (Vec<LoopEvent>, TurnReport) {
        let (tx, mut rx) = mpsc::channel(256);
        let report = controller.run(prior, tx, CancellationToken::new()).await;
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        (events, report)
    }

    fn count_done(events: &[WireEvent]) -> usize {
        events.iter().filter(|e| e.is_done()).count()
    }

    #[tokio::test]
    async fn test_plain_answer_streams_content_then_done() {
        let llm = MockLlm::new("mock");
        llm.queue_deltas(&["房东无正当理由", "不退押金的，", "可以先协商。"]);
        let c = controller(llm, MockToolExecutor::new());

        let events = collect(&c, user("房东不退押金怎么办？")).await;

        assert_eq!(
            events,
            vec![
                WireEvent::content("房东无正当理由"),
                WireEvent::content("不退押金的，"),
                WireEvent::content("可以先协商。"),
                WireEvent::Done,
            ]
        );
        assert!(!events.iter().any(|e| matches!(e, WireEvent::Tool { .. })));
    }

    #[tokio::test]
    async fn test_system_prompt_sent_first() {
        let llm = Arc::new(MockLlm::new("mock"));
        llm.queue_response(LlmResponse::text("ok"));
        let c = TurnController::new(llm.clone(), MockToolExecutor::new(), config());

        let (_, report) = run_direct(&c, user("hi")).await;

        let requests = llm.recorded_requests();
        assert_eq!(requests[0].messages[0], Message::system("SYS"));
        assert_eq!(report.messages[0].role, Role::System);
        assert_eq!(report.answer.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_document_short_circuit_skips_second_model_call() {
        let llm = Arc::new(MockLlm::new("mock"));
        llm.queue_response(LlmResponse::tool_calls(vec![call(
            "c1",
            "generate_document",
            json!({"title": "房屋租赁合同", "content": "甲方：[待定]"}),
        )]));
        // Would be wrong to reach this
        llm.queue_response(LlmResponse::text("paraphrased"));
        let tools = MockToolExecutor::new().with_tool("generate_document", DOC_RESULT);
        let c = Arc::new(TurnController::new(llm.clone(), tools, config()));

        let events = collect(&c, user("帮我起草一份租房合同")).await;

        assert_eq!(
            events,
            vec![
                WireEvent::Tool {
                    content: tool_notice("generate_document")
                },
                WireEvent::content(DOC_RESULT),
                WireEvent::Done,
            ]
        );
        assert_eq!(llm.request_count(), 1);
    }

    #[tokio::test]
    async fn test_short_circuit_report_and_history() {
        let llm = MockLlm::new("mock");
        llm.queue_response(LlmResponse::tool_calls(vec![call(
            "c1",
            "generate_document",
            json!({}),
        )]));
        let tools = MockToolExecutor::new().with_tool("generate_document", DOC_RESULT);
        let c = TurnController::new(llm, tools, config());

        let (_, report) = run_direct(&c, user("起草合同")).await;

        assert!(matches!(
            report.state,
            LoopState::Done {
                source: AnswerSource::ShortCircuit { .. }
            }
        ));
        assert_eq!(report.answer.as_deref(), Some(DOC_RESULT));
        let last = report.messages.last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content, DOC_RESULT);
        assert_eq!(report.messages[report.messages.len() - 2].role, Role::Tool);
    }

    #[tokio::test]
    async fn test_model_timeout_yields_single_error_then_done() {
        let llm = MockLlm::new("mock");
        llm.queue_error(LlmError::timeout("request timed out after 120s"));
        let c = controller(llm, MockToolExecutor::new());

        let events = collect(&c, user("hi")).await;

        assert_eq!(events.len(), 2);
        match &events[0] {
            WireEvent::Error { message } => assert!(!message.is_empty()),
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(events[1], WireEvent::Done);
    }

    #[tokio::test]
    async fn test_mid_stream_failure_after_content() {
        let llm = MockLlm::new("mock");
        llm.queue_stream(vec![
            Ok(LlmStreamEvent::TextDelta("部分".to_string())),
            Err(LlmError::network("connection reset")),
        ]);
        let c = controller(llm, MockToolExecutor::new());

        let events = collect(&c, user("hi")).await;

        assert_eq!(events[0], WireEvent::content("部分"));
        assert!(matches!(events[1], WireEvent::Error { .. }));
        assert_eq!(events[2], WireEvent::Done);
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn test_tool_round_trip_then_answer() {
        let llm = Arc::new(MockLlm::new("mock"));
        llm.queue_response(LlmResponse::tool_calls(vec![call(
            "c1",
            "rag_search",
            json!({"query": "押金"}),
        )]));
        llm.queue_deltas(&["根据《民法典》", "……"]);
        let tools = MockToolExecutor::new().with_tool("rag_search", "Relevant Legal References: ...");
        let c = Arc::new(TurnController::new(llm.clone(), tools, config()));

        let events = collect(&c, user("押金问题")).await;

        assert_eq!(
            events,
            vec![
                WireEvent::Tool {
                    content: tool_notice("rag_search")
                },
                WireEvent::content("根据《民法典》"),
                WireEvent::content("……"),
                WireEvent::Done,
            ]
        );
        let second = &llm.recorded_requests()[1];
        let tool_msg = second.messages.last().unwrap();
        assert_eq!(tool_msg.role, Role::Tool);
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_concurrent_results_keep_request_order() {
        let llm = MockLlm::new("mock");
        llm.queue_response(LlmResponse::tool_calls(vec![
            call("slow", "rag_search", json!({"query": "a"})),
            call("mid", "extract_text", json!({"source": "b"})),
            call("fast", "rag_info", json!({})),
        ]));
        llm.queue_response(LlmResponse::text("done"));
        let tools = Arc::new(
            MockToolExecutor::new()
                .with_delayed_tool("rag_search", "A", Duration::from_millis(60))
                .with_delayed_tool("extract_text", "B", Duration::from_millis(30))
                .with_tool("rag_info", "C"),
        );
        let c = TurnController::new(llm, tools.clone(), config());

        let (_, report) = run_direct(&c, user("q")).await;

        assert_eq!(
            tools.recorded_completions(),
            vec!["rag_info", "extract_text", "rag_search"]
        );
        let tool_msgs: Vec<(&str, &str)> = report
            .messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .map(|m| (m.tool_call_id.as_deref().unwrap(), m.content.as_str()))
            .collect();
        assert_eq!(tool_msgs, vec![("slow", "A"), ("mid", "B"), ("fast", "C")]);
    }

    #[tokio::test]
    async fn test_tool_notices_in_request_order() {
        let llm = MockLlm::new("mock");
        llm.queue_response(LlmResponse::tool_calls(vec![
            call("a", "rag_search", json!({})),
            call("b", "rag_info", json!({})),
        ]));
        llm.queue_response(LlmResponse::text("ok"));
        let tools = MockToolExecutor::new()
            .with_tool("rag_search", "x")
            .with_tool("rag_info", "y");
        let c = controller(llm, tools);

        let events = collect(&c, user("q")).await;

        assert_eq!(
            events[..2],
            [
                WireEvent::Tool {
                    content: tool_notice("rag_search")
                },
                WireEvent::Tool {
                    content: tool_notice("rag_info")
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_tool_fails_before_any_tool_runs() {
        let llm = MockLlm::new("mock");
        llm.queue_response(LlmResponse::tool_calls(vec![
            call("a", "rag_info", json!({})),
            call("b", "delete_files", json!({})),
        ]));
        let tools = Arc::new(MockToolExecutor::new().with_tool("rag_info", "status"));
        let c = Arc::new(TurnController::new(Arc::new(llm), tools.clone(), config()));

        let events = collect(&c, user("q")).await;

        assert_eq!(events.len(), 2);
        match &events[0] {
            WireEvent::Error { message } => assert!(message.contains("delete_files")),
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(events[1], WireEvent::Done);
        assert!(tools.recorded_executions().is_empty());
    }

    #[tokio::test]
    async fn test_protocol_violation_rejected_before_model_call() {
        let llm = Arc::new(MockLlm::new("mock"));
        let c = TurnController::new(llm.clone(), MockToolExecutor::new(), config());
        let history = vec![
            Message::user("hi"),
            Message::tool(ToolResult::new("ghost", "orphan")),
        ];

        let (events, report) = run_direct(&c, history).await;

        assert!(matches!(report.error, Some(TurnError::Protocol(_))));
        assert!(matches!(events[0], LoopEvent::Failed { .. }));
        assert_eq!(events.last(), Some(&LoopEvent::Finished));
        assert_eq!(llm.request_count(), 0);
    }

    #[tokio::test]
    async fn test_iteration_limit_emits_fallback_once() {
        let llm = Arc::new(MockLlm::new("mock"));
        for i in 0..3 {
            llm.queue_response(LlmResponse::tool_calls(vec![call(
                &format!("c{i}"),
                "rag_info",
                json!({}),
            )]));
        }
        let config = Arc::new(LoopConfig {
            system_prompt: "SYS".to_string(),
            context: LoopContext::new(2, ShortCircuitPolicy::default()).with_fallback_answer("FALLBACK"),
        });
        let tools = MockToolExecutor::new().with_tool("rag_info", "status");
        let c = Arc::new(TurnController::new(llm.clone(), tools, config));

        let events = collect(&c, user("loop forever")).await;

        assert_eq!(llm.request_count(), 2);
        let contents: Vec<&WireEvent> = events
            .iter()
            .filter(|e| matches!(e, WireEvent::Content { .. }))
            .collect();
        assert_eq!(contents, vec![&WireEvent::content("FALLBACK")]);
        assert_eq!(events.last(), Some(&WireEvent::Done));
        assert_eq!(count_done(&events), 1);
    }

    #[tokio::test]
    async fn test_detached_run_outlasts_event_buffer() {
        let llm = MockLlm::new("mock");
        let pieces: Vec<String> = (0..200).map(|i| format!("{i} ")).collect();
        let refs: Vec<&str> = pieces.iter().map(String::as_str).collect();
        llm.queue_deltas(&refs);
        let controller = controller(llm, MockToolExecutor::new());

        let report = controller
            .run_detached(user("long answer please"), CancellationToken::new())
            .await;

        assert!(report.error.is_none());
        assert_eq!(report.answer.as_deref(), Some(pieces.concat().as_str()));
    }

    #[tokio::test]
    async fn test_replay_is_byte_identical() {
        let build = || {
            let llm = MockLlm::new("mock");
            llm.queue_response(LlmResponse::tool_calls(vec![call("c1", "rag_search", json!({}))]));
            llm.queue_deltas(&["a", "b"]);
            controller(llm, MockToolExecutor::new().with_tool("rag_search", "refs"))
        };

        let first: Vec<String> = collect(&build(), user("q"))
            .await
            .iter()
            .map(WireEvent::frame)
            .collect();
        let second: Vec<String> = collect(&build(), user("q"))
            .await
            .iter()
            .map(WireEvent::frame)
            .collect();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_cancel_during_model_call_emits_only_done() {
        let llm = Arc::new(DelayedMockLlm::new("mock", Duration::from_secs(30)));
        llm.queue_response(LlmResponse::text("never"));
        let started = llm.request_started.clone();
        let c = Arc::new(TurnController::new(llm, MockToolExecutor::new(), config()));
        let cancel = CancellationToken::new();

        let stream = c.spawn_turn(user("q"), cancel.clone());
        started.notified().await;
        cancel.cancel();
        let events: Vec<WireEvent> = stream.collect().await;

        assert_eq!(events, vec![WireEvent::Done]);
    }

    #[tokio::test]
    async fn test_cancel_during_tools_stops_loop() {
        let llm = Arc::new(MockLlm::new("mock"));
        llm.queue_response(LlmResponse::tool_calls(vec![call("c1", "extract_text", json!({}))]));
        llm.queue_response(LlmResponse::text("never"));
        let tools = MockToolExecutor::new().with_delayed_tool(
            "extract_text",
            "text",
            Duration::from_secs(30),
        );
        let c = TurnController::new(llm.clone(), tools, config());
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(64);

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });
        let report = c.run(user("q"), tx, cancel).await;

        assert!(report.is_cancelled());
        assert_eq!(llm.request_count(), 1);
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.last(), Some(&LoopEvent::Finished));
        assert!(!events.iter().any(|e| matches!(e, LoopEvent::Failed { .. })));
    }

    #[tokio::test]
    async fn test_already_cancelled_turn_never_calls_model() {
        let llm = Arc::new(MockLlm::new("mock"));
        let c = TurnController::new(llm.clone(), MockToolExecutor::new(), config());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, _rx) = mpsc::channel(8);

        let report = c.run(user("q"), tx, cancel).await;

        assert!(report.is_cancelled());
        assert_eq!(llm.request_count(), 0);
    }
}
