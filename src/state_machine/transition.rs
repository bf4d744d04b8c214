//! Pure state transition function

use super::{AnswerSource, Effect, Event, LoopContext, LoopState};
use crate::conversation::{ToolCall, ToolResult};
use thiserror::Error;

/// Result of a state transition
#[derive(Debug, PartialEq)]
pub struct TransitionResult {
    pub new_state: LoopState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: LoopState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Turn already finished ({0})")]
    AlreadyFinished(&'static str),
    #[error("Tool results do not match the pending calls: {0}")]
    ResultMismatch(String),
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Pure transition function
///
/// Given the same inputs it always produces the same outputs. The
/// short-circuit check and the iteration cap both live here so the runtime
/// only ever executes effects.
pub fn transition(
    state: &LoopState,
    context: &LoopContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    if state.is_terminal() {
        return Err(TransitionError::AlreadyFinished(state.name()));
    }

    match (state, event) {
        // Cancellation wins from any live state
        (_, Event::Cancelled) => {
            Ok(TransitionResult::new(LoopState::Cancelled).with_effect(Effect::Finish))
        }

        (LoopState::Idle, Event::Begin) => {
            Ok(TransitionResult::new(LoopState::AwaitingModel { iteration: 1 })
                .with_effect(Effect::RequestModel { iteration: 1 }))
        }

        // Plain answer -> Done
        (LoopState::AwaitingModel { .. }, Event::ModelResponded { content, tool_calls })
            if tool_calls.is_empty() =>
        {
            Ok(TransitionResult::new(LoopState::Done {
                source: AnswerSource::Model,
            })
            .with_effect(Effect::append_assistant(content))
            .with_effect(Effect::Finish))
        }

        // Tool requests -> ExecutingTools
        (LoopState::AwaitingModel { iteration }, Event::ModelResponded { content, tool_calls }) => {
            Ok(TransitionResult::new(LoopState::ExecutingTools {
                iteration: *iteration,
                pending: tool_calls.clone(),
            })
            .with_effect(Effect::AppendAssistant {
                content,
                tool_calls: tool_calls.clone(),
            })
            .with_effect(Effect::DispatchTools { calls: tool_calls }))
        }

        (LoopState::AwaitingModel { .. }, Event::ModelFailed { message })
        | (LoopState::ExecutingTools { .. }, Event::DispatchFailed { message }) => {
            Ok(TransitionResult::new(LoopState::Failed {
                message: message.clone(),
            })
            .with_effect(Effect::fail(message))
            .with_effect(Effect::Finish))
        }

        (LoopState::ExecutingTools { iteration, pending }, Event::ToolsCompleted { results }) => {
            check_results(pending, &results)?;
            Ok(after_tools(*iteration, context, results))
        }

        (state, event) => Err(TransitionError::InvalidTransition(format!(
            "{event:?} in state {}",
            state.name()
        ))),
    }
}

/// Short-circuit, iteration cap, or back to the model
fn after_tools(iteration: u32, context: &LoopContext, results: Vec<ToolResult>) -> TransitionResult {
    let short_circuit = results
        .last()
        .and_then(|last| context.policy.check(&last.content).map(|hit| (hit, last.content.clone())));

    let append = Effect::AppendToolResults { results };

    if let Some((hit, text)) = short_circuit {
        return TransitionResult::new(LoopState::Done {
            source: AnswerSource::ShortCircuit {
                locale: hit.locale,
                marker: hit.marker,
            },
        })
        .with_effects([
            append,
            Effect::append_assistant(text.clone()),
            Effect::EmitFinalAnswer { text },
            Effect::Finish,
        ]);
    }

    if iteration >= context.max_iterations {
        let text = context.fallback_answer.clone();
        return TransitionResult::new(LoopState::Done {
            source: AnswerSource::IterationLimit,
        })
        .with_effects([
            append,
            Effect::append_assistant(text.clone()),
            Effect::EmitFinalAnswer { text },
            Effect::Finish,
        ]);
    }

    let next = iteration + 1;
    TransitionResult::new(LoopState::AwaitingModel { iteration: next })
        .with_effects([append, Effect::RequestModel { iteration: next }])
}

fn check_results(pending: &[ToolCall], results: &[ToolResult]) -> Result<(), TransitionError> {
    if pending.len() != results.len() {
        return Err(TransitionError::ResultMismatch(format!(
            "expected {} results, got {}",
            pending.len(),
            results.len()
        )));
    }
    for (call, result) in pending.iter().zip(results) {
        if call.id != result.call_id {
            return Err(TransitionError::ResultMismatch(format!(
                "expected result for '{}', got '{}'",
                call.id, result.call_id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::short_circuit::{MarkerConfig, ShortCircuitPolicy};
    use serde_json::json;

    fn ctx() -> LoopContext {
        LoopContext::default()
    }

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall::new(id, name, json!({}))
    }

    fn executing(iteration: u32, calls: &[ToolCall]) -> LoopState {
        LoopState::ExecutingTools {
            iteration,
            pending: calls.to_vec(),
        }
    }

    #[test]
    fn test_begin_requests_model() {
        let result = transition(&LoopState::Idle, &ctx(), Event::Begin).unwrap();
        assert_eq!(result.new_state, LoopState::AwaitingModel { iteration: 1 });
        assert_eq!(result.effects, vec![Effect::RequestModel { iteration: 1 }]);
    }

    #[test]
    fn test_plain_answer_finishes() {
        let result = transition(
            &LoopState::AwaitingModel { iteration: 1 },
            &ctx(),
            Event::ModelResponded {
                content: "建议先协商".into(),
                tool_calls: vec![],
            },
        )
        .unwrap();
        assert_eq!(
            result.new_state,
            LoopState::Done {
                source: AnswerSource::Model
            }
        );
        assert_eq!(
            result.effects,
            vec![Effect::append_assistant("建议先协商"), Effect::Finish]
        );
    }

    #[test]
    fn test_tool_calls_dispatch_in_order() {
        let calls = vec![call("a", "rag_search"), call("b", "rag_info")];
        let result = transition(
            &LoopState::AwaitingModel { iteration: 2 },
            &ctx(),
            Event::ModelResponded {
                content: String::new(),
                tool_calls: calls.clone(),
            },
        )
        .unwrap();
        assert_eq!(result.new_state, executing(2, &calls));
        assert_eq!(
            result.effects[1],
            Effect::DispatchTools {
                calls: calls.clone()
            }
        );
    }

    #[test]
    fn test_results_without_marker_return_to_model() {
        let calls = vec![call("a", "rag_search")];
        let result = transition(
            &executing(1, &calls),
            &ctx(),
            Event::ToolsCompleted {
                results: vec![ToolResult::new("a", "Relevant Legal References: ...")],
            },
        )
        .unwrap();
        assert_eq!(result.new_state, LoopState::AwaitingModel { iteration: 2 });
        assert!(matches!(result.effects[0], Effect::AppendToolResults { .. }));
        assert_eq!(result.effects[1], Effect::RequestModel { iteration: 2 });
    }

    #[test]
    fn test_marker_in_last_result_short_circuits() {
        let calls = vec![call("a", "generate_document")];
        let text = "文档已生成完成。\n\n[📄 点击下载《合同》](https://f/x.docx)";
        let result = transition(
            &executing(1, &calls),
            &ctx(),
            Event::ToolsCompleted {
                results: vec![ToolResult::new("a", text)],
            },
        )
        .unwrap();

        assert!(matches!(
            result.new_state,
            LoopState::Done {
                source: AnswerSource::ShortCircuit { .. }
            }
        ));
        assert_eq!(
            result.effects[1..],
            [
                Effect::append_assistant(text),
                Effect::EmitFinalAnswer {
                    text: text.to_string()
                },
                Effect::Finish
            ]
        );
        assert!(!result
            .effects
            .iter()
            .any(|e| matches!(e, Effect::RequestModel { .. })));
    }

    #[test]
    fn test_only_last_result_is_checked() {
        let calls = vec![call("a", "generate_document"), call("b", "rag_info")];
        let result = transition(
            &executing(1, &calls),
            &ctx(),
            Event::ToolsCompleted {
                results: vec![
                    ToolResult::new("a", "文档已生成完成"),
                    ToolResult::new("b", "status"),
                ],
            },
        )
        .unwrap();
        assert_eq!(result.new_state, LoopState::AwaitingModel { iteration: 2 });
    }

    #[test]
    fn test_empty_marker_config_never_short_circuits() {
        let context = LoopContext::new(8, ShortCircuitPolicy::new(MarkerConfig::empty()));
        let calls = vec![call("a", "generate_document")];
        let result = transition(
            &executing(1, &calls),
            &context,
            Event::ToolsCompleted {
                results: vec![ToolResult::new("a", "文档已生成完成")],
            },
        )
        .unwrap();
        assert_eq!(result.new_state, LoopState::AwaitingModel { iteration: 2 });
    }

    #[test]
    fn test_iteration_cap_uses_fallback() {
        let context = LoopContext::new(2, ShortCircuitPolicy::default()).with_fallback_answer("FB");
        let calls = vec![call("a", "rag_info")];
        let result = transition(
            &executing(2, &calls),
            &context,
            Event::ToolsCompleted {
                results: vec![ToolResult::new("a", "status")],
            },
        )
        .unwrap();
        assert_eq!(
            result.new_state,
            LoopState::Done {
                source: AnswerSource::IterationLimit
            }
        );
        assert!(result.effects.contains(&Effect::EmitFinalAnswer {
            text: "FB".to_string()
        }));
    }

    #[test]
    fn test_model_failure_fails_turn() {
        let result = transition(
            &LoopState::AwaitingModel { iteration: 1 },
            &ctx(),
            Event::ModelFailed {
                message: "timeout".into(),
            },
        )
        .unwrap();
        assert_eq!(
            result.new_state,
            LoopState::Failed {
                message: "timeout".into()
            }
        );
        assert_eq!(result.effects, vec![Effect::fail("timeout"), Effect::Finish]);
    }

    #[test]
    fn test_dispatch_failure_fails_turn() {
        let calls = vec![call("a", "delete_everything")];
        let result = transition(
            &executing(1, &calls),
            &ctx(),
            Event::DispatchFailed {
                message: "Unknown tool: delete_everything".into(),
            },
        )
        .unwrap();
        assert!(matches!(result.new_state, LoopState::Failed { .. }));
    }

    #[test]
    fn test_cancel_from_live_states() {
        for state in [
            LoopState::Idle,
            LoopState::AwaitingModel { iteration: 1 },
            executing(1, &[call("a", "rag_info")]),
        ] {
            let result = transition(&state, &ctx(), Event::Cancelled).unwrap();
            assert_eq!(result.new_state, LoopState::Cancelled);
            assert_eq!(result.effects, vec![Effect::Finish]);
        }
    }

    #[test]
    fn test_terminal_states_reject_events() {
        let done = LoopState::Done {
            source: AnswerSource::Model,
        };
        assert_eq!(
            transition(&done, &ctx(), Event::Begin),
            Err(TransitionError::AlreadyFinished("done"))
        );
        assert!(transition(&LoopState::Cancelled, &ctx(), Event::Cancelled).is_err());
    }

    #[test]
    fn test_mismatched_results_rejected() {
        let calls = vec![call("a", "rag_info"), call("b", "rag_info")];
        let swapped = transition(
            &executing(1, &calls),
            &ctx(),
            Event::ToolsCompleted {
                results: vec![ToolResult::new("b", "x"), ToolResult::new("a", "y")],
            },
        );
        assert!(matches!(swapped, Err(TransitionError::ResultMismatch(_))));

        let short = transition(
            &executing(1, &calls),
            &ctx(),
            Event::ToolsCompleted {
                results: vec![ToolResult::new("a", "y")],
            },
        );
        assert!(matches!(short, Err(TransitionError::ResultMismatch(_))));
    }

    #[test]
    fn test_out_of_order_events_rejected() {
        let err = transition(
            &LoopState::Idle,
            &ctx(),
            Event::ToolsCompleted { results: vec![] },
        )
        .unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition(_)));
    }
}
