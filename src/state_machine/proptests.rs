//! Property-based tests for the state machine
//!
//! A scripted driver plays model and tool behaviour against `transition`
//! and checks the invariants over the whole effect log.

use super::*;
use crate::conversation::{ToolCall, ToolResult};
use crate::short_circuit::ShortCircuitPolicy;
use proptest::prelude::*;
use serde_json::json;

// ============================================================================
// Scripts
// ============================================================================

/// One scripted model reply
#[derive(Debug, Clone)]
enum Step {
    Answer(String),
    /// Tool batch; `true` marks a result that carries a completion marker
    Tools(Vec<bool>),
    ModelError,
    UnknownTool,
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        2 => "[a-z ]{0,12}".prop_map(Step::Answer),
        6 => proptest::collection::vec(prop::bool::weighted(0.2), 1..4).prop_map(Step::Tools),
        1 => Just(Step::ModelError),
        1 => Just(Step::UnknownTool),
    ]
}

fn arb_script() -> impl Strategy<Value = (Vec<Step>, u32, Option<usize>)> {
    (
        proptest::collection::vec(arb_step(), 1..12),
        1u32..6,
        proptest::option::of(0usize..20),
    )
}

/// Drive a turn to completion, returning the final state and every effect
fn run_script(
    steps: &[Step],
    max_iterations: u32,
    cancel_at: Option<usize>,
) -> (LoopState, Vec<Effect>) {
    let context = LoopContext::new(max_iterations, ShortCircuitPolicy::default())
        .with_fallback_answer("fallback");
    let mut state = LoopState::Idle;
    let mut log = Vec::new();
    let mut steps = steps.iter().cycle();
    let mut event = Event::Begin;

    for tick in 0.. {
        if cancel_at == Some(tick) {
            event = Event::Cancelled;
        }
        let result = transition(&state, &context, event).expect("scripted event is legal");
        state = result.new_state;
        log.extend(result.effects.iter().cloned());
        if state.is_terminal() {
            break;
        }

        event = next_event(&result.effects, &mut steps, tick);
    }

    (state, log)
}

fn next_event<'a>(effects: &[Effect], steps: &mut impl Iterator<Item = &'a Step>, tick: usize) -> Event {
    for effect in effects {
        match effect {
            Effect::RequestModel { .. } => {
                return match steps.next().expect("cycled script") {
                    Step::Answer(text) => Event::ModelResponded {
                        content: text.clone(),
                        tool_calls: vec![],
                    },
                    Step::Tools(markers) => Event::ModelResponded {
                        content: String::new(),
                        tool_calls: markers
                            .iter()
                            .enumerate()
                            .map(|(i, marked)| {
                                let name = if *marked { "generate_document" } else { "rag_info" };
                                ToolCall::new(format!("t{tick}-{i}-{marked}"), name, json!({}))
                            })
                            .collect(),
                    },
                    Step::ModelError => Event::ModelFailed {
                        message: "model timed out".into(),
                    },
                    Step::UnknownTool => Event::ModelResponded {
                        content: String::new(),
                        tool_calls: vec![ToolCall::new(format!("t{tick}-x"), "nope", json!({}))],
                    },
                };
            }
            Effect::DispatchTools { calls } => {
                if calls.iter().any(|c| c.name == "nope") {
                    return Event::DispatchFailed {
                        message: "Unknown tool: nope".into(),
                    };
                }
                return Event::ToolsCompleted {
                    results: calls
                        .iter()
                        .map(|c| {
                            let text = if c.name == "generate_document" {
                                "文档已生成完成"
                            } else {
                                "status"
                            };
                            ToolResult::new(c.id.clone(), text)
                        })
                        .collect(),
                };
            }
            _ => {}
        }
    }
    unreachable!("live state without a pending effect: {effects:?}")
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_turn_always_terminates_with_single_finish(
        (steps, max_iterations, cancel_at) in arb_script()
    ) {
        let (state, log) = run_script(&steps, max_iterations, cancel_at);
        prop_assert!(state.is_terminal());
        let finishes = log.iter().filter(|e| **e == Effect::Finish).count();
        prop_assert_eq!(finishes, 1);
        prop_assert_eq!(log.last(), Some(&Effect::Finish));
    }

    #[test]
    fn prop_model_calls_bounded_by_max_iterations(
        (steps, max_iterations, cancel_at) in arb_script()
    ) {
        let (_, log) = run_script(&steps, max_iterations, cancel_at);
        let requests = log
            .iter()
            .filter(|e| matches!(e, Effect::RequestModel { .. }))
            .count();
        prop_assert!(requests <= max_iterations as usize);
    }

    #[test]
    fn prop_final_answer_emitted_at_most_once_and_ends_model_calls(
        (steps, max_iterations, cancel_at) in arb_script()
    ) {
        let (state, log) = run_script(&steps, max_iterations, cancel_at);
        let emits: Vec<usize> = log
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, Effect::EmitFinalAnswer { .. }))
            .map(|(i, _)| i)
            .collect();
        prop_assert!(emits.len() <= 1);
        if let Some(&at) = emits.first() {
            let requests_after = log[at..]
                .iter()
                .any(|e| matches!(e, Effect::RequestModel { .. }));
            prop_assert!(!requests_after, "model requested after the final answer");
            let is_emitting_done = matches!(
                state,
                LoopState::Done { source: AnswerSource::ShortCircuit { .. } | AnswerSource::IterationLimit }
            );
            prop_assert!(is_emitting_done);
        }
    }

    #[test]
    fn prop_failure_reported_once_only_when_failed(
        (steps, max_iterations, cancel_at) in arb_script()
    ) {
        let (state, log) = run_script(&steps, max_iterations, cancel_at);
        let fails = log.iter().filter(|e| matches!(e, Effect::Fail { .. })).count();
        let failed = matches!(state, LoopState::Failed { .. });
        prop_assert_eq!(fails, usize::from(failed));
    }

    #[test]
    fn prop_transitions_are_deterministic(
        (steps, max_iterations, cancel_at) in arb_script()
    ) {
        let first = run_script(&steps, max_iterations, cancel_at);
        let second = run_script(&steps, max_iterations, cancel_at);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_terminal_states_reject_everything(
        (steps, max_iterations, cancel_at) in arb_script()
    ) {
        let (state, _) = run_script(&steps, max_iterations, cancel_at);
        let context = LoopContext::default();
        for event in [
            Event::Begin,
            Event::Cancelled,
            Event::ModelFailed { message: "x".into() },
            Event::ToolsCompleted { results: vec![] },
        ] {
            prop_assert!(transition(&state, &context, event).is_err());
        }
    }
}
