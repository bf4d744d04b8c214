//! Loop states and the immutable per-turn context

use crate::conversation::ToolCall;
use crate::short_circuit::ShortCircuitPolicy;
use serde::Serialize;
use std::sync::Arc;

/// Default cap on model invocations per turn
pub const DEFAULT_MAX_ITERATIONS: u32 = 8;

/// Answer used when the iteration cap is hit without a final answer
pub const DEFAULT_FALLBACK_ANSWER: &str =
    "抱歉，处理您的请求时步骤过多，未能得出完整结论。请尝试简化问题或分步提问。";

/// Where the turn's final answer came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnswerSource {
    /// The model answered without requesting tools
    Model,
    /// A tool result carried a completion marker
    ShortCircuit { locale: String, marker: String },
    /// The iteration cap forced the fallback answer
    IterationLimit,
}

/// Loop state
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopState {
    /// Turn not started
    #[default]
    Idle,

    /// Model invocation in flight (1-based iteration)
    AwaitingModel { iteration: u32 },

    /// Tool calls of the latest assistant message are running
    ExecutingTools {
        iteration: u32,
        /// Calls in request order; results must come back in this order
        pending: Vec<ToolCall>,
    },

    /// Terminal: the last assistant message is the answer
    Done { source: AnswerSource },

    /// Terminal: turn-fatal failure
    Failed { message: String },

    /// Terminal: caller cancelled the turn
    Cancelled,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoopState::Done { .. } | LoopState::Failed { .. } | LoopState::Cancelled
        )
    }

    /// Model invocations made so far
    pub fn iteration(&self) -> Option<u32> {
        match self {
            LoopState::AwaitingModel { iteration } | LoopState::ExecutingTools { iteration, .. } => {
                Some(*iteration)
            }
            _ => None,
        }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            LoopState::Idle => "idle",
            LoopState::AwaitingModel { .. } => "awaiting_model",
            LoopState::ExecutingTools { .. } => "executing_tools",
            LoopState::Done { .. } => "done",
            LoopState::Failed { .. } => "failed",
            LoopState::Cancelled => "cancelled",
        }
    }
}

/// Immutable configuration for one turn
#[derive(Debug, Clone)]
pub struct LoopContext {
    pub max_iterations: u32,
    pub policy: Arc<ShortCircuitPolicy>,
    pub fallback_answer: String,
}

impl Default for LoopContext {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            policy: Arc::new(ShortCircuitPolicy::default()),
            fallback_answer: DEFAULT_FALLBACK_ANSWER.to_string(),
        }
    }
}

impl LoopContext {
    pub fn new(max_iterations: u32, policy: ShortCircuitPolicy) -> Self {
        Self {
            // Zero would never call the model at all
            max_iterations: max_iterations.max(1),
            policy: Arc::new(policy),
            ..Self::default()
        }
    }

    pub fn with_fallback_answer(mut self, answer: impl Into<String>) -> Self {
        self.fallback_answer = answer.into();
        self
    }
}
