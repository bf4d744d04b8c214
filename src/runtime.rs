//! Runtime for executing turns
//!
//! Drives the pure state machine against a model and a tool executor,
//! streaming `LoopEvent`s to whoever is listening.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::TurnController;
pub use traits::ToolExecutor;

use crate::config::{env_opt, env_parse, ConfigError};
use crate::conversation::{Message, ProtocolViolation};
use crate::llm::LlmError;
use crate::short_circuit::{MarkerConfig, ShortCircuitPolicy};
use crate::state_machine::state::DEFAULT_MAX_ITERATIONS;
use crate::state_machine::{LoopContext, LoopState};
use crate::system_prompt::SystemPrompt;
use crate::tools::DispatchError;
use thiserror::Error;

/// Per-process loop configuration, shared read-only by every turn
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub system_prompt: String,
    pub context: LoopContext,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            system_prompt: SystemPrompt::default().into_text(),
            context: LoopContext::default(),
        }
    }
}

impl LoopConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let markers = MarkerConfig::from_env()
            .map_err(|e| ConfigError::invalid("SHORT_CIRCUIT_MARKERS", e))?;
        tracing::debug!(locales = ?markers.locales().collect::<Vec<_>>(), "Short-circuit markers loaded");
        let max_iterations = env_parse("AGENT_MAX_ITERATIONS", DEFAULT_MAX_ITERATIONS)?;
        let mut context = LoopContext::new(max_iterations, ShortCircuitPolicy::new(markers));
        if let Some(answer) = env_opt("AGENT_FALLBACK_ANSWER") {
            context = context.with_fallback_answer(answer);
        }

        Ok(Self {
            system_prompt: SystemPrompt::from_env()?.into_text(),
            context,
        })
    }
}

/// Turn-fatal errors. `Display` is the short message the client sees.
#[derive(Debug, Clone, Error)]
pub enum TurnError {
    #[error("Invalid conversation: {0}")]
    Protocol(#[from] ProtocolViolation),
    #[error("{0}")]
    Dispatch(#[from] DispatchError),
    #[error("Model request failed: {0}")]
    Model(#[from] LlmError),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Outcome of one turn
#[derive(Debug, Clone)]
pub struct TurnReport {
    /// Terminal loop state
    pub state: LoopState,
    /// Final answer, when the turn reached `Done`
    pub answer: Option<String>,
    pub error: Option<TurnError>,
    /// Full history including the messages appended this turn
    pub messages: Vec<Message>,
    pub model_calls: u32,
}

impl TurnReport {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.state, LoopState::Cancelled)
    }
}
