//! Turn control loop state machine
//!
//! Implements the Elm Architecture pattern with pure state transitions: the
//! runtime feeds `Event`s in, `transition` returns the next `LoopState` and
//! the `Effect`s the runtime must carry out.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::Effect;
pub use event::Event;
pub use state::{AnswerSource, LoopContext, LoopState};
pub use transition::transition;
