//! HTTP surface: chat completions (streaming or not) and knowledge ingest

mod handlers;
mod sse;
mod types;

pub use handlers::create_router;

use crate::llm::LoggingService;
use crate::runtime::TurnController;
use crate::services::KnowledgeBase;
use crate::tools::ToolRegistry;
use std::sync::Arc;

/// The controller as wired in production
pub type Controller = TurnController<LoggingService, ToolRegistry>;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<Controller>,
    /// Target of the ingest endpoint; absent when Vectorize is not configured
    pub knowledge: Option<Arc<dyn KnowledgeBase>>,
}

impl AppState {
    pub fn new(controller: Controller, knowledge: Option<Arc<dyn KnowledgeBase>>) -> Self {
        Self {
            controller: Arc::new(controller),
            knowledge,
        }
    }
}
