//! Legal assistant agent service
//!
//! Runs a bounded model/tool loop per chat turn and streams the result to
//! the client as Server-Sent Events.

mod api;
mod config;
mod conversation;
mod llm;
mod runtime;
mod services;
mod short_circuit;
mod state_machine;
mod system_prompt;
mod tools;
mod translator;

use api::{create_router, AppState};
use config::AppConfig;
use llm::{LlmService, LoggingService, OpenAIService};
use runtime::TurnController;
use services::{KnowledgeBase, ObjectStorage, R2Storage, VectorizeKnowledgeBase};
use std::sync::Arc;
use tools::ToolRegistry;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "legal_agent=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false),
        )
        .init();

    let config = AppConfig::from_env()?;

    let provider: Arc<dyn LlmService> = Arc::new(OpenAIService::new(&config.llm)?);
    let llm = LoggingService::new(provider);
    tracing::info!(
        model = %config.llm.model,
        api_base = %config.llm.api_base,
        max_iterations = config.agent.context.max_iterations,
        "Model configured"
    );

    let storage: Option<Arc<dyn ObjectStorage>> = match config.storage {
        Some(r2) => Some(Arc::new(R2Storage::new(r2)?) as Arc<dyn ObjectStorage>),
        None => {
            tracing::warn!("R2 storage not configured; generate_document will report failures");
            None
        }
    };
    let knowledge: Option<Arc<dyn KnowledgeBase>> = match config.knowledge {
        Some(vectorize) => {
            Some(Arc::new(VectorizeKnowledgeBase::new(vectorize)?) as Arc<dyn KnowledgeBase>)
        }
        None => {
            tracing::warn!("Vectorize not configured; rag_search and ingest are unavailable");
            None
        }
    };

    let registry = ToolRegistry::new(storage, knowledge.clone());
    let controller = TurnController::new(llm, registry, Arc::new(config.agent));
    let state = AppState::new(controller, knowledge);

    let app = create_router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.server.addr();
    tracing::info!("Legal agent listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
