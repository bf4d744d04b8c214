//! Capabilities the model can call
//!
//! The set is closed: every capability is a `Capability` variant, and the
//! registry resolves names to variants through a map built once at startup.
//! Capabilities always answer with text. Internal failures become a
//! diagnostic string the model can read and react to; only an unknown name
//! is an error, and that is the registry's to report.

mod docx;
mod extract_text;
mod generate_document;
mod list_documents;
mod rag;

pub use extract_text::ExtractTextTool;
pub use generate_document::GenerateDocumentTool;
pub use list_documents::ListSupportedDocumentsTool;
pub use rag::{RagInfoTool, RagSearchTool};

use crate::llm::ToolDefinition;
use crate::runtime::ToolExecutor;
use crate::services::{KnowledgeBase, ObjectStorage};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Every capability this build knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    ExtractText,
    GenerateDocument,
    ListSupportedDocuments,
    RagSearch,
    RagInfo,
}

impl Capability {
    /// Registration order, which is also the order advertised to the model
    pub const ALL: [Capability; 5] = [
        Capability::ExtractText,
        Capability::GenerateDocument,
        Capability::ListSupportedDocuments,
        Capability::RagSearch,
        Capability::RagInfo,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Capability::ExtractText => "extract_text",
            Capability::GenerateDocument => "generate_document",
            Capability::ListSupportedDocuments => "list_supported_documents",
            Capability::RagSearch => "rag_search",
            Capability::RagInfo => "rag_info",
        }
    }
}

/// A tool call could not be routed to any capability
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },
}

/// Per-call context handed to a capability
#[derive(Clone)]
pub struct ToolContext {
    /// Fires when the turn is cancelled; long operations should stop early
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn capability(&self) -> Capability;

    /// Tool description for LLM
    fn description(&self) -> String;

    /// JSON schema for tool input
    fn input_schema(&self) -> Value;

    /// Execute the capability. Never fails: problems come back as text.
    async fn run(&self, input: Value, ctx: ToolContext) -> String;
}

/// Decode tool arguments, or the diagnostic to hand back instead
pub(crate) fn parse_input<T: DeserializeOwned>(input: Value) -> Result<T, String> {
    serde_json::from_value(input).map_err(|e| format!("Invalid input: {e}"))
}

/// The fixed capability set, wired to its collaborators
pub struct ToolRegistry {
    by_name: HashMap<&'static str, Capability>,
    extract_text: ExtractTextTool,
    generate_document: GenerateDocumentTool,
    list_documents: ListSupportedDocumentsTool,
    rag_search: RagSearchTool,
    rag_info: RagInfoTool,
}

impl ToolRegistry {
    /// Collaborators are optional; a capability whose backend is missing
    /// still answers, with a diagnostic.
    pub fn new(
        storage: Option<Arc<dyn ObjectStorage>>,
        knowledge: Option<Arc<dyn KnowledgeBase>>,
    ) -> Self {
        let by_name = Capability::ALL.iter().map(|c| (c.name(), *c)).collect();
        Self {
            by_name,
            extract_text: ExtractTextTool::new(),
            generate_document: GenerateDocumentTool::new(storage),
            list_documents: ListSupportedDocumentsTool,
            rag_search: RagSearchTool::new(knowledge),
            rag_info: RagInfoTool,
        }
    }

    pub fn resolve(&self, name: &str) -> Result<Capability, DispatchError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| DispatchError::UnknownTool {
                name: name.to_string(),
            })
    }

    fn tool(&self, capability: Capability) -> &dyn Tool {
        match capability {
            Capability::ExtractText => &self.extract_text,
            Capability::GenerateDocument => &self.generate_document,
            Capability::ListSupportedDocuments => &self.list_documents,
            Capability::RagSearch => &self.rag_search,
            Capability::RagInfo => &self.rag_info,
        }
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(&self, name: &str, input: Value, cancel: CancellationToken) -> Option<String> {
        let capability = self.resolve(name).ok()?;
        Some(self.tool(capability).run(input, ToolContext::new(cancel)).await)
    }

    fn supports(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        Capability::ALL
            .iter()
            .map(|c| {
                let tool = self.tool(*c);
                ToolDefinition {
                    name: tool.capability().name().to_string(),
                    description: tool.description(),
                    input_schema: tool.input_schema(),
                }
            })
            .collect()
    }
}
