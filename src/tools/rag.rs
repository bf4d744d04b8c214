//! Knowledge base lookups

use super::{parse_input, Capability, Tool, ToolContext};
use crate::services::{KnowledgeBase, Passage};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt::Write;
use std::sync::Arc;

/// Passages returned per search
const TOP_K: usize = 3;
const NO_RESULTS: &str = "No relevant legal documents found.";
const KNOWLEDGE_BASE_STATUS: &str =
    "Legal Knowledge Base Status: Active. Contains laws, regulations, and standard contract templates.";

pub struct RagSearchTool {
    knowledge: Option<Arc<dyn KnowledgeBase>>,
}

#[derive(Debug, Deserialize)]
struct RagSearchInput {
    query: String,
}

impl RagSearchTool {
    pub fn new(knowledge: Option<Arc<dyn KnowledgeBase>>) -> Self {
        Self { knowledge }
    }
}

fn format_passages(passages: &[Passage]) -> String {
    if passages.is_empty() {
        return NO_RESULTS.to_string();
    }
    let mut out = String::from("Relevant Legal References:\n\n");
    for (i, passage) in passages.iter().enumerate() {
        let _ = write!(
            out,
            "--- Document {} (Source: {}) ---\n{}\n\n",
            i + 1,
            passage.source,
            passage.text
        );
    }
    out
}

#[async_trait]
impl Tool for RagSearchTool {
    fn capability(&self) -> Capability {
        Capability::RagSearch
    }

    fn description(&self) -> String {
        "Search the legal knowledge base for laws, regulations and contract templates relevant to a question. Returns the closest passages with their sources.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["query"],
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to look up, in the user's language"
                }
            }
        })
    }

    async fn run(&self, input: Value, _ctx: ToolContext) -> String {
        let input: RagSearchInput = match parse_input(input) {
            Ok(input) => input,
            Err(message) => return message,
        };
        let Some(knowledge) = &self.knowledge else {
            return "Error searching knowledge base: knowledge base is not configured".to_string();
        };
        match knowledge.search(&input.query, TOP_K).await {
            Ok(passages) => format_passages(&passages),
            Err(e) => {
                tracing::warn!(error = %e, "Knowledge search failed");
                format!("Error searching knowledge base: {e}")
            }
        }
    }
}

pub struct RagInfoTool;

#[async_trait]
impl Tool for RagInfoTool {
    fn capability(&self) -> Capability {
        Capability::RagInfo
    }

    fn description(&self) -> String {
        "Report the status and contents of the legal knowledge base.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn run(&self, _input: Value, _ctx: ToolContext) -> String {
        KNOWLEDGE_BASE_STATUS.to_string()
    }
}
