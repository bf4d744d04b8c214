//! Draft a Word document and publish it as a download link

use super::docx::{self, DOCX_CONTENT_TYPE};
use super::{parse_input, Capability, Tool, ToolContext};
use crate::services::ObjectStorage;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct GenerateDocumentTool {
    storage: Option<Arc<dyn ObjectStorage>>,
}

#[derive(Debug, Deserialize)]
struct GenerateDocumentInput {
    title: String,
    content: String,
    #[serde(default = "default_doc_type")]
    doc_type: String,
}

fn default_doc_type() -> String {
    "contract".to_string()
}

impl GenerateDocumentTool {
    pub fn new(storage: Option<Arc<dyn ObjectStorage>>) -> Self {
        Self { storage }
    }

    async fn generate(&self, input: &GenerateDocumentInput) -> Result<String, String> {
        let storage = self
            .storage
            .as_ref()
            .ok_or_else(|| "document storage is not configured".to_string())?;
        let bytes = docx::render(&input.title, &input.content).map_err(|e| e.to_string())?;
        let filename = file_name(&input.doc_type, &input.title);
        let url = storage
            .upload(bytes, &filename, DOCX_CONTENT_TYPE)
            .await
            .map_err(|e| e.to_string())?;
        tracing::info!(doc_type = %input.doc_type, filename = %filename, "Document generated");
        Ok(url)
    }
}

/// `<doc_type>_<title>.docx` with path separators and colons neutralised
fn file_name(doc_type: &str, title: &str) -> String {
    let safe_title: String = title
        .chars()
        .filter(|c| *c != ':')
        .map(|c| match c {
            ' ' | '/' | '\\' => '_',
            other => other,
        })
        .collect();
    format!("{doc_type}_{safe_title}.docx")
}

fn delivered(title: &str, url: &str) -> String {
    format!(
        "文档已生成完成。\n\n[📄 点击下载《{title}》]({url})\n\n提示：请仔细核对文档中的 [待定] 内容，根据实际情况填写完整。"
    )
}

#[async_trait]
impl Tool for GenerateDocumentTool {
    fn capability(&self) -> Capability {
        Capability::GenerateDocument
    }

    fn description(&self) -> String {
        "Generate a Word (.docx) legal document and return a download link. Put each clause on its own line; mark unknown details as [待定].".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["title", "content"],
            "properties": {
                "title": {
                    "type": "string",
                    "description": "Document title, e.g. 房屋租赁合同"
                },
                "content": {
                    "type": "string",
                    "description": "Full document body; one paragraph per line"
                },
                "doc_type": {
                    "type": "string",
                    "description": "Document category used in the file name",
                    "default": "contract"
                }
            }
        })
    }

    async fn run(&self, input: Value, _ctx: ToolContext) -> String {
        let input: GenerateDocumentInput = match parse_input(input) {
            Ok(input) => input,
            Err(message) => return message,
        };
        match self.generate(&input).await {
            Ok(url) => delivered(&input.title, &url),
            Err(reason) => {
                tracing::warn!(error = %reason, "Document generation failed");
                format!("文档生成失败：{reason}")
            }
        }
    }
}
