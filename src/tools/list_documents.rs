//! Static catalogue of document types `generate_document` is prompted for

use super::{Capability, Tool, ToolContext};
use async_trait::async_trait;
use serde_json::{json, Value};

const DOCUMENT_TYPES: [(&str, &str); 6] = [
    ("房屋租赁合同", "House Rental Contract"),
    ("借款合同", "Loan Agreement"),
    ("劳动合同", "Labor Contract"),
    ("法律咨询意见书", "Legal Opinion"),
    ("委托代理协议", "Agency Agreement"),
    ("保密协议", "NDA"),
];

pub struct ListSupportedDocumentsTool;

fn catalogue() -> String {
    let mut out = String::from("Supported Document Types:\n");
    for (i, (zh, en)) in DOCUMENT_TYPES.iter().enumerate() {
        out.push_str(&format!("{}. {zh} ({en})\n", i + 1));
    }
    out
}

#[async_trait]
impl Tool for ListSupportedDocumentsTool {
    fn capability(&self) -> Capability {
        Capability::ListSupportedDocuments
    }

    fn description(&self) -> String {
        "List the legal document types that can be drafted with generate_document.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn run(&self, _input: Value, _ctx: ToolContext) -> String {
        catalogue()
    }
}
