//! Pull plain text out of a local file or a URL
//!
//! Downloads are processed in memory. The file kind comes from the
//! extension: for URLs the `Content-Type` is consulted first, then the path.

use super::{parse_input, Capability, Tool, ToolContext};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use url::Url;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);
const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];
const KNOWN_EXTENSIONS: [&str; 7] = ["pdf", "txt", "md", "jpg", "jpeg", "png", "bmp"];
const OCR_UNAVAILABLE: &str = "Error: OCR library not available (OCR is not linked into this build).\n\
提示：这是可选能力；你仍可正常使用对话/文档生成/RAG。\n";

pub struct ExtractTextTool {
    client: Client,
}

#[derive(Debug, Deserialize)]
struct ExtractTextInput {
    #[serde(alias = "file_path_or_url")]
    source: String,
}

/// What the bytes are, judged by extension
#[derive(Debug, PartialEq, Eq)]
enum FileKind {
    Pdf,
    Text,
    Image,
    Unsupported(String),
}

impl FileKind {
    fn from_extension(ext: &str) -> Self {
        let ext = ext.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => FileKind::Pdf,
            "txt" | "md" => FileKind::Text,
            e if IMAGE_EXTENSIONS.contains(&e) => FileKind::Image,
            _ => FileKind::Unsupported(if ext.is_empty() {
                String::new()
            } else {
                format!(".{ext}")
            }),
        }
    }
}

impl ExtractTextTool {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    async fn download(&self, url: &str, ctx: &ToolContext) -> Result<(String, Vec<u8>), String> {
        let fetch = async {
            let response = self
                .client
                .get(url)
                .timeout(DOWNLOAD_TIMEOUT)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| e.to_string())?;
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let bytes = response.bytes().await.map_err(|e| e.to_string())?;
            Ok::<_, String>((extension_for_download(content_type.as_deref(), url), bytes.to_vec()))
        };
        tokio::select! {
            () = ctx.cancel.cancelled() => Err("download cancelled".to_string()),
            result = fetch => result,
        }
    }
}

impl Default for ExtractTextTool {
    fn default() -> Self {
        Self::new()
    }
}

fn path_extension(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

/// Extension for a downloaded file. A `Content-Type` that maps to a kind we
/// handle wins; otherwise the URL path decides, then any guess at all.
fn extension_for_download(content_type: Option<&str>, url: &str) -> String {
    let guesses: Vec<&str> = content_type
        .and_then(|ct| ct.split(';').next())
        .map(str::trim)
        .and_then(mime_guess::get_mime_extensions_str)
        .map(<[&str]>::to_vec)
        .unwrap_or_default();

    if let Some(known) = guesses.iter().find(|g| KNOWN_EXTENSIONS.contains(*g)) {
        return (*known).to_string();
    }
    let from_path = Url::parse(url)
        .ok()
        .and_then(|u| path_extension(u.path()));
    from_path
        .or_else(|| guesses.first().map(|g| (*g).to_string()))
        .unwrap_or_default()
}

async fn extract(kind: FileKind, bytes: Vec<u8>) -> String {
    match kind {
        FileKind::Pdf => {
            let result =
                tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
                    .await;
            match result {
                Ok(Ok(text)) => text,
                Ok(Err(e)) => format!("Error extracting PDF: {e}"),
                Err(e) => format!("Error extracting PDF: extraction task failed: {e}"),
            }
        }
        FileKind::Text => match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => format!("Error reading text file: {e}"),
        },
        FileKind::Image => OCR_UNAVAILABLE.to_string(),
        FileKind::Unsupported(ext) => format!("Unsupported file type: {ext}"),
    }
}

async fn extract_local(path: &str) -> String {
    let path_ref = Path::new(path);
    if !path_ref.exists() {
        return "Error: File not found.".to_string();
    }
    let kind = FileKind::from_extension(&path_extension(path).unwrap_or_default());
    if let FileKind::Unsupported(ext) = &kind {
        return format!("Unsupported file type: {ext}");
    }
    match tokio::fs::read(path_ref).await {
        Ok(bytes) => extract(kind, bytes).await,
        Err(e) if kind == FileKind::Pdf => format!("Error extracting PDF: {e}"),
        Err(e) => format!("Error reading text file: {e}"),
    }
}

fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

#[async_trait]
impl Tool for ExtractTextTool {
    fn capability(&self) -> Capability {
        Capability::ExtractText
    }

    fn description(&self) -> String {
        "Extract text from a PDF, text or Markdown file, given a local path or an http(s) URL. Use it to read contracts or documents the user uploaded.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["source"],
            "properties": {
                "source": {
                    "type": "string",
                    "description": "Local file path or http(s) URL"
                }
            }
        })
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> String {
        let input: ExtractTextInput = match parse_input(input) {
            Ok(input) => input,
            Err(message) => return message,
        };
        if !is_remote(&input.source) {
            return extract_local(&input.source).await;
        }
        match self.download(&input.source, &ctx).await {
            Ok((ext, bytes)) => extract(FileKind::from_extension(&ext), bytes).await,
            Err(e) => {
                tracing::warn!(source = %input.source, error = %e, "Download failed");
                format!("Error downloading file: {e}")
            }
        }
    }
}
