//! Legal knowledge base backed by Cloudflare Vectorize
//!
//! Text is embedded through an OpenAI-style `embeddings` endpoint; the
//! passage text itself travels in the vector metadata so a query returns
//! everything needed to cite it.

use crate::config::{env_opt, env_or, env_parse, env_required, ConfigError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

const CLOUDFLARE_API: &str = "https://api.cloudflare.com/client/v4/accounts";
const UNKNOWN_SOURCE: &str = "Unknown Source";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("embedding request failed: {0}")]
    Embedding(String),
    #[error("vector index request failed: {0}")]
    Index(String),
    #[error("unexpected response: {0}")]
    Response(String),
}

/// One retrievable piece of legal text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    pub source: String,
}

#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Up to `top_k` passages closest to `query`, best first
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Passage>, KnowledgeError>;

    /// Store passages; returns how many were indexed
    async fn index(&self, passages: Vec<Passage>) -> Result<usize, KnowledgeError>;
}

#[derive(Debug, Clone)]
pub struct VectorizeConfig {
    pub account_id: String,
    pub api_token: String,
    pub index_name: String,
    pub embedding_api_key: String,
    pub embedding_api_base: String,
    pub embedding_model: String,
    pub embedding_dimension: u32,
}

impl VectorizeConfig {
    /// `None` when `CF_ACCOUNT_ID` is unset
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(account_id) = env_opt("CF_ACCOUNT_ID") else {
            return Ok(None);
        };
        Ok(Some(Self {
            account_id,
            api_token: env_required("CF_API_TOKEN")?,
            index_name: env_or("CF_VECTORIZE_INDEX", "legal-knowledge-base"),
            embedding_api_key: env_required("EMBEDDING_API_KEY")?,
            embedding_api_base: env_or(
                "EMBEDDING_API_BASE",
                "https://open.bigmodel.cn/api/paas/v4",
            ),
            embedding_model: env_or("EMBEDDING_MODEL", "embedding-3"),
            embedding_dimension: env_parse("EMBEDDING_DIMENSION", 1024)?,
        }))
    }
}

pub struct VectorizeKnowledgeBase {
    client: Client,
    config: VectorizeConfig,
}

impl VectorizeKnowledgeBase {
    pub fn new(config: VectorizeConfig) -> Result<Self, KnowledgeError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| KnowledgeError::Index(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn index_url(&self, action: &str) -> String {
        format!(
            "{CLOUDFLARE_API}/{}/vectorize/v2/indexes/{}/{action}",
            self.config.account_id, self.config.index_name
        )
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, KnowledgeError> {
        let url = format!(
            "{}/embeddings",
            self.config.embedding_api_base.trim_end_matches('/')
        );
        let body = json!({
            "model": self.config.embedding_model,
            "input": text,
            "dimensions": self.config.embedding_dimension,
        });
        let value = post_json(&self.client, &url, &self.config.embedding_api_key, &body)
            .await
            .map_err(KnowledgeError::Embedding)?;
        parse_embedding(&value)
    }

    async fn vectorize(&self, action: &str, body: &Value) -> Result<Value, KnowledgeError> {
        post_json(
            &self.client,
            &self.index_url(action),
            &self.config.api_token,
            body,
        )
        .await
        .map_err(KnowledgeError::Index)
    }
}

async fn post_json(client: &Client, url: &str, token: &str, body: &Value) -> Result<Value, String> {
    let response = client
        .post(url)
        .bearer_auth(token)
        .json(body)
        .send()
        .await
        .map_err(|e| e.to_string())?;
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(format!("HTTP {}: {text}", status.as_u16()));
    }
    response.json().await.map_err(|e| e.to_string())
}

#[async_trait]
impl KnowledgeBase for VectorizeKnowledgeBase {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Passage>, KnowledgeError> {
        let vector = self.embed(query).await?;
        let body = json!({
            "vector": vector,
            "topK": top_k,
            "returnValues": false,
            "returnMetadata": "all",
        });
        let value = self.vectorize("query", &body).await?;
        let passages = parse_matches(&value)?;
        tracing::debug!(top_k, hits = passages.len(), "Knowledge search");
        Ok(passages)
    }

    async fn index(&self, passages: Vec<Passage>) -> Result<usize, KnowledgeError> {
        if passages.is_empty() {
            return Ok(0);
        }
        let mut vectors = Vec::with_capacity(passages.len());
        for passage in &passages {
            let values = self.embed(&passage.text).await?;
            vectors.push(vector_record(uuid::Uuid::new_v4().to_string(), values, passage));
        }
        let count = vectors.len();
        self.vectorize("insert", &json!({ "vectors": vectors })).await?;
        tracing::info!(count, "Indexed passages");
        Ok(count)
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

fn parse_embedding(value: &Value) -> Result<Vec<f32>, KnowledgeError> {
    let response: EmbeddingResponse = serde_json::from_value(value.clone())
        .map_err(|e| KnowledgeError::Response(format!("embedding: {e}")))?;
    response
        .data
        .into_iter()
        .next()
        .map(|d| d.embedding)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| KnowledgeError::Response("embedding response has no vector".to_string()))
}

/// Pull passages out of a Vectorize query result
fn parse_matches(value: &Value) -> Result<Vec<Passage>, KnowledgeError> {
    let matches = value
        .pointer("/result/matches")
        .and_then(Value::as_array)
        .ok_or_else(|| KnowledgeError::Response("query response has no matches".to_string()))?;

    Ok(matches
        .iter()
        .map(|m| {
            let field = |key: &str| {
                m.pointer(&format!("/metadata/{key}"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            };
            Passage {
                text: field("text").unwrap_or_default(),
                source: field("source").unwrap_or_else(|| UNKNOWN_SOURCE.to_string()),
            }
        })
        .collect())
}

#[derive(Debug, Serialize)]
struct VectorRecord {
    id: String,
    values: Vec<f32>,
    /// Vectorize only accepts string metadata values
    metadata: BTreeMap<String, String>,
}

fn vector_record(id: String, values: Vec<f32>, passage: &Passage) -> VectorRecord {
    let metadata = BTreeMap::from([
        ("source".to_string(), passage.source.clone()),
        ("text".to_string(), passage.text.clone()),
    ]);
    VectorRecord {
        id,
        values,
        metadata,
    }
}
