//! Object storage for generated documents
//!
//! Cloudflare R2 speaks the S3 API, so uploads are plain path-style `PUT`s
//! signed with AWS Signature V4.

use crate::config::{env_opt, env_required, env_secs, ConfigError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

const REGION: &str = "auto";
const SERVICE: &str = "s3";
const SIGNED_HEADERS: &str = "content-type;host;x-amz-content-sha256;x-amz-date";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid storage endpoint: {0}")]
    Endpoint(String),
    #[error("request signing failed: {0}")]
    Signing(String),
    #[error("upload request failed: {0}")]
    Request(String),
    #[error("upload rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Stores a file and hands back a URL the user can open
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        content_type: &str,
    ) -> Result<String, StorageError>;
}

#[derive(Debug, Clone)]
pub struct R2Config {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint_url: String,
    pub bucket_name: String,
    pub public_url: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl R2Config {
    /// `None` when `R2_ACCESS_KEY_ID` is unset; once it is set the rest of
    /// the credentials are required.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(access_key_id) = env_opt("R2_ACCESS_KEY_ID") else {
            return Ok(None);
        };
        Ok(Some(Self {
            access_key_id,
            secret_access_key: env_required("R2_SECRET_ACCESS_KEY")?,
            endpoint_url: env_required("R2_ENDPOINT_URL")?,
            bucket_name: env_required("R2_BUCKET_NAME")?,
            public_url: env_required("R2_PUBLIC_URL")?,
            connect_timeout: env_secs("R2_CONNECT_TIMEOUT", 10)?,
            read_timeout: env_secs("R2_READ_TIMEOUT", 60)?,
        }))
    }
}

pub struct R2Storage {
    client: Client,
    config: R2Config,
}

impl R2Storage {
    pub fn new(config: R2Config) -> Result<Self, StorageError> {
        Url::parse(&config.endpoint_url).map_err(|e| StorageError::Endpoint(e.to_string()))?;
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .build()
            .map_err(|e| StorageError::Request(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn object_url(&self, key: &str) -> Result<Url, StorageError> {
        let raw = format!(
            "{}/{}/{}",
            self.config.endpoint_url.trim_end_matches('/'),
            self.config.bucket_name,
            key
        );
        Url::parse(&raw).map_err(|e| StorageError::Endpoint(e.to_string()))
    }

    fn public_link(&self, key: &str) -> String {
        format!("{}/{key}", self.config.public_url.trim_end_matches('/'))
    }
}

/// Unique object key that keeps the original extension
fn object_key(filename: &str) -> String {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    format!("{}{ext}", uuid::Uuid::new_v4())
}

#[async_trait]
impl ObjectStorage for R2Storage {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let key = object_key(filename);
        let url = self.object_url(&key)?;
        let payload_hash = hex::encode(Sha256::digest(&bytes));
        let signed = sign_put(
            &self.config.access_key_id,
            &self.config.secret_access_key,
            &url,
            content_type,
            &payload_hash,
            Utc::now(),
        )?;

        let size = bytes.len();
        let response = self
            .client
            .put(url)
            .header("Content-Type", content_type)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &signed.amz_date)
            .header("Authorization", &signed.authorization)
            .body(bytes)
            .send()
            .await
            .map_err(|e| StorageError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!(key = %key, size, "Uploaded object");
        Ok(self.public_link(&key))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SignedRequest {
    amz_date: String,
    authorization: String,
}

fn hmac_sha256(key: &[u8], data: &str) -> Result<Vec<u8>, StorageError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| StorageError::Signing(e.to_string()))?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Host header value as the client will send it
fn host_header(url: &Url) -> Result<String, StorageError> {
    let host = url
        .host_str()
        .ok_or_else(|| StorageError::Endpoint(format!("no host in {url}")))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// AWS Signature V4 for a single-chunk `PUT` with no query string
fn sign_put(
    access_key_id: &str,
    secret_access_key: &str,
    url: &Url,
    content_type: &str,
    payload_hash: &str,
    now: DateTime<Utc>,
) -> Result<SignedRequest, StorageError> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();
    let host = host_header(url)?;

    let canonical_request = format!(
        "PUT\n{path}\n\ncontent-type:{content_type}\nhost:{host}\nx-amz-content-sha256:{payload_hash}\nx-amz-date:{amz_date}\n\n{SIGNED_HEADERS}\n{payload_hash}",
        path = url.path(),
    );
    let scope = format!("{date}/{REGION}/{SERVICE}/aws4_request");
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let k_date = hmac_sha256(format!("AWS4{secret_access_key}").as_bytes(), &date)?;
    let k_region = hmac_sha256(&k_date, REGION)?;
    let k_service = hmac_sha256(&k_region, SERVICE)?;
    let k_signing = hmac_sha256(&k_service, "aws4_request")?;
    let signature = hex::encode(hmac_sha256(&k_signing, &string_to_sign)?);

    Ok(SignedRequest {
        authorization: format!(
            "AWS4-HMAC-SHA256 Credential={access_key_id}/{scope}, SignedHeaders={SIGNED_HEADERS}, Signature={signature}"
        ),
        amz_date,
    })
}
