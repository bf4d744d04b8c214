//! Startup configuration
//!
//! Everything is read from the environment once, in `main`, and then passed
//! down explicitly. Nothing below this module reads the environment after
//! startup.

use crate::llm::LlmConfig;
use crate::runtime::LoopConfig;
use crate::services::{R2Config, VectorizeConfig};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),
    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    pub fn invalid(name: &'static str, reason: impl std::fmt::Display) -> Self {
        ConfigError::Invalid {
            name,
            reason: reason.to_string(),
        }
    }
}

/// Trimmed value of `name`, treating blank as unset
pub fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn env_or(name: &str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_string())
}

pub fn env_required(name: &'static str) -> Result<String, ConfigError> {
    env_opt(name).ok_or(ConfigError::Missing(name))
}

pub fn env_parse<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_opt(name) {
        Some(raw) => raw.parse().map_err(|e| ConfigError::invalid(name, e)),
        None => Ok(default),
    }
}

pub fn env_secs(name: &'static str, default_secs: u64) -> Result<Duration, ConfigError> {
    env_parse(name, default_secs).map(Duration::from_secs)
}

impl LlmConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            api_key: env_required("LLM_API_KEY")?,
            api_base: env_or("LLM_API_BASE", &defaults.api_base),
            model: env_or("LLM_MODEL", &defaults.model),
            temperature: env_parse("LLM_TEMPERATURE", defaults.temperature)?,
            request_timeout: env_secs("LLM_REQUEST_TIMEOUT", defaults.request_timeout.as_secs())?,
            max_retries: env_parse("LLM_MAX_RETRIES", defaults.max_retries)?,
        })
    }
}

/// Listen address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: env_or("AGENT_HOST", "127.0.0.1"),
            port: env_parse("AGENT_PORT", 8100)?,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Complete process configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub agent: LoopConfig,
    /// Absent when R2 credentials are not set
    pub storage: Option<R2Config>,
    /// Absent when Vectorize credentials are not set
    pub knowledge: Option<VectorizeConfig>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server: ServerConfig::from_env()?,
            llm: LlmConfig::from_env()?,
            agent: LoopConfig::from_env()?,
            storage: R2Config::from_env()?,
            knowledge: VectorizeConfig::from_env()?,
        })
    }
}
