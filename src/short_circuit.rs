//! Terminal tool output detection
//!
//! Some capabilities already produce the user-facing deliverable. When the
//! newest tool result contains one of the configured markers, the turn ends
//! with that text instead of another model pass.

use crate::config::env_opt;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Locale -> marker substrings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerConfig {
    markers: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Error)]
#[error("SHORT_CIRCUIT_MARKERS must be a JSON object of string arrays: {0}")]
pub struct MarkerConfigError(#[from] serde_json::Error);

impl Default for MarkerConfig {
    fn default() -> Self {
        let mut markers = BTreeMap::new();
        markers.insert(
            "zh".to_string(),
            vec!["文档已生成完成".to_string(), "点击下载".to_string()],
        );
        markers.insert(
            "en".to_string(),
            vec!["Download link:".to_string(), "[Download".to_string()],
        );
        Self { markers }
    }
}

impl MarkerConfig {
    /// An empty marker set; nothing ever short-circuits
    pub fn empty() -> Self {
        Self {
            markers: BTreeMap::new(),
        }
    }

    /// Defaults, with any locales from `SHORT_CIRCUIT_MARKERS` replacing
    /// the default list for that locale.
    pub fn from_env() -> Result<Self, MarkerConfigError> {
        let mut config = Self::default();
        if let Some(raw) = env_opt("SHORT_CIRCUIT_MARKERS") {
            config.merge_json(&raw)?;
        }
        Ok(config)
    }

    pub fn merge_json(&mut self, raw: &str) -> Result<(), MarkerConfigError> {
        let overrides: BTreeMap<String, Vec<String>> = serde_json::from_str(raw)?;
        for (locale, list) in overrides {
            self.insert(locale, list);
        }
        Ok(())
    }

    pub fn insert(&mut self, locale: impl Into<String>, markers: Vec<String>) {
        let markers = markers.into_iter().filter(|m| !m.is_empty()).collect();
        self.markers.insert(locale.into(), markers);
    }

    pub fn locales(&self) -> impl Iterator<Item = &str> {
        self.markers.keys().map(String::as_str)
    }
}

/// Which marker matched, for logging
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShortCircuitMatch {
    pub locale: String,
    pub marker: String,
}

/// Decides whether a tool result is already the final answer
#[derive(Debug, Clone, Default)]
pub struct ShortCircuitPolicy {
    config: MarkerConfig,
}

impl ShortCircuitPolicy {
    pub fn new(config: MarkerConfig) -> Self {
        Self { config }
    }

    /// First matching marker, scanning locales in sorted order
    pub fn check(&self, tool_output: &str) -> Option<ShortCircuitMatch> {
        self.config
            .markers
            .iter()
            .flat_map(|(locale, markers)| markers.iter().map(move |m| (locale, m)))
            .find(|(_, marker)| tool_output.contains(marker.as_str()))
            .map(|(locale, marker)| ShortCircuitMatch {
                locale: locale.clone(),
                marker: marker.clone(),
            })
    }
}
