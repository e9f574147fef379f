//! Pipeline configuration.
//!
//! Everything has a built-in default, so the tool runs without a file. An
//! optional YAML file overrides any subset of fields:
//!
//! ```yaml
//! lookback_days: 7
//! max_items_per_query: 5
//! sources:
//!   - { source: search-en, query: "AI fintech" }
//!   - { source: 36kr, query: "AI 金融", limit: 10 }
//!   - { source: sspai }
//! summarizer:
//!   model: gpt-4o-mini
//! site:
//!   title: AI Fintech Weekly
//! ```
//!
//! Command-line flags and their environment variables are applied on top
//! (see [`crate::cli::Cli`]). The API key is never read from the file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;
use crate::models::{DEFAULT_LOOKBACK_DAYS, SourceId};
use crate::sources::SourceQuery;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub lookback_days: u32,
    pub max_items_per_query: usize,
    pub request_timeout_secs: u64,
    /// Query plan. Order decides which copy survives deduplication.
    pub sources: Vec<SourceQuery>,
    pub summarizer: SummarizerConfig,
    pub site: SiteConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            max_items_per_query: 5,
            request_timeout_secs: 10,
            sources: default_sources(),
            summarizer: SummarizerConfig::default(),
            site: SiteConfig::default(),
        }
    }
}

fn default_sources() -> Vec<SourceQuery> {
    let en = [
        "AI fintech",
        "artificial intelligence finance",
        "AI banking technology",
        "LLM financial services",
    ];
    let zh = ["AI 金融科技", "人工智能 银行", "大模型 金融应用"];

    en.into_iter()
        .map(|q| SourceQuery::new(SourceId::SearchEn, Some(q)))
        .chain(zh.into_iter().map(|q| SourceQuery::new(SourceId::SearchZh, Some(q))))
        .chain([
            SourceQuery::new(SourceId::Kr36, Some("AI 金融")),
            SourceQuery::new(SourceId::Sspai, None),
        ])
        .collect()
}

/// OpenAI-compatible chat completion settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub max_retries: usize,
    /// Language the digest is written in.
    pub language: String,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: 2000,
            timeout_secs: 120,
            max_retries: 3,
            language: "Simplified Chinese".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub title: String,
    pub description: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            title: "AI Fintech Weekly".to_string(),
            description: "A weekly digest of AI in finance, in English and Chinese.".to_string(),
        }
    }
}

impl Config {
    /// Load from `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Config::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Config::from_yaml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        info!(path = %path.display(), sources = config.sources.len(), "Loaded configuration");
        Ok(config)
    }

    /// Parse a configuration document. Missing keys take their defaults.
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    /// Reject settings the pipeline cannot run with. Call after CLI
    /// overrides have been applied.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::Invalid("at least one source query is required".to_string()));
        }
        if self.max_items_per_query == 0 {
            return Err(ConfigError::Invalid("max_items_per_query must be positive".to_string()));
        }
        if self.request_timeout_secs == 0 || self.summarizer.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".to_string()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_plan_order() {
        let config = Config::default();
        assert_eq!(config.sources.len(), 9);
        assert_eq!(config.sources[0].source, SourceId::SearchEn);
        assert_eq!(config.sources[0].query.as_deref(), Some("AI fintech"));
        assert_eq!(config.sources[4].source, SourceId::SearchZh);
        assert_eq!(config.sources[7].source, SourceId::Kr36);
        assert_eq!(config.sources[8].source, SourceId::Sspai);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
lookback_days: 14
sources:
  - { source: 36kr, query: "AI 金融", limit: 10 }
  - { source: search-en, query: "robo advisor" }
summarizer:
  model: deepseek-chat
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.lookback_days, 14);
        assert_eq!(config.max_items_per_query, 5);
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].limit, Some(10));
        assert_eq!(config.summarizer.model, "deepseek-chat");
        assert_eq!(config.summarizer.base_url, "https://api.openai.com/v1");
        assert_eq!(config.site.title, "AI Fintech Weekly");
    }

    #[test]
    fn test_unknown_source_is_rejected() {
        let yaml = "sources:\n  - { source: reddit }\n";
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_validate_rejects_empty_plan() {
        let config = Config {
            sources: vec![],
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "max_items_per_query: 3\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.max_items_per_query, 3);

        let missing = dir.path().join("nope.yaml");
        assert!(matches!(Config::load(Some(&missing)), Err(ConfigError::Read { .. })));
    }
}
