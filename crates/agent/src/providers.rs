//! Evidence providers: knowledge-base similarity search and live web search.
//!
//! Both are read-only callables behind narrow traits. A provider failure is
//! never fatal to a run - the retrieval nodes convert it into an empty
//! result and record the attempt - so these clients report errors faithfully
//! and leave recovery policy to the caller.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use revpilot_core::config::{KnowledgeBaseConfig, WebSearchConfig};

/// One retrieved knowledge-base chunk with whatever metadata the store kept
/// alongside it (source document, chunk index, ...).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub content: String,
    #[serde(default)]
    pub metadata: Value,
}

impl Passage {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: content.into(), metadata: Value::Null }
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider transport failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider returned status {status}: {message}")]
    Api { status: u16, message: String },
    #[error("provider response was malformed: {0}")]
    Malformed(String),
    #[error("provider is not configured: {0}")]
    Unconfigured(String),
}

#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Ordered passages for a query. An empty vec is a legitimate
    /// "no matches" outcome, not an error.
    async fn search(&self, query: &str) -> Result<Vec<Passage>, ProviderError>;
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Formatted text blob of search results; empty string when the search
    /// ran but found nothing.
    async fn search(&self, query: &str) -> Result<String, ProviderError>;
}

/// Similarity-search client for a pgvector-style RPC endpoint: the service
/// embeds the query server-side and returns the closest chunks.
pub struct PgVectorSearch {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
    match_count: u32,
    match_threshold: f32,
}

impl PgVectorSearch {
    pub fn from_config(config: &KnowledgeBaseConfig) -> Result<Self, ProviderError> {
        if config.endpoint.trim().is_empty() {
            return Err(ProviderError::Unconfigured(
                "knowledge_base.endpoint is not set".to_string(),
            ));
        }
        let client = reqwest::Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            match_count: config.match_count,
            match_threshold: config.match_threshold,
        })
    }
}

#[async_trait]
impl KnowledgeBase for PgVectorSearch {
    async fn search(&self, query: &str) -> Result<Vec<Passage>, ProviderError> {
        let request = MatchRequest {
            query,
            match_count: self.match_count,
            match_threshold: self.match_threshold,
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }
        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status: status.as_u16(), message });
        }

        let rows: Vec<MatchRow> = response.json().await?;
        Ok(rows
            .into_iter()
            .map(|row| Passage { content: row.content, metadata: row.metadata })
            .collect())
    }
}

#[derive(Serialize)]
struct MatchRequest<'a> {
    query: &'a str,
    match_count: u32,
    match_threshold: f32,
}

#[derive(Deserialize)]
struct MatchRow {
    content: String,
    #[serde(default)]
    metadata: Value,
}

/// Tavily web-search client. Results are flattened into numbered
/// title/URL/snippet blocks so the generator can cite them naturally.
pub struct TavilySearch {
    client: reqwest::Client,
    api_key: SecretString,
    max_results: u32,
    search_depth: String,
}

const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";

impl TavilySearch {
    pub fn from_config(config: &WebSearchConfig) -> Result<Self, ProviderError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            ProviderError::Unconfigured("web_search.api_key is not set".to_string())
        })?;
        let client = reqwest::Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            api_key,
            max_results: config.max_results,
            search_depth: config.search_depth.clone(),
        })
    }
}

#[async_trait]
impl WebSearch for TavilySearch {
    async fn search(&self, query: &str) -> Result<String, ProviderError> {
        let request = TavilyRequest {
            api_key: self.api_key.expose_secret(),
            query,
            search_depth: &self.search_depth,
            max_results: self.max_results,
        };

        let response = self.client.post(TAVILY_ENDPOINT).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status: status.as_u16(), message });
        }

        let payload: TavilyResponse = response.json().await?;
        Ok(format_web_results(&payload.results))
    }
}

fn format_web_results(results: &[TavilyResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(index, result)| {
            format!(
                "{}. {}\n   URL: {}\n   {}\n",
                index + 1,
                result.title,
                result.url,
                result.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    search_depth: &'a str,
    max_results: u32,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Clone, Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

#[cfg(test)]
mod tests {
    use revpilot_core::config::{KnowledgeBaseConfig, WebSearchConfig};

    use super::{format_web_results, PgVectorSearch, ProviderError, TavilyResult, TavilySearch};

    #[test]
    fn web_results_are_numbered_with_title_url_and_snippet() {
        let results = vec![
            TavilyResult {
                title: "SaaS benchmarks 2026".to_string(),
                url: "https://example.com/benchmarks".to_string(),
                content: "Median LTV:CAC for B2B SaaS held at 3.2".to_string(),
            },
            TavilyResult {
                title: "CAC trends".to_string(),
                url: "https://example.com/cac".to_string(),
                content: "Acquisition costs rose 11% year over year".to_string(),
            },
        ];

        let formatted = format_web_results(&results);
        assert!(formatted.starts_with("1. SaaS benchmarks 2026"));
        assert!(formatted.contains("URL: https://example.com/benchmarks"));
        assert!(formatted.contains("2. CAC trends"));
    }

    #[test]
    fn no_results_formats_to_an_empty_blob() {
        assert_eq!(format_web_results(&[]), "");
    }

    #[test]
    fn knowledge_base_requires_an_endpoint() {
        let result = PgVectorSearch::from_config(&KnowledgeBaseConfig {
            endpoint: "  ".to_string(),
            api_key: None,
            match_count: 5,
            match_threshold: 0.2,
        });
        assert!(matches!(result, Err(ProviderError::Unconfigured(_))));
    }

    #[test]
    fn web_search_requires_an_api_key() {
        let result = TavilySearch::from_config(&WebSearchConfig {
            api_key: None,
            max_results: 5,
            search_depth: "advanced".to_string(),
        });
        assert!(matches!(result, Err(ProviderError::Unconfigured(_))));
    }
}
