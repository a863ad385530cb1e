//! The decision/generation service behind the agent.
//!
//! Nodes depend only on the [`Oracle`] trait; prompts travel as plain text
//! and structured judgments come back as JSON values that the nodes parse
//! defensively. An oracle failure is the one failure class that is fatal to
//! a run - no node can make progress without it.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use revpilot_core::config::LlmConfig;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle transport failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("oracle returned status {status}: {message}")]
    Api { status: u16, message: String },
    #[error("oracle response was malformed: {0}")]
    Malformed(String),
    #[error("oracle is not configured: {0}")]
    Unconfigured(String),
}

#[async_trait]
pub trait Oracle: Send + Sync {
    /// Free-text completion for a system/user prompt pair.
    async fn complete(&self, system: &str, user: &str) -> Result<String, OracleError>;

    /// Structured judgment: the completion is requested in JSON mode and
    /// parsed into a value. Field-level interpretation is the caller's job.
    async fn complete_json(&self, system: &str, user: &str) -> Result<Value, OracleError>;
}

/// Chat-completions client for OpenAI-compatible endpoints. Stateless and
/// safe to share across concurrent runs.
pub struct OpenAiOracle {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    temperature: f32,
}

impl OpenAiOracle {
    pub fn from_config(config: &LlmConfig) -> Result<Self, OracleError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| OracleError::Unconfigured("llm.api_key is not set".to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    async fn chat(&self, system: &str, user: &str, json_mode: bool) -> Result<String, OracleError> {
        let request = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: vec![
                ChatRequestMessage { role: "system", content: system },
                ChatRequestMessage { role: "user", content: user },
            ],
            response_format: json_mode.then_some(ResponseFormat { kind: "json_object" }),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(OracleError::Api { status: status.as_u16(), message });
        }

        let completion: ChatResponse = response.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| OracleError::Malformed("completion contained no choices".to_string()))
    }
}

#[async_trait]
impl Oracle for OpenAiOracle {
    async fn complete(&self, system: &str, user: &str) -> Result<String, OracleError> {
        self.chat(system, user, false).await
    }

    async fn complete_json(&self, system: &str, user: &str) -> Result<Value, OracleError> {
        let raw = self.chat(system, user, true).await?;
        serde_json::from_str(&raw).map_err(|error| {
            OracleError::Malformed(format!("expected JSON object, got parse error: {error}"))
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatRequestMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ChatRequestMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use revpilot_core::config::LlmConfig;

    use super::{OpenAiOracle, OracleError};

    fn config_with_key(api_key: Option<&str>) -> LlmConfig {
        LlmConfig {
            api_key: api_key.map(|key| key.to_string().into()),
            base_url: "https://api.openai.com/v1/".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.5,
            timeout_secs: 30,
        }
    }

    #[test]
    fn construction_requires_an_api_key() {
        let result = OpenAiOracle::from_config(&config_with_key(None));
        assert!(matches!(result, Err(OracleError::Unconfigured(_))));
    }

    #[test]
    fn base_url_is_normalized_without_trailing_slash() {
        let oracle =
            OpenAiOracle::from_config(&config_with_key(Some("sk-test"))).expect("oracle builds");
        assert_eq!(oracle.base_url, "https://api.openai.com/v1");
    }
}
