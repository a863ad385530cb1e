use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub knowledge_base: KnowledgeBaseConfig,
    pub web_search: WebSearchConfig,
    pub agent: AgentConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct KnowledgeBaseConfig {
    pub endpoint: String,
    pub api_key: Option<SecretString>,
    pub match_count: u32,
    pub match_threshold: f32,
}

#[derive(Clone, Debug)]
pub struct WebSearchConfig {
    pub api_key: Option<SecretString>,
    pub max_results: u32,
    pub search_depth: String,
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub graph_mode: GraphMode,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Which graph wiring the agent runs with. `Combined` folds the internal
/// knowledge assessment into the routing call; `Split` keeps the legacy
/// two-step assess-then-route shape.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphMode {
    #[default]
    Combined,
    Split,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub llm_api_key: Option<String>,
    pub llm_base_url: Option<String>,
    pub llm_model: Option<String>,
    pub knowledge_base_endpoint: Option<String>,
    pub knowledge_base_api_key: Option<String>,
    pub web_search_api_key: Option<String>,
    pub graph_mode: Option<GraphMode>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                api_key: None,
                base_url: "https://api.openai.com/v1".to_string(),
                model: "gpt-4o-mini".to_string(),
                temperature: 0.5,
                timeout_secs: 60,
            },
            knowledge_base: KnowledgeBaseConfig {
                endpoint: String::new(),
                api_key: None,
                match_count: 5,
                match_threshold: 0.2,
            },
            web_search: WebSearchConfig {
                api_key: None,
                max_results: 5,
                search_depth: "advanced".to_string(),
            },
            agent: AgentConfig { graph_mode: GraphMode::Combined },
            server: ServerConfig { bind_address: "0.0.0.0".to_string(), port: 8080 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for GraphMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "combined" => Ok(Self::Combined),
            "split" => Ok(Self::Split),
            other => Err(ConfigError::Validation(format!(
                "unsupported graph mode `{other}` (expected combined|split)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("revpilot.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(llm) = patch.llm {
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(knowledge_base) = patch.knowledge_base {
            if let Some(endpoint) = knowledge_base.endpoint {
                self.knowledge_base.endpoint = endpoint;
            }
            if let Some(api_key) = knowledge_base.api_key {
                self.knowledge_base.api_key = Some(secret_value(api_key));
            }
            if let Some(match_count) = knowledge_base.match_count {
                self.knowledge_base.match_count = match_count;
            }
            if let Some(match_threshold) = knowledge_base.match_threshold {
                self.knowledge_base.match_threshold = match_threshold;
            }
        }

        if let Some(web_search) = patch.web_search {
            if let Some(api_key) = web_search.api_key {
                self.web_search.api_key = Some(secret_value(api_key));
            }
            if let Some(max_results) = web_search.max_results {
                self.web_search.max_results = max_results;
            }
            if let Some(search_depth) = web_search.search_depth {
                self.web_search.search_depth = search_depth;
            }
        }

        if let Some(agent) = patch.agent {
            if let Some(graph_mode) = agent.graph_mode {
                self.agent.graph_mode = graph_mode;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("REVPILOT_LLM_API_KEY").or_else(|| read_env("OPENAI_API_KEY"))
        {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("REVPILOT_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = read_env("REVPILOT_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("REVPILOT_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("REVPILOT_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("REVPILOT_KB_ENDPOINT") {
            self.knowledge_base.endpoint = value;
        }
        if let Some(value) = read_env("REVPILOT_KB_API_KEY") {
            self.knowledge_base.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("REVPILOT_KB_MATCH_COUNT") {
            self.knowledge_base.match_count = parse_u32("REVPILOT_KB_MATCH_COUNT", &value)?;
        }

        if let Some(value) =
            read_env("REVPILOT_WEB_SEARCH_API_KEY").or_else(|| read_env("TAVILY_API_KEY"))
        {
            self.web_search.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("REVPILOT_WEB_SEARCH_MAX_RESULTS") {
            self.web_search.max_results = parse_u32("REVPILOT_WEB_SEARCH_MAX_RESULTS", &value)?;
        }

        if let Some(value) = read_env("REVPILOT_AGENT_GRAPH_MODE") {
            self.agent.graph_mode = value.parse()?;
        }

        if let Some(value) = read_env("REVPILOT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("REVPILOT_SERVER_PORT").or_else(|| read_env("PORT")) {
            self.server.port = parse_u16("REVPILOT_SERVER_PORT", &value)?;
        }

        if let Some(value) = read_env("REVPILOT_LOGGING_LEVEL") {
            self.logging.level = value;
        }
        if let Some(value) = read_env("REVPILOT_LOGGING_FORMAT") {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(llm_base_url) = overrides.llm_base_url {
            self.llm.base_url = llm_base_url;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(knowledge_base_endpoint) = overrides.knowledge_base_endpoint {
            self.knowledge_base.endpoint = knowledge_base_endpoint;
        }
        if let Some(knowledge_base_api_key) = overrides.knowledge_base_api_key {
            self.knowledge_base.api_key = Some(secret_value(knowledge_base_api_key));
        }
        if let Some(web_search_api_key) = overrides.web_search_api_key {
            self.web_search.api_key = Some(secret_value(web_search_api_key));
        }
        if let Some(graph_mode) = overrides.graph_mode {
            self.agent.graph_mode = graph_mode;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.llm.api_key.is_none() {
            return Err(ConfigError::Validation(
                "llm.api_key is required (set REVPILOT_LLM_API_KEY or OPENAI_API_KEY)".to_string(),
            ));
        }
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
        }
        if self.knowledge_base.endpoint.trim().is_empty() {
            return Err(ConfigError::Validation(
                "knowledge_base.endpoint is required (set REVPILOT_KB_ENDPOINT)".to_string(),
            ));
        }
        if self.web_search.api_key.is_none() {
            return Err(ConfigError::Validation(
                "web_search.api_key is required (set REVPILOT_WEB_SEARCH_API_KEY or TAVILY_API_KEY)"
                    .to_string(),
            ));
        }
        if self.knowledge_base.match_count == 0 {
            return Err(ConfigError::Validation(
                "knowledge_base.match_count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    llm: Option<LlmPatch>,
    knowledge_base: Option<KnowledgeBasePatch>,
    web_search: Option<WebSearchPatch>,
    agent: Option<AgentPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Deserialize)]
struct LlmPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct KnowledgeBasePatch {
    endpoint: Option<String>,
    api_key: Option<String>,
    match_count: Option<u32>,
    match_threshold: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct WebSearchPatch {
    api_key: Option<String>,
    max_results: Option<u32>,
    search_depth: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AgentPatch {
    graph_mode: Option<GraphMode>,
}

#[derive(Debug, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }
    let default = PathBuf::from("revpilot.toml");
    default.exists().then_some(default)
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    toml::from_str(&raw)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use secrecy::ExposeSecret;

    use super::{AppConfig, ConfigError, ConfigOverrides, GraphMode, LoadOptions, LogFormat};

    fn valid_overrides() -> ConfigOverrides {
        ConfigOverrides {
            llm_api_key: Some("sk-test".to_string()),
            knowledge_base_endpoint: Some("https://kb.example.com/rpc/match_documents".to_string()),
            web_search_api_key: Some("tvly-test".to_string()),
            ..ConfigOverrides::default()
        }
    }

    #[test]
    fn defaults_fail_validation_without_required_secrets() {
        let result = AppConfig::load(LoadOptions::default());
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn overrides_satisfy_validation() {
        let config = AppConfig::load(LoadOptions {
            overrides: valid_overrides(),
            ..LoadOptions::default()
        })
        .expect("overrides should produce a valid config");

        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.knowledge_base.match_count, 5);
        assert_eq!(config.web_search.max_results, 5);
        assert_eq!(config.agent.graph_mode, GraphMode::Combined);
        assert_eq!(config.logging.format, LogFormat::Compact);
        assert_eq!(
            config.llm.api_key.as_ref().map(|key| key.expose_secret().to_string()),
            Some("sk-test".to_string())
        );
    }

    #[test]
    fn config_file_patch_is_applied_before_overrides() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            r#"
[llm]
model = "gpt-4o"
temperature = 0.2

[agent]
graph_mode = "split"

[logging]
level = "debug"
format = "json"
"#
        )
        .expect("write config");

        let config = AppConfig::load(LoadOptions {
            config_path: Some(file.path().to_path_buf()),
            require_file: true,
            overrides: valid_overrides(),
        })
        .expect("config should load");

        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.agent.graph_mode, GraphMode::Split);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn missing_required_file_is_rejected() {
        let result = AppConfig::load(LoadOptions {
            config_path: Some("does-not-exist.toml".into()),
            require_file: true,
            overrides: valid_overrides(),
        });
        assert!(matches!(result, Err(ConfigError::MissingConfigFile(_))));
    }

    #[test]
    fn graph_mode_parses_known_values_only() {
        assert_eq!("combined".parse::<GraphMode>().expect("combined"), GraphMode::Combined);
        assert_eq!("SPLIT".parse::<GraphMode>().expect("split"), GraphMode::Split);
        assert!("both".parse::<GraphMode>().is_err());
    }

    #[test]
    fn zero_match_count_fails_validation() {
        let mut overrides = valid_overrides();
        overrides.knowledge_base_endpoint = Some("https://kb.example.com".to_string());
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[knowledge_base]\nmatch_count = 0").expect("write config");

        let result = AppConfig::load(LoadOptions {
            config_path: Some(file.path().to_path_buf()),
            require_file: true,
            overrides,
        });
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }
}
