use std::sync::Arc;

use revpilot_agent::graph::GraphError;
use revpilot_agent::oracle::{OpenAiOracle, OracleError};
use revpilot_agent::providers::{PgVectorSearch, ProviderError, TavilySearch};
use revpilot_agent::runtime::AgentRuntime;
use revpilot_core::config::{AppConfig, ConfigError, LoadOptions};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub runtime: Arc<AgentRuntime>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("oracle setup failed: {0}")]
    Oracle(#[from] OracleError),
    #[error("provider setup failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("graph wiring failed: {0}")]
    Wiring(#[from] GraphError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

/// Builds the agent runtime from an already-loaded config. Every external
/// client is constructed here so configuration failures surface at startup
/// rather than on the first query.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        graph_mode = ?config.agent.graph_mode,
        model = %config.llm.model,
        "starting application bootstrap"
    );

    let oracle = Arc::new(OpenAiOracle::from_config(&config.llm)?);
    let knowledge_base = Arc::new(PgVectorSearch::from_config(&config.knowledge_base)?);
    let web_search = Arc::new(TavilySearch::from_config(&config.web_search)?);

    let runtime = AgentRuntime::new(config.agent.graph_mode, oracle, knowledge_base, web_search)?;

    info!(event_name = "system.bootstrap.runtime_ready", "agent runtime compiled");

    Ok(Application { config, runtime: Arc::new(runtime) })
}
