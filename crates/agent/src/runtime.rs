//! The injected entry point: one compiled graph shared by every request.
//!
//! `answer` never returns an error to the caller; failures surface as
//! apologetic text so a chat surface always has something to render.
//! `stream` drives the same graph step by step over a bounded channel and
//! treats a dropped receiver as cancellation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

use revpilot_core::config::GraphMode;

use crate::graph::{Graph, GraphError};
use crate::nodes::{build_graph, NodeId};
use crate::oracle::Oracle;
use crate::providers::{KnowledgeBase, WebSearch};
use crate::state::{AgentState, ChatMessage, Role, ToolChoice};

const FALLBACK_ANSWER: &str = "Sorry, I couldn't generate a response. Please try again.";
const EVENT_BUFFER: usize = 16;

/// Progress events for a streamed run, in the order they happen. Exactly one
/// terminal event (`Done` or `Error`) closes every stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AgentEvent {
    Routing(ToolChoice),
    Retrieving,
    Chunk(String),
    Done,
    Error(String),
}

pub struct AgentRuntime {
    graph: Arc<Graph<NodeId, AgentState>>,
}

impl AgentRuntime {
    pub fn new(
        mode: GraphMode,
        oracle: Arc<dyn Oracle>,
        knowledge_base: Arc<dyn KnowledgeBase>,
        web_search: Arc<dyn WebSearch>,
    ) -> Result<Self, GraphError> {
        let graph = build_graph(mode, oracle, knowledge_base, web_search)?;
        Ok(Self { graph: Arc::new(graph) })
    }

    /// Runs a query to completion and returns the answer text. Failures are
    /// folded into the returned string.
    pub async fn answer(&self, query: &str, history: Vec<ChatMessage>) -> String {
        match self.graph.run(AgentState::new(query, history)).await {
            Ok(state) => {
                info!(
                    tool_choice = ?state.tool_choice,
                    attempted = state.tools_attempted.len(),
                    "query completed"
                );
                state
                    .final_answer()
                    .map(str::to_string)
                    .unwrap_or_else(|| FALLBACK_ANSWER.to_string())
            }
            Err(error) => format!("Error processing query: {error}"),
        }
    }

    /// Streams a run's progress. The returned receiver yields routing and
    /// retrieval notices, the answer chunk, and a single terminal event.
    /// Dropping the receiver cancels the rest of the run.
    pub fn stream(
        &self,
        query: impl Into<String>,
        history: Vec<ChatMessage>,
    ) -> mpsc::Receiver<AgentEvent> {
        let (sender, receiver) = mpsc::channel(EVENT_BUFFER);
        let graph = Arc::clone(&self.graph);
        let initial = AgentState::new(query, history);

        tokio::spawn(async move {
            let mut walk = graph.walk(initial);
            let mut generated = false;

            while let Some(step) = walk.next_step().await {
                let step = match step {
                    Ok(step) => step,
                    Err(error) => {
                        let _ = sender
                            .send(AgentEvent::Error(format!("Error processing query: {error}")))
                            .await;
                        return;
                    }
                };

                let event = match step.node {
                    NodeId::AnalyzeAndRoute | NodeId::RouteQuery => {
                        step.update.tool_choice.map(AgentEvent::Routing)
                    }
                    NodeId::ExecuteKb | NodeId::ExecuteWeb | NodeId::ExecuteBoth => {
                        Some(AgentEvent::Retrieving)
                    }
                    NodeId::Generate => step
                        .update
                        .append_messages
                        .into_iter()
                        .rev()
                        .find(|message| message.role == Role::Assistant)
                        .map(|message| {
                            generated = true;
                            AgentEvent::Chunk(message.content)
                        }),
                    NodeId::AssessKnowledge | NodeId::Validate => None,
                };

                if let Some(event) = event {
                    if sender.send(event).await.is_err() {
                        // Receiver went away; abandon the run.
                        return;
                    }
                }
            }

            let terminal = if generated {
                AgentEvent::Done
            } else {
                AgentEvent::Error(FALLBACK_ANSWER.to_string())
            };
            let _ = sender.send(terminal).await;
        });

        receiver
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use revpilot_core::config::GraphMode;

    use crate::oracle::{Oracle, OracleError};
    use crate::providers::{KnowledgeBase, Passage, ProviderError, WebSearch};
    use crate::state::ToolChoice;

    use super::{AgentEvent, AgentRuntime};

    struct ScriptedOracle {
        scripted: Mutex<VecDeque<Value>>,
        answer: String,
    }

    impl ScriptedOracle {
        fn new(judgments: Vec<Value>, answer: &str) -> Arc<Self> {
            Arc::new(Self {
                scripted: Mutex::new(judgments.into()),
                answer: answer.to_string(),
            })
        }
    }

    #[async_trait]
    impl Oracle for ScriptedOracle {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String, OracleError> {
            Ok(self.answer.clone())
        }

        async fn complete_json(&self, _system: &str, _user: &str) -> Result<Value, OracleError> {
            Ok(self.scripted.lock().expect("lock").pop_front().unwrap_or_else(|| json!({})))
        }
    }

    struct FailingOracle;

    #[async_trait]
    impl Oracle for FailingOracle {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String, OracleError> {
            Err(OracleError::Api { status: 500, message: "down".to_string() })
        }

        async fn complete_json(&self, _system: &str, _user: &str) -> Result<Value, OracleError> {
            Err(OracleError::Api { status: 500, message: "down".to_string() })
        }
    }

    struct StubKb;

    #[async_trait]
    impl KnowledgeBase for StubKb {
        async fn search(&self, _query: &str) -> Result<Vec<Passage>, ProviderError> {
            Ok(vec![Passage::text("3:1 is the common benchmark")])
        }
    }

    struct StubWeb;

    #[async_trait]
    impl WebSearch for StubWeb {
        async fn search(&self, _query: &str) -> Result<String, ProviderError> {
            Ok("recent data".to_string())
        }
    }

    fn runtime_with(oracle: Arc<dyn Oracle>) -> AgentRuntime {
        AgentRuntime::new(GraphMode::Combined, oracle, Arc::new(StubKb), Arc::new(StubWeb))
            .expect("graph builds")
    }

    #[tokio::test]
    async fn answer_returns_the_generated_text() {
        let oracle = ScriptedOracle::new(
            vec![json!({"tool_choice": "knowledge_base"}), json!({"is_sufficient": true})],
            "The benchmark is 3:1.",
        );
        let runtime = runtime_with(oracle);

        let answer = runtime.answer("What's a healthy LTV:CAC ratio?", Vec::new()).await;
        assert_eq!(answer, "The benchmark is 3:1.");
    }

    #[tokio::test]
    async fn answer_folds_failures_into_text() {
        let runtime = runtime_with(Arc::new(FailingOracle));

        let answer = runtime.answer("anything", Vec::new()).await;
        assert!(answer.starts_with("Error processing query:"), "got: {answer}");
    }

    #[tokio::test]
    async fn stream_emits_routing_retrieval_chunk_then_done() {
        let oracle = ScriptedOracle::new(
            vec![json!({"tool_choice": "knowledge_base"}), json!({"is_sufficient": true})],
            "The benchmark is 3:1.",
        );
        let runtime = runtime_with(oracle);

        let mut receiver = runtime.stream("What's a healthy LTV:CAC ratio?", Vec::new());
        let mut events = Vec::new();
        while let Some(event) = receiver.recv().await {
            events.push(event);
        }

        assert_eq!(
            events,
            vec![
                AgentEvent::Routing(ToolChoice::KnowledgeBase),
                AgentEvent::Retrieving,
                AgentEvent::Chunk("The benchmark is 3:1.".to_string()),
                AgentEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn stream_ends_with_a_single_error_event_on_failure() {
        let runtime = runtime_with(Arc::new(FailingOracle));

        let mut receiver = runtime.stream("anything", Vec::new());
        let mut events = Vec::new();
        while let Some(event) = receiver.recv().await {
            events.push(event);
        }

        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], AgentEvent::Error(message)
            if message.starts_with("Error processing query:")));
    }

    #[tokio::test]
    async fn direct_route_streams_routing_then_answer() {
        let oracle = ScriptedOracle::new(vec![json!({"tool_choice": "none"})], "Hello!");
        let runtime = runtime_with(oracle);

        let mut receiver = runtime.stream("hi", Vec::new());
        let mut events = Vec::new();
        while let Some(event) = receiver.recv().await {
            events.push(event);
        }

        assert_eq!(
            events,
            vec![
                AgentEvent::Routing(ToolChoice::None),
                AgentEvent::Chunk("Hello!".to_string()),
                AgentEvent::Done,
            ]
        );
    }

    #[test]
    fn events_serialize_with_type_and_value_tags() {
        let routing = serde_json::to_value(AgentEvent::Routing(ToolChoice::Both)).expect("json");
        assert_eq!(routing, json!({"type": "routing", "value": "both"}));

        let retrieving = serde_json::to_value(AgentEvent::Retrieving).expect("json");
        assert_eq!(retrieving, json!({"type": "retrieving"}));

        let done = serde_json::to_value(AgentEvent::Done).expect("json");
        assert_eq!(done, json!({"type": "done"}));
    }
}
