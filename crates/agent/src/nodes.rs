//! The seven node behaviors and the three decision functions that wire the
//! agent graph together, plus `build_graph` which compiles either graph
//! mode from one set of nodes.
//!
//! Retrieval nodes absorb provider failures (empty evidence, attempt
//! recorded); only an oracle failure escapes a node and aborts the run.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use revpilot_core::config::GraphMode;

use crate::graph::{Graph, GraphBuilder, GraphError, Node, Transition};
use crate::oracle::Oracle;
use crate::prompts;
use crate::providers::{KnowledgeBase, WebSearch};
use crate::state::{
    AgentState, ChatMessage, ProviderKind, Role, StateUpdate, ToolChoice, ValidationOutcome,
};

/// Bounded prefix of each evidence body shown to the validator. Cost
/// control, not a correctness requirement.
pub const EVIDENCE_SAMPLE_CHARS: usize = 200;
/// At most this many knowledge-base passages reach the generator prompt.
pub const CONTEXT_PASSAGE_LIMIT: usize = 5;
/// At most this many prior turns reach the generator prompt.
pub const HISTORY_TURN_LIMIT: usize = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeId {
    /// Combined assessment + routing (default mode).
    AnalyzeAndRoute,
    /// Split-mode internal-knowledge assessment.
    AssessKnowledge,
    /// Split-mode explicit routing.
    RouteQuery,
    ExecuteKb,
    ExecuteWeb,
    ExecuteBoth,
    Validate,
    Generate,
}

// ---------------------------------------------------------------------------
// Assessment & routing nodes
// ---------------------------------------------------------------------------

pub struct AnalyzeAndRoute {
    oracle: Arc<dyn Oracle>,
}

impl AnalyzeAndRoute {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self { oracle }
    }
}

#[async_trait]
impl Node<AgentState> for AnalyzeAndRoute {
    async fn run(&self, state: &AgentState) -> anyhow::Result<StateUpdate> {
        let question = state.question().to_string();
        let verdict = self
            .oracle
            .complete_json(prompts::COMBINED_ROUTER_SYSTEM, &format!("User query: {question}"))
            .await?;
        let tool_choice = parse_tool_choice(&verdict);
        debug!(?tool_choice, "combined routing decision");

        Ok(StateUpdate {
            pending_question: Some(question),
            tool_choice: Some(tool_choice),
            ..StateUpdate::default()
        })
    }
}

pub struct AssessKnowledge {
    oracle: Arc<dyn Oracle>,
}

impl AssessKnowledge {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self { oracle }
    }
}

#[async_trait]
impl Node<AgentState> for AssessKnowledge {
    async fn run(&self, state: &AgentState) -> anyhow::Result<StateUpdate> {
        let question = state.question().to_string();
        let assessment = self
            .oracle
            .complete_json(prompts::ASSESSMENT_SYSTEM, &format!("Query: {question}"))
            .await?;
        let can_answer =
            assessment.get("can_answer").and_then(Value::as_bool).unwrap_or(false);
        debug!(can_answer, "internal knowledge assessment");

        Ok(StateUpdate {
            pending_question: Some(question),
            can_answer_directly: Some(can_answer),
            ..StateUpdate::default()
        })
    }
}

pub struct RouteQuery {
    oracle: Arc<dyn Oracle>,
}

impl RouteQuery {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self { oracle }
    }
}

#[async_trait]
impl Node<AgentState> for RouteQuery {
    async fn run(&self, state: &AgentState) -> anyhow::Result<StateUpdate> {
        let question = state.question().to_string();
        let verdict = self
            .oracle
            .complete_json(prompts::ROUTER_SYSTEM, &format!("User query: {question}"))
            .await?;
        let tool_choice = parse_tool_choice(&verdict);
        debug!(?tool_choice, "routing decision");

        Ok(StateUpdate {
            pending_question: Some(question),
            tool_choice: Some(tool_choice),
            ..StateUpdate::default()
        })
    }
}

// ---------------------------------------------------------------------------
// Retrieval nodes
// ---------------------------------------------------------------------------

pub struct ExecuteKb {
    knowledge_base: Arc<dyn KnowledgeBase>,
}

impl ExecuteKb {
    pub fn new(knowledge_base: Arc<dyn KnowledgeBase>) -> Self {
        Self { knowledge_base }
    }
}

#[async_trait]
impl Node<AgentState> for ExecuteKb {
    async fn run(&self, state: &AgentState) -> anyhow::Result<StateUpdate> {
        let passages = match self.knowledge_base.search(state.question()).await {
            Ok(passages) => passages,
            Err(error) => {
                warn!(error = %error, "knowledge base retrieval failed");
                Vec::new()
            }
        };

        Ok(StateUpdate {
            kb_evidence: Some(passages),
            attempted: vec![ProviderKind::KnowledgeBase],
            ..StateUpdate::default()
        })
    }
}

pub struct ExecuteWeb {
    web_search: Arc<dyn WebSearch>,
}

impl ExecuteWeb {
    pub fn new(web_search: Arc<dyn WebSearch>) -> Self {
        Self { web_search }
    }
}

#[async_trait]
impl Node<AgentState> for ExecuteWeb {
    async fn run(&self, state: &AgentState) -> anyhow::Result<StateUpdate> {
        let blob = match self.web_search.search(state.question()).await {
            Ok(blob) => blob,
            Err(error) => {
                warn!(error = %error, "web search failed");
                String::new()
            }
        };

        Ok(StateUpdate {
            web_evidence: Some(blob),
            attempted: vec![ProviderKind::WebSearch],
            ..StateUpdate::default()
        })
    }
}

pub struct ExecuteBoth {
    knowledge_base: Arc<dyn KnowledgeBase>,
    web_search: Arc<dyn WebSearch>,
}

impl ExecuteBoth {
    pub fn new(knowledge_base: Arc<dyn KnowledgeBase>, web_search: Arc<dyn WebSearch>) -> Self {
        Self { knowledge_base, web_search }
    }
}

#[async_trait]
impl Node<AgentState> for ExecuteBoth {
    async fn run(&self, state: &AgentState) -> anyhow::Result<StateUpdate> {
        let question = state.question();
        // Independent read-only calls; a failure in one must not blank the
        // other, and both attempts are recorded regardless of outcome.
        let (kb_result, web_result) =
            tokio::join!(self.knowledge_base.search(question), self.web_search.search(question));

        let passages = kb_result.unwrap_or_else(|error| {
            warn!(error = %error, "knowledge base retrieval failed");
            Vec::new()
        });
        let blob = web_result.unwrap_or_else(|error| {
            warn!(error = %error, "web search failed");
            String::new()
        });

        Ok(StateUpdate {
            kb_evidence: Some(passages),
            web_evidence: Some(blob),
            attempted: vec![ProviderKind::KnowledgeBase, ProviderKind::WebSearch],
            ..StateUpdate::default()
        })
    }
}

// ---------------------------------------------------------------------------
// Validation node
// ---------------------------------------------------------------------------

pub struct Validate {
    oracle: Arc<dyn Oracle>,
}

impl Validate {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self { oracle }
    }
}

#[async_trait]
impl Node<AgentState> for Validate {
    async fn run(&self, state: &AgentState) -> anyhow::Result<StateUpdate> {
        let prompt = validation_user_prompt(state);
        let verdict = self.oracle.complete_json(prompts::VALIDATOR_SYSTEM, &prompt).await?;
        let outcome = parse_validation_verdict(&verdict);
        debug!(?outcome, "evidence validation");

        Ok(StateUpdate { validation_outcome: Some(outcome), ..StateUpdate::default() })
    }
}

fn validation_user_prompt(state: &AgentState) -> String {
    let kb_sample = state
        .kb_evidence
        .as_ref()
        .and_then(|passages| passages.first())
        .map(|passage| sample_prefix(&passage.content))
        .filter(|sample| !sample.is_empty());
    let web_sample = state
        .web_evidence
        .as_ref()
        .map(|blob| sample_prefix(blob))
        .filter(|sample| !sample.is_empty());

    format!(
        "User query: {question}\n\n\
         Knowledge Base Results Available: {has_kb}\n\
         Knowledge Base Sample: {kb_sample}\n\n\
         Web Search Results Available: {has_web}\n\
         Web Search Sample: {web_sample}\n\n\
         Tool Choice Was: {tool_choice}\n\n\
         Assess the quality of the available results.",
        question = state.question(),
        has_kb = if state.has_kb_evidence() { "Yes" } else { "No" },
        kb_sample = kb_sample.as_deref().unwrap_or("None"),
        has_web = if state.has_web_evidence() { "Yes" } else { "No" },
        web_sample = web_sample.as_deref().unwrap_or("None"),
        tool_choice = tool_choice_label(state.tool_choice),
    )
}

/// First `EVIDENCE_SAMPLE_CHARS` characters of an evidence body, with an
/// ellipsis when truncated. Char-based so multibyte content stays intact.
fn sample_prefix(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= EVIDENCE_SAMPLE_CHARS {
        return trimmed.to_string();
    }
    let mut sample: String = trimmed.chars().take(EVIDENCE_SAMPLE_CHARS).collect();
    sample.push_str("...");
    sample
}

fn tool_choice_label(choice: Option<ToolChoice>) -> &'static str {
    match choice {
        Some(ToolChoice::KnowledgeBase) => "knowledge_base",
        Some(ToolChoice::WebSearch) => "web_search",
        Some(ToolChoice::Both) => "both",
        Some(ToolChoice::None) | None => "none",
    }
}

// ---------------------------------------------------------------------------
// Generation node (terminal)
// ---------------------------------------------------------------------------

pub struct Generate {
    oracle: Arc<dyn Oracle>,
}

impl Generate {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self { oracle }
    }
}

#[async_trait]
impl Node<AgentState> for Generate {
    async fn run(&self, state: &AgentState) -> anyhow::Result<StateUpdate> {
        let context_instruction = context_instruction(state);
        let history_block = history_block(&state.prior_turns);
        let system = prompts::generator_system(&context_instruction, &history_block);

        let answer = self.oracle.complete(&system, state.question()).await?;

        Ok(StateUpdate {
            append_messages: vec![ChatMessage::assistant(answer)],
            ..StateUpdate::default()
        })
    }
}

fn context_instruction(state: &AgentState) -> String {
    let mut context_parts = Vec::new();

    if state.has_kb_evidence() {
        if let Some(passages) = &state.kb_evidence {
            let kb_context = passages
                .iter()
                .take(CONTEXT_PASSAGE_LIMIT)
                .map(|passage| passage.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            context_parts.push(format!("**Knowledge Base Context:**\n{kb_context}"));
        }
    }
    if state.has_web_evidence() {
        if let Some(blob) = &state.web_evidence {
            context_parts.push(format!("**Current Web Search Results:**\n{blob}"));
        }
    }

    if context_parts.is_empty() {
        prompts::UNGROUNDED_CONTEXT_INSTRUCTION.to_string()
    } else {
        format!(
            "Use the following context to inform your response:\n\n{}",
            context_parts.join("\n\n---\n\n")
        )
    }
}

fn history_block(prior_turns: &[ChatMessage]) -> String {
    if prior_turns.is_empty() {
        return String::new();
    }

    let start = prior_turns.len().saturating_sub(HISTORY_TURN_LIMIT);
    let mut block = String::from("**Previous Conversation:**\n");
    for message in &prior_turns[start..] {
        let role = match message.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::System => "System",
        };
        block.push_str(&format!("{role}: {content}\n", content = message.content));
    }
    block.push_str("\nConsider this conversation history for contextually relevant answers.");
    block
}

// ---------------------------------------------------------------------------
// Decision functions
// ---------------------------------------------------------------------------

fn parse_tool_choice(verdict: &Value) -> ToolChoice {
    verdict
        .get("tool_choice")
        .and_then(Value::as_str)
        .map(ToolChoice::parse_lenient)
        .unwrap_or(ToolChoice::None)
}

/// An unreadable verdict counts as sufficient: the run prefers forward
/// progress to spending retrieval retries on an oracle formatting defect.
fn parse_validation_verdict(verdict: &Value) -> ValidationOutcome {
    match verdict.get("is_sufficient").and_then(Value::as_bool) {
        Some(false) => ValidationOutcome::Insufficient,
        _ => ValidationOutcome::Sufficient,
    }
}

/// Split mode: answer directly or hand off to explicit routing.
pub fn assessment_decision(state: &AgentState) -> Transition<NodeId> {
    if state.can_answer_directly.unwrap_or(false) {
        Transition::To(NodeId::Generate)
    } else {
        Transition::To(NodeId::RouteQuery)
    }
}

/// Maps the routing category to its retrieval node. `None` (including any
/// category the oracle invented) goes straight to generation.
pub fn routing_decision(state: &AgentState) -> Transition<NodeId> {
    match state.tool_choice.unwrap_or(ToolChoice::None) {
        ToolChoice::KnowledgeBase => Transition::To(NodeId::ExecuteKb),
        ToolChoice::WebSearch => Transition::To(NodeId::ExecuteWeb),
        ToolChoice::Both => Transition::To(NodeId::ExecuteBoth),
        ToolChoice::None => Transition::To(NodeId::Generate),
    }
}

/// The retry state machine. Bounded by `tools_attempted`: each provider is
/// retried at most once, after which the run falls back to generation from
/// oracle knowledge rather than looping.
pub fn validation_decision(state: &AgentState) -> Transition<NodeId> {
    if state.validation_outcome == Some(ValidationOutcome::Sufficient) {
        return Transition::To(NodeId::Generate);
    }

    if state.tools_attempted.both_attempted() {
        // Retries exhausted; generate from oracle knowledge.
        return Transition::To(NodeId::Generate);
    }

    if state.validation_outcome == Some(ValidationOutcome::Insufficient) {
        let kb_tried = state.tools_attempted.contains(ProviderKind::KnowledgeBase);
        let web_tried = state.tools_attempted.contains(ProviderKind::WebSearch);

        if kb_tried && !web_tried {
            return Transition::To(NodeId::ExecuteWeb);
        }
        if web_tried && !kb_tried {
            return Transition::To(NodeId::ExecuteKb);
        }
        if state.tools_attempted.is_empty() {
            // Only reachable if validation ran without any retrieval; cross
            // over from the original routing choice.
            return if state.tool_choice == Some(ToolChoice::KnowledgeBase) {
                Transition::To(NodeId::ExecuteWeb)
            } else {
                Transition::To(NodeId::ExecuteKb)
            };
        }
    }

    // Defensive default: always make forward progress.
    Transition::To(NodeId::Generate)
}

// ---------------------------------------------------------------------------
// Graph construction
// ---------------------------------------------------------------------------

/// Compiles the agent graph for the requested mode. Both modes share the
/// retrieval/validation/generation wiring; only the entry side differs.
pub fn build_graph(
    mode: GraphMode,
    oracle: Arc<dyn Oracle>,
    knowledge_base: Arc<dyn KnowledgeBase>,
    web_search: Arc<dyn WebSearch>,
) -> Result<Graph<NodeId, AgentState>, GraphError> {
    let builder = GraphBuilder::new()
        .node(NodeId::ExecuteKb, ExecuteKb::new(Arc::clone(&knowledge_base)))
        .node(NodeId::ExecuteWeb, ExecuteWeb::new(Arc::clone(&web_search)))
        .node(NodeId::ExecuteBoth, ExecuteBoth::new(knowledge_base, web_search))
        .node(NodeId::Validate, Validate::new(Arc::clone(&oracle)))
        .node(NodeId::Generate, Generate::new(Arc::clone(&oracle)))
        .edge(NodeId::ExecuteKb, Transition::To(NodeId::Validate))
        .edge(NodeId::ExecuteWeb, Transition::To(NodeId::Validate))
        .edge(NodeId::ExecuteBoth, Transition::To(NodeId::Validate))
        .conditional(NodeId::Validate, validation_decision)
        .edge(NodeId::Generate, Transition::End);

    let builder = match mode {
        GraphMode::Combined => builder
            .node(NodeId::AnalyzeAndRoute, AnalyzeAndRoute::new(oracle))
            .conditional(NodeId::AnalyzeAndRoute, routing_decision)
            .entry(NodeId::AnalyzeAndRoute),
        GraphMode::Split => builder
            .node(NodeId::AssessKnowledge, AssessKnowledge::new(Arc::clone(&oracle)))
            .node(NodeId::RouteQuery, RouteQuery::new(oracle))
            .conditional(NodeId::AssessKnowledge, assessment_decision)
            .conditional(NodeId::RouteQuery, routing_decision)
            .entry(NodeId::AssessKnowledge),
    };

    builder.build()
}
