//! The typed record threaded through every node of the agent graph.
//!
//! Every field is declared up front and mutated only through
//! [`AgentState::apply`]: scalar fields overwrite, the conversation log
//! appends, and the tools-attempted set unions. `None` on an evidence field
//! means the provider was never attempted; `Some` of an empty collection
//! means it was attempted and returned nothing - the validator and the retry
//! logic rely on that distinction.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::graph::GraphState;
use crate::providers::Passage;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Routing category chosen by the oracle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    KnowledgeBase,
    WebSearch,
    Both,
    None,
}

impl ToolChoice {
    /// Parses an oracle-produced category. Anything outside the expected
    /// alphabet maps to `None`: generation can always proceed ungrounded,
    /// so an unrecognized category must never abort a run.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "knowledge_base" | "rag" => Self::KnowledgeBase,
            "web_search" | "tavily" => Self::WebSearch,
            "both" => Self::Both,
            _ => Self::None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationOutcome {
    Sufficient,
    Insufficient,
}

/// The two evidence providers the agent can consult.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    KnowledgeBase,
    WebSearch,
}

/// Bookkeeping set that bounds retries: it only grows, inserts are
/// idempotent, and with two possible members the validator can loop back to
/// retrieval at most twice per run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ToolsAttempted(BTreeSet<ProviderKind>);

impl ToolsAttempted {
    pub fn insert(&mut self, provider: ProviderKind) {
        self.0.insert(provider);
    }

    pub fn contains(&self, provider: ProviderKind) -> bool {
        self.0.contains(&provider)
    }

    pub fn both_attempted(&self) -> bool {
        self.0.len() == 2
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = ProviderKind> + '_ {
        self.0.iter().copied()
    }
}

/// State for one agent run. Created fresh per request, never shared.
#[derive(Clone, Debug, Default)]
pub struct AgentState {
    /// Append-only message log; the last message is the active query at the
    /// start of a run and the generated answer at the end.
    pub conversation: Vec<ChatMessage>,
    /// Set once from the latest user message, immutable afterwards.
    pub pending_question: Option<String>,
    /// Caller-supplied prior turns; read-only context for generation.
    pub prior_turns: Vec<ChatMessage>,
    pub tool_choice: Option<ToolChoice>,
    pub kb_evidence: Option<Vec<Passage>>,
    pub web_evidence: Option<String>,
    /// Split-mode internal-knowledge assessment; absent in combined mode.
    pub can_answer_directly: Option<bool>,
    pub validation_outcome: Option<ValidationOutcome>,
    pub tools_attempted: ToolsAttempted,
}

impl AgentState {
    pub fn new(query: impl Into<String>, prior_turns: Vec<ChatMessage>) -> Self {
        Self {
            conversation: vec![ChatMessage::user(query)],
            prior_turns,
            ..Self::default()
        }
    }

    /// The active query: the pending question once set, otherwise the latest
    /// user message in the conversation log.
    pub fn question(&self) -> &str {
        if let Some(question) = &self.pending_question {
            return question;
        }
        self.conversation
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.as_str())
            .unwrap_or_default()
    }

    /// Attempted and produced at least one passage.
    pub fn has_kb_evidence(&self) -> bool {
        self.kb_evidence.as_ref().is_some_and(|passages| !passages.is_empty())
    }

    /// Attempted and produced a non-blank blob.
    pub fn has_web_evidence(&self) -> bool {
        self.web_evidence.as_ref().is_some_and(|blob| !blob.trim().is_empty())
    }

    pub fn final_answer(&self) -> Option<&str> {
        self.conversation
            .iter()
            .rev()
            .find(|message| message.role == Role::Assistant)
            .map(|message| message.content.as_str())
    }
}

/// Partial update returned by a node. Only the slots a node sets are merged;
/// everything else is left untouched.
#[derive(Clone, Debug, Default)]
pub struct StateUpdate {
    pub append_messages: Vec<ChatMessage>,
    pub pending_question: Option<String>,
    pub tool_choice: Option<ToolChoice>,
    pub kb_evidence: Option<Vec<Passage>>,
    pub web_evidence: Option<String>,
    pub can_answer_directly: Option<bool>,
    pub validation_outcome: Option<ValidationOutcome>,
    pub attempted: Vec<ProviderKind>,
}

impl GraphState for AgentState {
    type Update = StateUpdate;

    fn apply(&mut self, update: StateUpdate) {
        self.conversation.extend(update.append_messages);
        if let Some(question) = update.pending_question {
            // Set once per run; later nodes must not rewrite it.
            self.pending_question.get_or_insert(question);
        }
        if let Some(tool_choice) = update.tool_choice {
            self.tool_choice = Some(tool_choice);
        }
        if let Some(kb_evidence) = update.kb_evidence {
            self.kb_evidence = Some(kb_evidence);
        }
        if let Some(web_evidence) = update.web_evidence {
            self.web_evidence = Some(web_evidence);
        }
        if let Some(can_answer) = update.can_answer_directly {
            self.can_answer_directly = Some(can_answer);
        }
        if let Some(outcome) = update.validation_outcome {
            self.validation_outcome = Some(outcome);
        }
        for provider in update.attempted {
            self.tools_attempted.insert(provider);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::graph::GraphState;
    use crate::providers::Passage;

    use super::{
        AgentState, ChatMessage, ProviderKind, StateUpdate, ToolChoice, ToolsAttempted,
        ValidationOutcome,
    };

    #[test]
    fn lenient_parsing_covers_aliases_and_defaults_to_none() {
        assert_eq!(ToolChoice::parse_lenient("knowledge_base"), ToolChoice::KnowledgeBase);
        assert_eq!(ToolChoice::parse_lenient("rag"), ToolChoice::KnowledgeBase);
        assert_eq!(ToolChoice::parse_lenient("WEB_SEARCH"), ToolChoice::WebSearch);
        assert_eq!(ToolChoice::parse_lenient("tavily"), ToolChoice::WebSearch);
        assert_eq!(ToolChoice::parse_lenient(" both "), ToolChoice::Both);
        assert_eq!(ToolChoice::parse_lenient("none"), ToolChoice::None);
        assert_eq!(ToolChoice::parse_lenient("everything"), ToolChoice::None);
        assert_eq!(ToolChoice::parse_lenient(""), ToolChoice::None);
    }

    #[test]
    fn tools_attempted_is_idempotent_and_bounded() {
        let mut attempted = ToolsAttempted::default();
        assert!(attempted.is_empty());

        attempted.insert(ProviderKind::KnowledgeBase);
        attempted.insert(ProviderKind::KnowledgeBase);
        assert_eq!(attempted.len(), 1);
        assert!(!attempted.both_attempted());

        attempted.insert(ProviderKind::WebSearch);
        attempted.insert(ProviderKind::WebSearch);
        assert_eq!(attempted.len(), 2);
        assert!(attempted.both_attempted());
    }

    #[test]
    fn apply_appends_messages_and_overwrites_scalars() {
        let mut state = AgentState::new("What's a healthy LTV:CAC ratio?", Vec::new());

        state.apply(StateUpdate {
            pending_question: Some("What's a healthy LTV:CAC ratio?".to_string()),
            tool_choice: Some(ToolChoice::KnowledgeBase),
            ..StateUpdate::default()
        });
        state.apply(StateUpdate {
            kb_evidence: Some(vec![Passage::text("3:1 is the common benchmark")]),
            attempted: vec![ProviderKind::KnowledgeBase],
            ..StateUpdate::default()
        });
        state.apply(StateUpdate {
            validation_outcome: Some(ValidationOutcome::Sufficient),
            append_messages: vec![ChatMessage::assistant("The benchmark is 3:1.")],
            ..StateUpdate::default()
        });

        assert_eq!(state.conversation.len(), 2);
        assert_eq!(state.final_answer(), Some("The benchmark is 3:1."));
        assert_eq!(state.tool_choice, Some(ToolChoice::KnowledgeBase));
        assert!(state.has_kb_evidence());
        assert!(!state.has_web_evidence());
        assert_eq!(state.validation_outcome, Some(ValidationOutcome::Sufficient));
        assert!(state.tools_attempted.contains(ProviderKind::KnowledgeBase));
    }

    #[test]
    fn pending_question_is_set_once() {
        let mut state = AgentState::new("first question", Vec::new());
        state.apply(StateUpdate {
            pending_question: Some("first question".to_string()),
            ..StateUpdate::default()
        });
        state.apply(StateUpdate {
            pending_question: Some("rewritten question".to_string()),
            ..StateUpdate::default()
        });

        assert_eq!(state.question(), "first question");
    }

    #[test]
    fn empty_evidence_is_distinct_from_never_attempted() {
        let mut state = AgentState::new("question", Vec::new());
        assert!(state.kb_evidence.is_none());

        state.apply(StateUpdate {
            kb_evidence: Some(Vec::new()),
            attempted: vec![ProviderKind::KnowledgeBase],
            ..StateUpdate::default()
        });

        assert!(state.kb_evidence.is_some());
        assert!(!state.has_kb_evidence());
    }

    #[test]
    fn question_falls_back_to_latest_user_message() {
        let state = AgentState::new("what does CAC stand for?", Vec::new());
        assert_eq!(state.question(), "what does CAC stand for?");
    }
}
