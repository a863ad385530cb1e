//! Agent control core - the decision graph behind the revenue-planning assistant.
//!
//! Each query flows through a small state machine that:
//! 1. **Routes** - decides whether the question needs the private knowledge
//!    base, live web search, both, or no retrieval at all (`nodes`)
//! 2. **Retrieves** - executes the chosen provider(s), converting provider
//!    failures into empty evidence rather than run failures (`providers`)
//! 3. **Validates** - judges whether the gathered evidence can answer the
//!    question, retrying once with the untried provider before falling back
//!    to ungrounded generation (`nodes`)
//! 4. **Generates** - synthesizes the final answer from whatever evidence
//!    survived validation (`nodes`, `prompts`)
//!
//! # Key Types
//!
//! - `AgentRuntime` - the injected entry point (see `runtime` module)
//! - `Graph` / `GraphBuilder` - generic single-threaded graph walker (`graph`)
//! - `AgentState` / `StateUpdate` - the typed record threaded through nodes
//! - `Oracle` - pluggable LLM completion/decision interface
//!
//! # Termination Principle
//!
//! The graph always terminates at the generation node. Retries are bounded by
//! the `ToolsAttempted` set: each provider is retried at most once, so the
//! validator runs at most three times per query regardless of oracle output.

pub mod graph;
pub mod nodes;
pub mod oracle;
pub mod prompts;
pub mod providers;
pub mod runtime;
pub mod state;

pub use nodes::{build_graph, NodeId};
pub use revpilot_core::config::GraphMode;
pub use runtime::{AgentEvent, AgentRuntime};
pub use state::{AgentState, ChatMessage, Role, ToolChoice};
