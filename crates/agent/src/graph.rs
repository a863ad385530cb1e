//! Generic single-threaded graph walker.
//!
//! The engine knows nothing about the agent: it executes named nodes over a
//! shared state, merging each node's partial update and following edges until
//! a terminal transition. Conditional edges are decision closures returning a
//! [`Transition`] built from a closed enum match, so an unmapped routing
//! label cannot exist at runtime; wiring mistakes (edge to an unregistered
//! node, node without an outgoing edge) are rejected when the graph is built.
//!
//! The engine performs no retries, timeouts, or concurrency of its own.
//! Retry policy belongs to the decision closures; parallelism, if any, lives
//! inside individual nodes. Multiple runs may proceed concurrently against
//! independent states because the compiled graph is shared immutably.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use async_trait::async_trait;
use thiserror::Error;

/// State threaded through a run. Nodes never mutate state directly; they
/// return an `Update` that the engine merges via `apply`.
pub trait GraphState: Send {
    type Update: Clone + Send;

    fn apply(&mut self, update: Self::Update);
}

/// One unit of work in the graph.
#[async_trait]
pub trait Node<S: GraphState>: Send + Sync {
    async fn run(&self, state: &S) -> anyhow::Result<S::Update>;
}

/// Where control goes after a node completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition<I> {
    To(I),
    End,
}

enum Edge<I, S> {
    Direct(Transition<I>),
    Conditional(Box<dyn Fn(&S) -> Transition<I> + Send + Sync>),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("no entry node was designated")]
    MissingEntry,
    #[error("entry node `{0}` is not registered")]
    UnknownEntry(String),
    #[error("node `{0}` was registered twice")]
    DuplicateNode(String),
    #[error("node `{0}` has no outgoing edge")]
    MissingEdge(String),
    #[error("edge from `{from}` targets unregistered node `{to}`")]
    DanglingEdge { from: String, to: String },
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("node `{node}` failed: {source}")]
    Node {
        node: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Output of one engine step: which node ran and the update it produced.
#[derive(Clone, Debug)]
pub struct Step<I, U> {
    pub node: I,
    pub update: U,
}

pub struct GraphBuilder<I, S: GraphState> {
    entry: Option<I>,
    nodes: HashMap<I, Box<dyn Node<S>>>,
    edges: HashMap<I, Edge<I, S>>,
    duplicate: Option<I>,
}

impl<I, S> Default for GraphBuilder<I, S>
where
    I: Copy + Eq + Hash + Debug,
    S: GraphState,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<I, S> GraphBuilder<I, S>
where
    I: Copy + Eq + Hash + Debug,
    S: GraphState,
{
    pub fn new() -> Self {
        Self { entry: None, nodes: HashMap::new(), edges: HashMap::new(), duplicate: None }
    }

    pub fn node(mut self, id: I, node: impl Node<S> + 'static) -> Self {
        if self.nodes.insert(id, Box::new(node)).is_some() && self.duplicate.is_none() {
            self.duplicate = Some(id);
        }
        self
    }

    /// Unconditional edge: `from` always hands off to `to`.
    pub fn edge(mut self, from: I, to: Transition<I>) -> Self {
        self.edges.insert(from, Edge::Direct(to));
        self
    }

    /// Conditional edge: `decide` is invoked with the post-update state.
    pub fn conditional(
        mut self,
        from: I,
        decide: impl Fn(&S) -> Transition<I> + Send + Sync + 'static,
    ) -> Self {
        self.edges.insert(from, Edge::Conditional(Box::new(decide)));
        self
    }

    pub fn entry(mut self, id: I) -> Self {
        self.entry = Some(id);
        self
    }

    /// Validates the wiring and compiles the graph. Conditional-edge targets
    /// are produced by closed-enum decision closures and cannot be checked
    /// here; everything statically known is.
    pub fn build(self) -> Result<Graph<I, S>, GraphError> {
        if let Some(id) = self.duplicate {
            return Err(GraphError::DuplicateNode(format!("{id:?}")));
        }
        let entry = self.entry.ok_or(GraphError::MissingEntry)?;
        if !self.nodes.contains_key(&entry) {
            return Err(GraphError::UnknownEntry(format!("{entry:?}")));
        }
        for id in self.nodes.keys() {
            if !self.edges.contains_key(id) {
                return Err(GraphError::MissingEdge(format!("{id:?}")));
            }
        }
        for (from, edge) in &self.edges {
            if let Edge::Direct(Transition::To(to)) = edge {
                if !self.nodes.contains_key(to) {
                    return Err(GraphError::DanglingEdge {
                        from: format!("{from:?}"),
                        to: format!("{to:?}"),
                    });
                }
            }
        }

        Ok(Graph { entry, nodes: self.nodes, edges: self.edges })
    }
}

pub struct Graph<I, S: GraphState> {
    entry: I,
    nodes: HashMap<I, Box<dyn Node<S>>>,
    edges: HashMap<I, Edge<I, S>>,
}

impl<I, S> Graph<I, S>
where
    I: Copy + Eq + Hash + Debug,
    S: GraphState,
{
    /// Executes the graph to completion and returns the final state.
    pub async fn run(&self, initial: S) -> Result<S, RunError> {
        let mut walk = self.walk(initial);
        while let Some(step) = walk.next_step().await {
            step?;
        }
        Ok(walk.into_state())
    }

    /// Lazy step-by-step execution. The walk yields after each node
    /// completes; nothing runs between yields, so a dropped walk abandons
    /// the rest of the run.
    pub fn walk(&self, initial: S) -> Walk<'_, I, S> {
        Walk { graph: self, state: initial, position: Some(self.entry) }
    }
}

pub struct Walk<'g, I, S: GraphState> {
    graph: &'g Graph<I, S>,
    state: S,
    position: Option<I>,
}

impl<I, S> Walk<'_, I, S>
where
    I: Copy + Eq + Hash + Debug,
    S: GraphState,
{
    /// Runs the next node. Returns `None` once the terminal transition has
    /// been taken or after a node failure; a failed walk does not resume.
    pub async fn next_step(&mut self) -> Option<Result<Step<I, S::Update>, RunError>> {
        let id = self.position?;
        let node = self.graph.nodes.get(&id)?;

        let update = match node.run(&self.state).await {
            Ok(update) => update,
            Err(source) => {
                self.position = None;
                return Some(Err(RunError::Node { node: format!("{id:?}"), source }));
            }
        };

        self.state.apply(update.clone());
        self.position = match self.graph.edges.get(&id) {
            Some(Edge::Direct(transition)) => transition_target(*transition),
            Some(Edge::Conditional(decide)) => transition_target(decide(&self.state)),
            // Unreachable after build-time validation.
            None => None,
        };

        Some(Ok(Step { node: id, update }))
    }

    pub fn is_finished(&self) -> bool {
        self.position.is_none()
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn into_state(self) -> S {
        self.state
    }
}

fn transition_target<I>(transition: Transition<I>) -> Option<I> {
    match transition {
        Transition::To(id) => Some(id),
        Transition::End => None,
    }
}
