//! Per-node-type handlers and the registry the driver dispatches through.

mod begin;
mod categorize;
mod generate;
mod interface;
mod retrieval;

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use parley_core::config::ModelConfig;
use parley_core::flow::{Flow, Node, NodeKind};
use parley_core::state::{ExecutionState, StepResult};
use parley_core::traits::{ModelPort, RetrievalPort};

pub use begin::BeginHandler;
pub use categorize::CategorizeHandler;
pub use generate::GenerateHandler;
pub use interface::InterfaceHandler;
pub use retrieval::RetrievalHandler;

/// Per-turn inputs shared by every handler in one driver run.
#[derive(Debug, Clone)]
pub struct TurnContext {
    pending_input: Option<String>,
    fallback_message: String,
}

impl TurnContext {
    pub fn new(user_input: Option<String>, fallback_message: impl Into<String>) -> Self {
        Self {
            pending_input: user_input.filter(|s| !s.is_empty()),
            fallback_message: fallback_message.into(),
        }
    }

    /// Take the externally supplied input; only the first interface to ask gets it.
    pub fn take_input(&mut self) -> Option<String> {
        self.pending_input.take()
    }

    pub fn fallback_message(&self) -> &str {
        &self.fallback_message
    }
}

/// One node type's behavior.
///
/// Handlers append exactly one history record when they succeed and none
/// when they fail. Failures come back as [`StepResult::error`], never as a
/// panic or an `Err`, so the driver's stop logic stays uniform.
pub trait NodeHandler: Send + Sync + 'static {
    fn kind(&self) -> NodeKind;

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        state: &'a mut ExecutionState,
        flow: &'a Flow,
        ctx: &'a mut TurnContext,
    ) -> BoxFuture<'a, StepResult>;
}

/// Handlers keyed by node type tag.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<NodeKind, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The five built-in handlers wired to the given ports.
    pub fn standard(
        model: Arc<dyn ModelPort>,
        retriever: Arc<dyn RetrievalPort>,
        model_defaults: ModelConfig,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(BeginHandler));
        registry.register(Arc::new(InterfaceHandler));
        registry.register(Arc::new(GenerateHandler::new(
            model.clone(),
            model_defaults.clone(),
        )));
        registry.register(Arc::new(CategorizeHandler::new(model, model_defaults)));
        registry.register(Arc::new(RetrievalHandler::new(retriever)));
        registry
    }

    /// Register a handler, replacing any previous one for the same type.
    pub fn register(&mut self, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    pub fn get(&self, kind: NodeKind) -> Option<&Arc<dyn NodeHandler>> {
        self.handlers.get(&kind)
    }
}

/// Store a node output under its plain name and `<nodeId>.<name>`.
pub(crate) fn store_output(state: &mut ExecutionState, node_id: &str, name: &str, value: Value) {
    state.set(format!("{}.{}", node_id, name), value.clone());
    state.set(name, value);
}

fn config_mismatch(node: &Node, expected: NodeKind) -> StepResult {
    StepResult::error(format!(
        "node '{}' has {} config but was dispatched as {}",
        node.id,
        node.kind(),
        expected
    ))
}
