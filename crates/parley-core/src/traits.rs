use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::flow::Flow;
use crate::state::ExecutionState;
use crate::types::*;

/// LLM client: provider-specific streaming transport.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a chat request and receive a stream of deltas.
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>>;
}

/// Model Invocation Port: prompt in, text out.
///
/// Transport failures and non-success upstream responses must surface as
/// distinct errors; timeouts are the implementation's responsibility.
pub trait ModelPort: Send + Sync + 'static {
    fn invoke(
        &self,
        config: &ModelConfig,
        prompt: &str,
        options: &InvokeOptions,
    ) -> BoxFuture<'_, Result<String>>;
}

/// Knowledge Retrieval Port: ranked passages for one knowledge base.
pub trait RetrievalPort: Send + Sync + 'static {
    fn retrieve(
        &self,
        knowledge_base_id: &str,
        query: &str,
        options: RetrieveOptions,
    ) -> BoxFuture<'_, Result<Vec<Passage>>>;
}

/// Persistence Gateway: execution state keyed by conversation id.
pub trait ConversationStore: Send + Sync + 'static {
    /// Load the state of a conversation, `None` when unknown.
    fn load(&self, id: &ConversationId) -> BoxFuture<'_, Result<Option<ExecutionState>>>;

    /// Save a state; assigns a new id when `id` is `None`.
    fn save(
        &self,
        state: &ExecutionState,
        flow_id: &str,
        id: Option<&ConversationId>,
        last_user_message: Option<&str>,
    ) -> BoxFuture<'_, Result<ConversationId>>;
}

/// Source of flow definitions produced by the editor layer.
pub trait FlowStore: Send + Sync + 'static {
    /// Load and validate a flow, `None` when unknown.
    fn load_flow(&self, flow_id: &str) -> BoxFuture<'_, Result<Option<Flow>>>;
}
