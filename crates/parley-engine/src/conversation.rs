use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{info, warn};

use parley_core::config::EngineConfig;
use parley_core::error::{ParleyError, Result};
use parley_core::flow::Flow;
use parley_core::state::{ExecutionState, StepResult};
use parley_core::traits::{ConversationStore, FlowStore};
use parley_core::types::{last_user_message, ChatMessage, ConversationId};

use crate::driver::Driver;
use crate::handlers::{HandlerRegistry, TurnContext};
use crate::lane::ConversationLanes;
use crate::stream::{FlowEvent, Finalizer, StreamingAdapter};

/// One chat-completion style turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub flow_id: String,
    pub conversation_id: Option<ConversationId>,
    pub messages: Vec<ChatMessage>,
}

impl TurnRequest {
    pub fn new(flow_id: impl Into<String>) -> Self {
        Self {
            flow_id: flow_id.into(),
            conversation_id: None,
            messages: vec![],
        }
    }

    pub fn with_conversation(mut self, id: ConversationId) -> Self {
        self.conversation_id = Some(id);
        self
    }

    pub fn with_user_message(mut self, text: impl Into<String>) -> Self {
        self.messages.push(ChatMessage::user(text));
        self
    }
}

#[derive(Debug, Clone)]
pub struct TurnResponse {
    pub conversation_id: ConversationId,
    pub result: StepResult,
    pub state: ExecutionState,
}

/// Everything a turn needs once the flow and state are loaded.
struct PreparedTurn {
    flow: Flow,
    state: ExecutionState,
    conversation_id: ConversationId,
    user_input: Option<String>,
}

/// Runs turns of a conversation against a stored flow.
///
/// Each turn loads the state, resumes at the last pause, drives until the
/// next pause or the end, and saves the state back. Saving is best-effort:
/// a failed save is logged and the computed result is still returned.
pub struct ConversationRunner {
    flows: Arc<dyn FlowStore>,
    store: Arc<dyn ConversationStore>,
    driver: Arc<Driver>,
    lanes: ConversationLanes,
    fallback_message: String,
    stream_batch_size: usize,
}

impl ConversationRunner {
    pub fn new(
        flows: Arc<dyn FlowStore>,
        store: Arc<dyn ConversationStore>,
        registry: HandlerRegistry,
        engine: &EngineConfig,
    ) -> Self {
        Self {
            flows,
            store,
            driver: Arc::new(Driver::new(Arc::new(registry), engine.max_steps)),
            lanes: ConversationLanes::new(),
            fallback_message: engine.fallback_message.clone(),
            stream_batch_size: engine.stream_batch_size,
        }
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    async fn prepare(
        &self,
        request: &TurnRequest,
        conversation_id: ConversationId,
    ) -> Result<PreparedTurn> {
        let flow = self
            .flows
            .load_flow(&request.flow_id)
            .await?
            .ok_or_else(|| ParleyError::FlowNotFound(request.flow_id.clone()))?;
        flow.validate().map_err(|e| match e {
            ParleyError::InvalidFlow(msg) => {
                ParleyError::InvalidFlow(format!("{}: {}", request.flow_id, msg))
            }
            other => other,
        })?;

        let existing = match request.conversation_id {
            Some(ref id) => self.store.load(id).await?,
            None => None,
        };

        let mut state = match existing {
            Some(state) => state,
            None => {
                let begin = flow.begin_node().ok_or_else(|| {
                    ParleyError::InvalidFlow(format!("flow '{}' has no begin node", request.flow_id))
                })?;
                info!(
                    conversation_id = %conversation_id,
                    flow_id = %request.flow_id,
                    "New conversation"
                );
                ExecutionState::new(&begin.id)
            }
        };

        if let Some(ref paused_at) = state.pause.last_pause_node_id {
            if !state.completed {
                state.current_node_id = paused_at.clone();
            }
        }

        Ok(PreparedTurn {
            flow,
            state,
            conversation_id,
            user_input: last_user_message(&request.messages).map(str::to_string),
        })
    }

    async fn save(
        store: &dyn ConversationStore,
        state: &ExecutionState,
        flow_id: &str,
        id: &ConversationId,
        user_input: Option<&str>,
    ) {
        if let Err(e) = store.save(state, flow_id, Some(id), user_input).await {
            warn!(conversation_id = %id, error = %e, "Failed to save conversation state");
        }
    }

    /// Run one turn and return its result.
    pub async fn turn(&self, request: TurnRequest) -> Result<TurnResponse> {
        let conversation_id = request.conversation_id.clone().unwrap_or_default();
        let _lane = self.lanes.acquire(conversation_id.as_str()).await;

        let PreparedTurn {
            flow,
            mut state,
            conversation_id,
            user_input,
        } = self.prepare(&request, conversation_id).await?;

        let mut ctx = TurnContext::new(user_input.clone(), self.fallback_message.clone());
        let result = self.driver.run(&flow, &mut state, &mut ctx).await;

        Self::save(
            self.store.as_ref(),
            &state,
            &request.flow_id,
            &conversation_id,
            user_input.as_deref(),
        )
        .await;

        Ok(TurnResponse {
            conversation_id,
            result,
            state,
        })
    }

    /// Run one turn in the background, streaming event batches.
    ///
    /// Flow and state loading happen before this returns, so an unknown flow
    /// is reported as an error rather than as a stream event.
    pub async fn turn_stream(
        self: &Arc<Self>,
        request: TurnRequest,
    ) -> Result<(ConversationId, mpsc::UnboundedReceiver<Vec<FlowEvent>>)> {
        let conversation_id = request.conversation_id.clone().unwrap_or_default();
        let lane = self.lanes.acquire(conversation_id.as_str()).await;

        let prepared = self.prepare(&request, conversation_id.clone()).await?;
        let (tx, rx) = mpsc::unbounded_channel();

        let runner = Arc::clone(self);
        let flow_id = request.flow_id;
        tokio::spawn(async move {
            let _lane = lane;
            let PreparedTurn {
                flow,
                state,
                conversation_id,
                user_input,
            } = prepared;

            let store = runner.store.clone();
            let id = conversation_id.clone();
            let last_message = user_input.clone();
            let finalize: Finalizer = Box::new(move |state: ExecutionState| {
                async move {
                    Self::save(store.as_ref(), &state, &flow_id, &id, last_message.as_deref())
                        .await;
                }
                .boxed()
            });

            let adapter = StreamingAdapter::new(runner.driver.clone(), runner.stream_batch_size);
            let mut ctx = TurnContext::new(user_input, runner.fallback_message.clone());
            adapter.run(&flow, state, &mut ctx, tx, finalize).await;
        });

        Ok((conversation_id, rx))
    }
}
