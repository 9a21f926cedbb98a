use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use futures::future::BoxFuture;

use parley_core::error::{ParleyError, Result};
use parley_core::flow::Flow;
use parley_core::state::ExecutionState;
use parley_core::traits::{ConversationStore, FlowStore};
use parley_core::types::ConversationId;

/// A conversation row as saved.
#[derive(Debug, Clone)]
pub struct SavedConversation {
    pub state: ExecutionState,
    pub flow_id: String,
    pub last_user_message: Option<String>,
}

/// In-memory persistence gateway. States go through JSON so tests exercise
/// the same round-trip as a real store.
#[derive(Default)]
pub struct MemoryConversationStore {
    rows: Mutex<HashMap<String, (String, String, Option<String>)>>,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `save` fail.
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn get(&self, id: &ConversationId) -> Option<SavedConversation> {
        let rows = self.rows.lock().unwrap();
        let (json, flow_id, last) = rows.get(id.as_str())?;
        Some(SavedConversation {
            state: serde_json::from_str(json).ok()?,
            flow_id: flow_id.clone(),
            last_user_message: last.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ConversationStore for MemoryConversationStore {
    fn load(&self, id: &ConversationId) -> BoxFuture<'_, Result<Option<ExecutionState>>> {
        let result: Result<Option<ExecutionState>> = match self.rows.lock().unwrap().get(id.as_str()) {
            Some((json, _, _)) => serde_json::from_str(json).map(Some).map_err(Into::into),
            None => Ok(None),
        };
        Box::pin(async move { result })
    }

    fn save(
        &self,
        state: &ExecutionState,
        flow_id: &str,
        id: Option<&ConversationId>,
        last_user_message: Option<&str>,
    ) -> BoxFuture<'_, Result<ConversationId>> {
        let result = if self.fail_saves.load(Ordering::SeqCst) {
            Err(ParleyError::Database("store unavailable".into()))
        } else {
            serde_json::to_string(state)
                .map_err(ParleyError::from)
                .map(|json| {
                    let id = id.cloned().unwrap_or_default();
                    self.rows.lock().unwrap().insert(
                        id.0.clone(),
                        (
                            json,
                            flow_id.to_string(),
                            last_user_message.map(str::to_string),
                        ),
                    );
                    self.saves.fetch_add(1, Ordering::SeqCst);
                    id
                })
        };
        Box::pin(async move { result })
    }
}

/// In-memory flow source.
#[derive(Default)]
pub struct MemoryFlowStore {
    flows: HashMap<String, Flow>,
}

impl MemoryFlowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flow(mut self, flow_id: &str, flow: Flow) -> Self {
        self.flows.insert(flow_id.to_string(), flow);
        self
    }
}

impl FlowStore for MemoryFlowStore {
    fn load_flow(&self, flow_id: &str) -> BoxFuture<'_, Result<Option<Flow>>> {
        let result = match self.flows.get(flow_id) {
            Some(flow) => flow.validate().map(|_| Some(flow.clone())),
            None => Ok(None),
        };
        Box::pin(async move { result })
    }
}
