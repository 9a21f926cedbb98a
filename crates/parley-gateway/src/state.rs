use std::sync::Arc;

use parley_engine::ConversationRunner;

/// Shared application state for axum handlers.
pub struct AppState {
    pub runner: Arc<ConversationRunner>,
}
