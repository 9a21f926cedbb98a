use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use parley_core::config::GatewayConfig;
use parley_engine::ConversationRunner;

use crate::routes;
use crate::state::AppState;

/// Chat-completion HTTP gateway built on axum.
pub struct GatewayServer {
    config: GatewayConfig,
    runner: Arc<ConversationRunner>,
}

/// All gateway routes over the given state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(routes::chat_completions))
        .route("/api/health", get(routes::health))
        .route("/api/conversations/{id}", get(routes::get_conversation))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, runner: Arc<ConversationRunner>) -> Self {
        Self { config, runner }
    }

    /// Run the gateway server until the cancellation token is triggered.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let state = Arc::new(AppState {
            runner: self.runner.clone(),
        });
        let app = router(state);

        let listener = TcpListener::bind(&self.config.bind).await?;
        info!(bind = %self.config.bind, "Gateway listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Gateway shut down");
        Ok(())
    }
}
