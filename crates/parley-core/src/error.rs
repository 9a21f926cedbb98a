use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParleyError {
    // Model port errors
    #[error("LLM transport failed: {0}")]
    LlmTransport(String),

    #[error("LLM upstream returned HTTP {status}: {body}")]
    LlmStatus { status: u16, body: String },

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    // Retrieval port errors
    #[error("Retrieval transport failed: {0}")]
    RetrievalTransport(String),

    #[error("Retrieval backend returned HTTP {status}: {body}")]
    RetrievalStatus { status: u16, body: String },

    #[error("Retrieval backend error: {0}")]
    RetrievalBackend(String),

    // Engine errors
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Graph integrity violation: {0}")]
    GraphIntegrity(String),

    #[error("Invalid flow: {0}")]
    InvalidFlow(String),

    #[error("Flow not found: {0}")]
    FlowNotFound(String),

    #[error("Run exceeded max steps ({0})")]
    StepLimitExceeded(usize),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ParleyError {
    /// Whether the error came from an upstream service rather than local logic.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Self::LlmTransport(_)
                | Self::LlmStatus { .. }
                | Self::LlmStream(_)
                | Self::RetrievalTransport(_)
                | Self::RetrievalStatus { .. }
                | Self::RetrievalBackend(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ParleyError>;
