pub mod invoker;
pub mod providers;
pub mod retry;
pub mod streaming;

pub use invoker::ModelInvoker;
pub use providers::anthropic::AnthropicClient;
pub use providers::openai::OpenAiClient;
pub use retry::RetryingClient;

/// Providers served by the Anthropic Messages API; everything else is
/// treated as OpenAI-compatible.
pub(crate) fn is_anthropic(provider: &str) -> bool {
    matches!(provider, "anthropic" | "claude")
}
