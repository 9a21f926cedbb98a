use std::collections::HashMap;

use futures::future::BoxFuture;
use futures::StreamExt;
use tracing::debug;

use parley_core::config::{ModelConfig, ProviderCredentials, RetryConfig};
use parley_core::error::Result;
use parley_core::traits::{LlmClient, ModelPort};
use parley_core::types::*;

use crate::providers::{AnthropicClient, OpenAiClient};
use crate::{is_anthropic, RetryingClient};

/// Model invocation over the streaming provider clients.
///
/// Routes each call by `config.provider`, filling in a missing API key or
/// base URL from the `[providers.<name>]` credentials table.
pub struct ModelInvoker {
    openai: Box<dyn LlmClient>,
    anthropic: Box<dyn LlmClient>,
    credentials: HashMap<String, ProviderCredentials>,
}

impl ModelInvoker {
    pub fn new(credentials: HashMap<String, ProviderCredentials>) -> Self {
        Self {
            openai: Box::new(OpenAiClient::new()),
            anthropic: Box::new(AnthropicClient::new()),
            credentials,
        }
    }

    /// Use custom clients, e.g. stubs in tests.
    pub fn with_clients(
        openai: Box<dyn LlmClient>,
        anthropic: Box<dyn LlmClient>,
        credentials: HashMap<String, ProviderCredentials>,
    ) -> Self {
        Self {
            openai,
            anthropic,
            credentials,
        }
    }

    /// Wrap both clients in retry logic.
    pub fn with_retry(self, retry: RetryConfig) -> Self {
        Self {
            openai: Box::new(RetryingClient::new(self.openai, retry.clone())),
            anthropic: Box::new(RetryingClient::new(self.anthropic, retry)),
            credentials: self.credentials,
        }
    }

    fn resolve(&self, config: &ModelConfig) -> ModelConfig {
        let mut config = config.clone();
        if let Some(creds) = self.credentials.get(&config.provider) {
            if config.api_key.is_none() {
                config.api_key = creds.api_key.clone();
            }
            if config.base_url.is_none() {
                config.base_url = creds.base_url.clone();
            }
        }
        config
    }

    fn client_for(&self, provider: &str) -> &dyn LlmClient {
        if is_anthropic(provider) {
            self.anthropic.as_ref()
        } else {
            self.openai.as_ref()
        }
    }
}

impl ModelPort for ModelInvoker {
    fn invoke(
        &self,
        config: &ModelConfig,
        prompt: &str,
        options: &InvokeOptions,
    ) -> BoxFuture<'_, Result<String>> {
        let config = self.resolve(config);
        let mut messages = Vec::with_capacity(2);
        if let Some(ref system) = options.system_prompt {
            messages.push(ChatMessage::system(system.clone()));
        }
        messages.push(ChatMessage::user(prompt));

        Box::pin(async move {
            debug!(provider = %config.provider, model = %config.model_id, "Invoking model");
            let mut stream = self
                .client_for(&config.provider)
                .chat_stream(&config, messages)
                .await?;

            let mut text = String::new();
            while let Some(delta) = stream.next().await {
                if let StreamDelta::TextDelta(chunk) = delta? {
                    text.push_str(&chunk);
                }
            }
            Ok(text)
        })
    }
}
