use std::collections::VecDeque;
use std::sync::Mutex;

use futures::future::BoxFuture;

use parley_core::config::ModelConfig;
use parley_core::error::{ParleyError, Result};
use parley_core::traits::ModelPort;
use parley_core::types::InvokeOptions;

enum Scripted {
    Reply(String),
    Fail(ParleyError),
}

/// A recorded model call.
#[derive(Debug, Clone)]
pub struct ModelCall {
    pub config: ModelConfig,
    pub prompt: String,
    pub system_prompt: Option<String>,
}

/// Scripted model: pops one queued reply or failure per call, then falls
/// back to a fixed default reply.
pub struct MockModel {
    script: Mutex<VecDeque<Scripted>>,
    default_reply: String,
    calls: Mutex<Vec<ModelCall>>,
}

impl MockModel {
    pub fn new() -> Self {
        Self::with_default("Mocked reply")
    }

    pub fn with_default(reply: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_reply: reply.into(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful reply.
    pub fn reply(self, text: impl Into<String>) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Reply(text.into()));
        self
    }

    /// Queue a failure.
    pub fn fail(self, error: ParleyError) -> Self {
        self.script.lock().unwrap().push_back(Scripted::Fail(error));
        self
    }

    pub fn calls(&self) -> Vec<ModelCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.calls.lock().unwrap().last().map(|c| c.prompt.clone())
    }
}

impl Default for MockModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelPort for MockModel {
    fn invoke(
        &self,
        config: &ModelConfig,
        prompt: &str,
        options: &InvokeOptions,
    ) -> BoxFuture<'_, Result<String>> {
        self.calls.lock().unwrap().push(ModelCall {
            config: config.clone(),
            prompt: prompt.to_string(),
            system_prompt: options.system_prompt.clone(),
        });
        let next = self.script.lock().unwrap().pop_front();
        let result = match next {
            Some(Scripted::Reply(text)) => Ok(text),
            Some(Scripted::Fail(e)) => Err(e),
            None => Ok(self.default_reply.clone()),
        };
        Box::pin(async move { result })
    }
}
