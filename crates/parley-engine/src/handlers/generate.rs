use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::{debug, error};

use parley_core::config::ModelConfig;
use parley_core::flow::{Flow, Node, NodeConfig, NodeKind};
use parley_core::state::{ExecutionState, StepRecord, StepResult, StepStatus};
use parley_core::traits::ModelPort;
use parley_core::types::InvokeOptions;

use super::{config_mismatch, store_output, NodeHandler, TurnContext};
use crate::resolver::next_node;
use crate::template::{display_value, render_with};

/// Renders a prompt from the run's variables and asks the model.
pub struct GenerateHandler {
    model: Arc<dyn ModelPort>,
    defaults: ModelConfig,
}

impl GenerateHandler {
    pub fn new(model: Arc<dyn ModelPort>, defaults: ModelConfig) -> Self {
        Self { model, defaults }
    }
}

/// Prompt rendering sees `context` as the retrieval context and `question`
/// as the latest user input.
fn render_prompt(template: &str, state: &ExecutionState) -> String {
    render_with(template, |name| match name {
        "context" => Some(state.get_str("retrievalContext").unwrap_or("").to_string()),
        "question" => Some(state.latest_user_input().unwrap_or("").to_string()),
        other => state.get(other).map(display_value),
    })
}

impl NodeHandler for GenerateHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::Generate
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        state: &'a mut ExecutionState,
        flow: &'a Flow,
        _ctx: &'a mut TurnContext,
    ) -> BoxFuture<'a, StepResult> {
        Box::pin(async move {
            let NodeConfig::Generate(config) = &node.config else {
                return config_mismatch(node, NodeKind::Generate);
            };

            let prompt = render_prompt(&config.prompt, state);
            let model_config = self.defaults.with_overrides(&config.model);
            let options = InvokeOptions {
                system_prompt: config.model.system_prompt.clone(),
            };

            debug!(node_id = %node.id, model = %model_config.model_id, "Generating");
            let text = match self.model.invoke(&model_config, &prompt, &options).await {
                Ok(text) => text,
                Err(e) => {
                    error!(node_id = %node.id, error = %e, "Model invocation failed");
                    return StepResult::error(e.to_string());
                }
            };

            store_output(state, &node.id, &config.output_variable, Value::String(text.clone()));
            state.set_str("generatedOutput", text.clone());
            state.set_str("lastResponse", text.clone());

            let next = next_node(flow, &node.id, None);
            let status = if next.is_some() {
                StepStatus::InProgress
            } else {
                StepStatus::Completed
            };
            state.record(
                StepRecord::new(&node.id, NodeKind::Generate, status)
                    .with_input(json!({ "prompt": prompt }))
                    .with_output(&text),
            );
            StepResult::advance(text, next)
        })
    }
}
