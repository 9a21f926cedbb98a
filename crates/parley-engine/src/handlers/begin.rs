use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use parley_core::flow::{Flow, Node, NodeConfig, NodeKind};
use parley_core::state::{ExecutionState, StepRecord, StepResult, StepStatus};

use super::{config_mismatch, NodeHandler, TurnContext};
use crate::resolver::next_node;
use crate::template::render;

/// Seeds declared variables and renders the greeting.
pub struct BeginHandler;

impl NodeHandler for BeginHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::Begin
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        state: &'a mut ExecutionState,
        flow: &'a Flow,
        _ctx: &'a mut TurnContext,
    ) -> BoxFuture<'a, StepResult> {
        Box::pin(async move {
            let NodeConfig::Begin(config) = &node.config else {
                return config_mismatch(node, NodeKind::Begin);
            };

            for decl in &config.variables {
                if state.variables.contains_key(&decl.name) {
                    continue;
                }
                let value = match &decl.default {
                    Value::Null => Value::String(String::new()),
                    v => v.clone(),
                };
                state.set(decl.name.clone(), value);
            }

            let greeting = render(&config.greeting, &state.variables);
            state.set_str("initialGreeting", greeting.clone());
            debug!(node_id = %node.id, seeded = config.variables.len(), "Begin");

            let next = next_node(flow, &node.id, None);
            let status = if next.is_some() {
                StepStatus::InProgress
            } else {
                StepStatus::Completed
            };
            state.record(StepRecord::new(&node.id, NodeKind::Begin, status).with_output(&greeting));
            StepResult::advance(greeting, next)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::flow::{BeginConfig, Edge, VariableDecl};
    use serde_json::json;

    fn flow_with(config: BeginConfig) -> Flow {
        Flow::new(
            vec![
                Node::new("begin", NodeConfig::Begin(config)),
                Node::interface("ui"),
            ],
            vec![Edge::new("begin", "ui")],
        )
    }

    #[tokio::test]
    async fn test_seeds_defaults_and_renders_greeting() {
        let flow = flow_with(BeginConfig {
            greeting: "Hello {{ name }}, tier {{ tier }}".into(),
            variables: vec![
                VariableDecl {
                    name: "name".into(),
                    default: json!("guest"),
                },
                VariableDecl {
                    name: "tier".into(),
                    default: Value::Null,
                },
            ],
        });
        let mut state = ExecutionState::new("begin");
        let mut ctx = TurnContext::new(None, "fallback");
        let node = flow.node("begin").unwrap();

        let result = BeginHandler.execute(node, &mut state, &flow, &mut ctx).await;

        assert_eq!(result.status, StepStatus::InProgress);
        assert_eq!(result.output.as_deref(), Some("Hello guest, tier "));
        assert_eq!(result.next_node_id.as_deref(), Some("ui"));
        assert_eq!(state.get_str("initialGreeting"), Some("Hello guest, tier "));
        assert_eq!(state.get("tier"), Some(&json!("")));
        assert_eq!(state.history.len(), 1);
    }

    #[tokio::test]
    async fn test_existing_variables_are_not_overwritten() {
        let flow = flow_with(BeginConfig {
            greeting: "Hi {{name}}".into(),
            variables: vec![VariableDecl {
                name: "name".into(),
                default: json!("guest"),
            }],
        });
        let mut state = ExecutionState::new("begin");
        state.set_str("name", "Ada");
        let mut ctx = TurnContext::new(None, "fallback");
        let node = flow.node("begin").unwrap();

        let result = BeginHandler.execute(node, &mut state, &flow, &mut ctx).await;
        assert_eq!(result.output.as_deref(), Some("Hi Ada"));
    }
}
