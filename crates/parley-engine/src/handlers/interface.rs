use futures::future::BoxFuture;
use serde_json::json;
use tracing::debug;

use parley_core::flow::{Flow, Node, NodeConfig, NodeKind};
use parley_core::state::{ExecutionState, PauseState, StepRecord, StepResult, StepStatus};

use super::{config_mismatch, NodeHandler, TurnContext};
use crate::resolver::next_node;

/// The pause boundary between turns.
///
/// The first interface a conversation reaches always pauses to show the
/// greeting. After that, an interface consumes the turn's user input if it
/// is still pending and moves on; otherwise it pauses again showing the
/// latest generated text.
pub struct InterfaceHandler;

fn pick<'s>(candidates: impl IntoIterator<Item = Option<&'s str>>) -> Option<String> {
    candidates.into_iter().flatten().next().map(str::to_string)
}

impl NodeHandler for InterfaceHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::Interface
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        state: &'a mut ExecutionState,
        flow: &'a Flow,
        ctx: &'a mut TurnContext,
    ) -> BoxFuture<'a, StepResult> {
        Box::pin(async move {
            let NodeConfig::Interface(config) = &node.config else {
                return config_mismatch(node, NodeKind::Interface);
            };
            let fallback = config
                .fallback_message
                .clone()
                .unwrap_or_else(|| ctx.fallback_message().to_string());

            if !state.pause.has_paused_once {
                let display = pick([
                    state.get_str("initialGreeting"),
                    state.get_str("generatedOutput"),
                    state.last_output(),
                ])
                .unwrap_or_else(|| fallback.clone());

                state.pause = PauseState {
                    has_paused_once: true,
                    pause_count: 1,
                    first_pause_node_id: Some(node.id.clone()),
                    last_pause_node_id: Some(node.id.clone()),
                };
                debug!(node_id = %node.id, "First pause");
                state.record(
                    StepRecord::new(&node.id, NodeKind::Interface, StepStatus::WaitingForInput)
                        .with_output(&display)
                        .with_message("waiting for user input"),
                );
                return StepResult::waiting(display);
            }

            if let Some(input) = ctx.take_input() {
                state.set_str("userInput", input.clone());
                state.set_str("lastUserInput", input.clone());
                state.pause.pause_count += 1;
                state.pause.last_pause_node_id = Some(node.id.clone());

                let next = next_node(flow, &node.id, None);
                let status = if next.is_some() {
                    StepStatus::InProgress
                } else {
                    StepStatus::Completed
                };
                debug!(node_id = %node.id, pause_count = state.pause.pause_count, "Resumed with input");
                state.record(
                    StepRecord::new(&node.id, NodeKind::Interface, status)
                        .with_input(json!({ "userInput": input }))
                        .with_output(&input),
                );
                return StepResult::advance(input, next);
            }

            let display = pick([
                state.get_str("generatedOutput"),
                state.get_str("lastResponse"),
                state.last_output(),
            ])
            .unwrap_or_else(|| fallback.clone());

            state.pause.last_pause_node_id = Some(node.id.clone());
            debug!(node_id = %node.id, "Pause");
            state.record(
                StepRecord::new(&node.id, NodeKind::Interface, StepStatus::WaitingForInput)
                    .with_output(&display)
                    .with_message("waiting for user input"),
            );
            StepResult::waiting(display)
        })
    }
}
