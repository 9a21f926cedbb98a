use std::sync::Arc;

use tracing::{debug, error, info};

use parley_core::error::ParleyError;
use parley_core::flow::{Flow, Node};
use parley_core::state::{ExecutionState, StepResult, StepStatus};

use crate::handlers::{HandlerRegistry, TurnContext};
use crate::inputs::InputResolver;

/// Hooks called around each node the driver executes.
pub trait RunObserver: Send {
    fn on_node_start(&mut self, _node: &Node) {}

    fn on_step(&mut self, _node: &Node, _result: &StepResult) {}
}

struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Walks a flow from `state.current_node_id` until a node pauses, the run
/// completes, or something fails.
///
/// The loop is iterative and bounded by `max_steps` so a cyclic flow with
/// no interface on the cycle cannot spin forever.
pub struct Driver {
    registry: Arc<HandlerRegistry>,
    inputs: InputResolver,
    max_steps: usize,
}

impl Driver {
    pub fn new(registry: Arc<HandlerRegistry>, max_steps: usize) -> Self {
        Self {
            registry,
            inputs: InputResolver::default(),
            max_steps,
        }
    }

    pub fn with_inputs(mut self, inputs: InputResolver) -> Self {
        self.inputs = inputs;
        self
    }

    pub async fn run(
        &self,
        flow: &Flow,
        state: &mut ExecutionState,
        ctx: &mut TurnContext,
    ) -> StepResult {
        self.run_observed(flow, state, ctx, &mut NoopObserver).await
    }

    /// Run with per-node callbacks, used by the streaming adapter.
    pub async fn run_observed(
        &self,
        flow: &Flow,
        state: &mut ExecutionState,
        ctx: &mut TurnContext,
        observer: &mut dyn RunObserver,
    ) -> StepResult {
        if state.completed {
            debug!(node_id = %state.current_node_id, "Run already completed");
            return StepResult::completed(state.last_output().map(str::to_string));
        }

        info!(node_id = %state.current_node_id, "Run started");
        let mut steps = 0;
        loop {
            if steps >= self.max_steps {
                return fail(ParleyError::StepLimitExceeded(self.max_steps));
            }
            steps += 1;

            let Some(node) = flow.node(&state.current_node_id) else {
                return fail(ParleyError::GraphIntegrity(format!(
                    "current node '{}' does not exist",
                    state.current_node_id
                )));
            };
            let Some(handler) = self.registry.get(node.kind()) else {
                return fail(ParleyError::Validation(format!(
                    "no handler registered for {} nodes",
                    node.kind()
                )));
            };

            self.inputs.resolve(&node.inputs, &mut state.variables);
            observer.on_node_start(node);
            debug!(node_id = %node.id, node_type = %node.kind(), step = steps, "Executing node");

            let result = handler.execute(node, state, flow, ctx).await;
            if result.status != StepStatus::Error {
                if let Some(ref output) = result.output {
                    state.set_str(format!("{}.output", node.id), output.clone());
                }
            }
            observer.on_step(node, &result);

            match result.status {
                StepStatus::InProgress => match result.next_node_id {
                    Some(ref next) if flow.node(next).is_some() => {
                        state.current_node_id = next.clone();
                    }
                    Some(ref next) => {
                        return fail(ParleyError::GraphIntegrity(format!(
                            "node '{}' routes to missing node '{}'",
                            node.id, next
                        )));
                    }
                    None => {
                        state.completed = true;
                        info!(node_id = %node.id, steps, "Run completed");
                        return StepResult {
                            status: StepStatus::Completed,
                            ..result
                        };
                    }
                },
                StepStatus::Completed => {
                    state.completed = true;
                    info!(node_id = %node.id, steps, "Run completed");
                    return result;
                }
                StepStatus::WaitingForInput => {
                    info!(node_id = %node.id, steps, "Waiting for input");
                    return result;
                }
                StepStatus::Error => {
                    error!(
                        node_id = %node.id,
                        message = result.message.as_deref().unwrap_or(""),
                        "Node failed"
                    );
                    return result;
                }
            }
        }
    }
}

fn fail(e: ParleyError) -> StepResult {
    error!(error = %e, "Run aborted");
    StepResult::error(e.to_string())
}
