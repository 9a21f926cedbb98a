use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use parley_core::flow::{Flow, Node, NodeKind};
use parley_core::state::{ExecutionState, StepResult, StepStatus};

use crate::driver::{Driver, RunObserver};
use crate::handlers::TurnContext;

/// An incremental run event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowEvent {
    NodeStart {
        node_id: String,
        node_type: NodeKind,
    },
    Progress {
        node_id: String,
        node_type: NodeKind,
        output: String,
    },
    Completed {
        output: Option<String>,
    },
    WaitingForInput {
        output: String,
    },
    Error {
        message: String,
    },
}

impl FlowEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::WaitingForInput { .. } | Self::Error { .. }
        )
    }

    fn terminal(result: &StepResult) -> Self {
        match result.status {
            StepStatus::WaitingForInput => Self::WaitingForInput {
                output: result.output.clone().unwrap_or_default(),
            },
            StepStatus::Error => Self::Error {
                message: result.display_text().to_string(),
            },
            StepStatus::Completed | StepStatus::InProgress => Self::Completed {
                output: result.output.clone(),
            },
        }
    }
}

/// Called once with the final state when the run stops.
pub type Finalizer = Box<dyn FnOnce(ExecutionState) -> BoxFuture<'static, ()> + Send>;

/// Buffers events and sends them in batches.
struct EventBatcher {
    tx: mpsc::UnboundedSender<Vec<FlowEvent>>,
    buffer: Vec<FlowEvent>,
    batch_size: usize,
}

impl EventBatcher {
    fn push(&mut self, event: FlowEvent) {
        self.buffer.push(event);
        if self.buffer.len() >= self.batch_size {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.buffer);
        if self.tx.send(batch).is_err() {
            debug!("Stream receiver dropped, discarding events");
        }
    }
}

impl RunObserver for EventBatcher {
    fn on_node_start(&mut self, node: &Node) {
        self.push(FlowEvent::NodeStart {
            node_id: node.id.clone(),
            node_type: node.kind(),
        });
    }

    fn on_step(&mut self, node: &Node, result: &StepResult) {
        if result.status == StepStatus::Error {
            return;
        }
        if let Some(ref output) = result.output {
            self.push(FlowEvent::Progress {
                node_id: node.id.clone(),
                node_type: node.kind(),
                output: output.clone(),
            });
        }
    }
}

/// Drives a run while emitting [`FlowEvent`]s.
///
/// Order per node is `node_start` then `progress`; the run ends with exactly
/// one terminal event. The finalizer runs before the last batch is sent, so
/// a caller that sees the terminal event can rely on persistence being done.
pub struct StreamingAdapter {
    driver: Arc<Driver>,
    batch_size: usize,
}

impl StreamingAdapter {
    pub fn new(driver: Arc<Driver>, batch_size: usize) -> Self {
        Self {
            driver,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn run(
        &self,
        flow: &Flow,
        mut state: ExecutionState,
        ctx: &mut TurnContext,
        tx: mpsc::UnboundedSender<Vec<FlowEvent>>,
        finalize: Finalizer,
    ) -> (StepResult, ExecutionState) {
        let mut batcher = EventBatcher {
            tx,
            buffer: Vec::with_capacity(self.batch_size),
            batch_size: self.batch_size,
        };

        let result = self
            .driver
            .run_observed(flow, &mut state, ctx, &mut batcher)
            .await;

        batcher.buffer.push(FlowEvent::terminal(&result));
        finalize(state.clone()).await;
        batcher.flush();
        (result, state)
    }
}
