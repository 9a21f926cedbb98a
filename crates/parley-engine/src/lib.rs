//! Flow execution engine.
//!
//! Walks a [`Flow`](parley_core::Flow) node by node, dispatching each node to
//! the handler registered for its type, pausing at interface nodes and
//! resuming on the next turn from the persisted [`ExecutionState`].

pub mod conversation;
pub mod driver;
pub mod handlers;
pub mod inputs;
pub mod lane;
pub mod resolver;
pub mod stream;
pub mod template;

pub use conversation::{ConversationRunner, TurnRequest, TurnResponse};
pub use driver::{Driver, RunObserver};
pub use handlers::{HandlerRegistry, NodeHandler, TurnContext};
pub use inputs::InputResolver;
pub use lane::ConversationLanes;
pub use resolver::next_node;
pub use stream::{FlowEvent, Finalizer, StreamingAdapter};

pub use parley_core::state::ExecutionState;
