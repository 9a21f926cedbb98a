//! Mocks and fixtures shared by Parley's test suites.

pub mod fixtures;
pub mod model;
pub mod retriever;
pub mod stores;

pub use fixtures::*;
pub use model::MockModel;
pub use retriever::MockRetriever;
pub use stores::{MemoryConversationStore, MemoryFlowStore};
