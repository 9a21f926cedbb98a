pub mod flows;
pub mod store;

pub use flows::FlowDirectory;
pub use store::{ConversationRecord, SqliteStore};
