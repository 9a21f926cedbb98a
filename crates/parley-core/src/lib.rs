pub mod config;
pub mod error;
pub mod flow;
pub mod state;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{ParleyError, Result};
pub use flow::{Edge, Flow, InputRef, Node, NodeConfig, NodeKind};
pub use state::{ExecutionState, PauseState, StepRecord, StepResult, StepStatus};
pub use types::*;
