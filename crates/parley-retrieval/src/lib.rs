pub mod client;
pub mod supervisor;

pub use client::HttpRetriever;
pub use supervisor::RetrievalSupervisor;
