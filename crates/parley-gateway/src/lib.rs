mod protocol;
mod routes;
mod server;
mod state;

pub use protocol::{ChatCompletion, ChatCompletionChunk, ChatCompletionRequest, ChunkTranslator};
pub use server::{router, GatewayServer};
pub use state::AppState;
