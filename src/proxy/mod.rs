// Proxy module - transparent relay in front of OpenAI-compatible backends
//
// Every request is routed by path and model, its JSON body rewritten by the
// route's transformation pipeline, and forwarded. Responses come back through
// the route's tag rules: buffered JSON bodies are rewritten whole, SSE streams
// frame by frame as they arrive.

mod error;
mod handler;
mod helpers;
pub mod rewrite;
pub mod routing;
mod server;
pub mod session;
pub mod sse;
mod state;
pub mod transformation;

pub use error::ProxyError;
pub use server::{router, serve, start_proxy};
pub use state::{ProxyState, RelaySettings};
