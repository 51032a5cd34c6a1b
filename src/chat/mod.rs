//! Chat engine: orchestration, streaming fan-out, sessions.

pub mod model_filter;
pub mod orchestrator;
pub mod session;
pub mod stream;

pub use model_filter::{compatible_models, default_model, resolve_model};
pub use orchestrator::{ChatError, ChatOptions, ChatOrchestrator, ChatRequest};
pub use session::{CancelToken, SessionRegistry};
pub use stream::{ChatEvent, ChatEventBus, ChatEventStream};
