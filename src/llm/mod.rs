// LLM provider layer: the generic representation, per-provider wire
// converters, and key handling.

pub mod adapters;
pub mod anthropic;
pub mod azure_image;
pub mod gemini;
pub mod iassistant;
pub mod keys;
pub mod mistral;
pub mod openai;
pub mod openai_responses;
pub mod provider;

#[cfg(test)]
mod tests;

// Re-export main types
pub use adapters::{adapter_for, execute, ChatPayload, EventStream, ProviderAdapter, WireRequest};
pub use keys::{resolve_api_key, KeyError};
pub use provider::*;
