//! Provider adapter contract and dispatch.
//!
//! Each provider lives in its own file and implements the same two-sided
//! contract: build a wire request from the generic payload, and parse the
//! provider's HTTP response into generic stream events. The differences
//! between the wire formats are large enough that sharing a template with
//! flags would obscure them; the per-file converters are the normalizer.

use crate::config::types::{Model, ProviderKind};
use crate::llm::provider::{ProviderError, StreamEvent};
use futures::Stream;
use std::pin::Pin;
use std::time::Duration;

/// Default per-provider request deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ProviderError>> + Send>>;

/// Everything an adapter needs to build one request.
pub struct ChatPayload {
    pub model: Model,
    pub api_key: String,
    /// Endpoint URL with environment placeholders already expanded;
    /// `None` means the provider's public endpoint.
    pub endpoint: Option<String>,
    pub messages: Vec<crate::llm::provider::Message>,
    pub tools: Vec<crate::llm::provider::ToolDefinition>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// A fully prepared HTTP request in the provider's wire format.
pub struct WireRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: serde_json::Value,
}

pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Generic payload -> provider wire request (messages, tool
    /// definitions, continuation state).
    fn build_request(&self, payload: &ChatPayload) -> Result<WireRequest, ProviderError>;

    /// Parse the provider's streaming (or buffered) response body into
    /// generic events.
    fn parse_stream(&self, response: reqwest::Response) -> EventStream;
}

/// Adapter lookup by configured provider.
///
/// `local` endpoints speak the OpenAI Chat Completions dialect, so they
/// share that adapter; everything else has its own converter.
pub fn adapter_for(kind: ProviderKind) -> &'static dyn ProviderAdapter {
    use crate::llm::{anthropic, azure_image, gemini, iassistant, mistral, openai, openai_responses};

    static OPENAI: openai::OpenAiAdapter = openai::OpenAiAdapter;
    static RESPONSES: openai_responses::ResponsesAdapter = openai_responses::ResponsesAdapter;
    static ANTHROPIC: anthropic::AnthropicAdapter = anthropic::AnthropicAdapter;
    static GEMINI: gemini::GeminiAdapter = gemini::GeminiAdapter;
    static MISTRAL: mistral::MistralAdapter = mistral::MistralAdapter;
    static AZURE_IMAGE: azure_image::AzureImageAdapter = azure_image::AzureImageAdapter;
    static IASSISTANT: iassistant::IAssistantAdapter = iassistant::IAssistantAdapter;

    match kind {
        ProviderKind::OpenAi | ProviderKind::Local => &OPENAI,
        ProviderKind::OpenAiResponses => &RESPONSES,
        ProviderKind::Anthropic => &ANTHROPIC,
        ProviderKind::Google => &GEMINI,
        ProviderKind::Mistral => &MISTRAL,
        ProviderKind::AzureImage => &AZURE_IMAGE,
        ProviderKind::IAssistant => &IASSISTANT,
    }
}

/// Send the request and open the generic event stream.
///
/// The deadline covers the whole exchange including body streaming.
/// Cancellation works by dropping the returned stream, which aborts the
/// underlying connection.
pub async fn execute(
    client: &reqwest::Client,
    adapter: &dyn ProviderAdapter,
    payload: &ChatPayload,
    timeout: Duration,
) -> Result<EventStream, ProviderError> {
    let wire = adapter.build_request(payload)?;

    let mut request = client.post(&wire.url).timeout(timeout);
    for (name, value) in &wire.headers {
        request = request.header(*name, value);
    }

    let response = request.json(&wire.body).send().await?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(ProviderError::from_status(status, &body, retry_after));
    }

    Ok(adapter.parse_stream(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_covers_every_provider() {
        for kind in [
            ProviderKind::OpenAi,
            ProviderKind::OpenAiResponses,
            ProviderKind::Anthropic,
            ProviderKind::Google,
            ProviderKind::Mistral,
            ProviderKind::Local,
            ProviderKind::IAssistant,
            ProviderKind::AzureImage,
        ] {
            let adapter = adapter_for(kind);
            match kind {
                // local shares the OpenAI Chat dialect
                ProviderKind::Local => assert_eq!(adapter.kind(), ProviderKind::OpenAi),
                other => assert_eq!(adapter.kind(), other),
            }
        }
    }
}
