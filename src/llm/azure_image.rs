// Azure OpenAI image generation adapter.
//
// The "stream" here is a lie: the service answers with a single JSON body.
// The adapter models it as a degenerate stream producing exactly one image
// event and a synthetic finish, so the pipeline treats it like any other
// provider. Authentication uses the `api-key` header, not a bearer token.

use crate::config::types::ProviderKind;
use crate::llm::adapters::{ChatPayload, EventStream, ProviderAdapter, WireRequest};
use crate::llm::provider::{FinishReason, ProviderError, Role, StreamEvent};
use serde::Deserialize;
use serde_json::json;

const API_VERSION: &str = "2024-02-01";

pub struct AzureImageAdapter;

#[derive(Debug, Deserialize)]
struct ImageGenerationResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    revised_prompt: Option<String>,
}

impl AzureImageAdapter {
    /// The prompt is the latest user turn.
    fn extract_prompt(payload: &ChatPayload) -> String {
        payload
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content_str().to_string())
            .unwrap_or_default()
    }
}

impl ProviderAdapter for AzureImageAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::AzureImage
    }

    fn build_request(&self, payload: &ChatPayload) -> Result<WireRequest, ProviderError> {
        let endpoint = payload.endpoint.clone().ok_or_else(|| {
            ProviderError::BadRequest(
                "azure-image models need an endpoint URL (AZURE_OPENAI_ENDPOINT)".to_string(),
            )
        })?;

        let url = format!(
            "{}/openai/deployments/{}/images/generations?api-version={}",
            endpoint.trim_end_matches('/'),
            payload.model.model_id,
            API_VERSION
        );

        Ok(WireRequest {
            url,
            headers: vec![("api-key", payload.api_key.clone())],
            body: json!({
                "prompt": Self::extract_prompt(payload),
                "n": 1,
                "response_format": "b64_json",
            }),
        })
    }

    fn parse_stream(&self, response: reqwest::Response) -> EventStream {
        let output = async_stream::stream! {
            let body = match response.bytes().await {
                Ok(body) => body,
                Err(err) => {
                    yield Err(ProviderError::Network(err));
                    return;
                }
            };

            let parsed: ImageGenerationResponse = match serde_json::from_slice(&body) {
                Ok(parsed) => parsed,
                Err(err) => {
                    yield Err(ProviderError::Api(format!(
                        "failed to parse image response: {}",
                        err
                    )));
                    return;
                }
            };

            let Some(image) = parsed.data.into_iter().next() else {
                yield Err(ProviderError::Api("image response carried no data".to_string()));
                return;
            };

            if let Some(revised) = image.revised_prompt {
                yield Ok(StreamEvent::ContentDelta { text: revised });
            }

            match image.b64_json {
                Some(b64) => {
                    yield Ok(StreamEvent::Image {
                        mime_type: "image/png".to_string(),
                        b64,
                    });
                }
                None => {
                    yield Err(ProviderError::Api(
                        "image response had no b64_json payload".to_string(),
                    ));
                    return;
                }
            }

            yield Ok(StreamEvent::Finish {
                reason: FinishReason::Stop,
                usage: None,
            });
        };

        Box::pin(output)
    }
}
