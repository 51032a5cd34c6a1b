// iAssistant adapter.
//
// The integration endpoint answers with one buffered JSON document rather
// than SSE, so like the Azure image adapter this is a degenerate stream:
// the whole body is read, then replayed as a single content event plus a
// synthetic finish.

use crate::config::types::ProviderKind;
use crate::llm::adapters::{ChatPayload, EventStream, ProviderAdapter, WireRequest};
use crate::llm::provider::{FinishReason, ProviderError, Role, StreamEvent};
use serde::Deserialize;
use serde_json::json;

pub struct IAssistantAdapter;

#[derive(Debug, Deserialize)]
struct IAssistantResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ProviderAdapter for IAssistantAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::IAssistant
    }

    fn build_request(&self, payload: &ChatPayload) -> Result<WireRequest, ProviderError> {
        let url = payload.endpoint.clone().ok_or_else(|| {
            ProviderError::BadRequest("iassistant models need an endpoint URL".to_string())
        })?;

        let question = payload
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content_str().to_string())
            .unwrap_or_default();

        Ok(WireRequest {
            url,
            headers: vec![("Authorization", format!("Bearer {}", payload.api_key))],
            body: json!({
                "question": question,
                "profileId": payload.model.model_id,
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

            let parsed: IAssistantResponse = match serde_json::from_slice(&body) {
                Ok(parsed) => parsed,
                Err(err) => {
                    yield Err(ProviderError::Api(format!(
                        "failed to parse response: {}",
                        err
                    )));
                    return;
                }
            };

            let text = parsed.answer.or(parsed.message).unwrap_or_default();
            if !text.is_empty() {
                yield Ok(StreamEvent::ContentDelta { text });
            }
            yield Ok(StreamEvent::Finish {
                reason: FinishReason::Stop,
                usage: None,
            });
        };

        Box::pin(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::Message;

    #[test]
    fn test_latest_user_turn_becomes_the_question() {
        let payload = ChatPayload {
            model: serde_json::from_value(json!({
                "id": "ia", "modelId": "profile-7", "provider": "iassistant"
            }))
            .unwrap(),
            api_key: "tk".to_string(),
            endpoint: Some("https://assistant.internal/api/ask".to_string()),
            messages: vec![
                Message::user("first question"),
                Message::assistant("answer"),
                Message::user("second question"),
            ],
            tools: Vec::new(),
            max_tokens: None,
            temperature: None,
        };
        let wire = IAssistantAdapter.build_request(&payload).unwrap();
        assert_eq!(wire.body["question"], "second question");
        assert_eq!(wire.body["profileId"], "profile-7");
    }
}
