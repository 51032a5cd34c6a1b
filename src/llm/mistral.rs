// Mistral chat adapter using reqwest + SSE streaming.
//
// The wire shape is OpenAI-like but not identical: no strict-mode flag on
// tools, 9-character alphanumeric call ids, `model_length` as a length
// finish reason, and no usage-only trailer chunk; usage rides on the
// final choice chunk.

use crate::config::types::ProviderKind;
use crate::llm::adapters::{ChatPayload, EventStream, ProviderAdapter, WireRequest};
use crate::llm::provider::{
    FinishReason, Message, ProviderError, Role, StreamEvent, ToolDefinition, Usage,
};
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const MISTRAL_API_BASE: &str = "https://api.mistral.ai/v1";

pub struct MistralAdapter;

#[derive(Debug, Serialize)]
struct MistralRequest {
    model: String,
    messages: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MistralChunk {
    #[serde(default)]
    choices: Vec<MistralChoice>,
    #[serde(default)]
    usage: Option<MistralUsage>,
}

#[derive(Debug, Deserialize)]
struct MistralChoice {
    delta: MistralDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MistralDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<MistralToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct MistralToolCallDelta {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<MistralFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct MistralFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MistralUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl MistralAdapter {
    fn convert_tools(tools: &[ToolDefinition]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect()
    }

    pub(crate) fn convert_message(msg: &Message) -> Value {
        match msg.role {
            Role::System => serde_json::json!({"role": "system", "content": msg.content_str()}),
            Role::User => serde_json::json!({"role": "user", "content": msg.content_str()}),
            Role::Assistant => {
                let mut out = serde_json::json!({"role": "assistant"});
                out["content"] = match &msg.content {
                    Some(text) => Value::String(text.clone()),
                    None => Value::Null,
                };
                if let Some(calls) = &msg.tool_calls {
                    out["tool_calls"] = Value::Array(
                        calls
                            .iter()
                            .map(|call| {
                                serde_json::json!({
                                    "id": call.id,
                                    "type": "function",
                                    "function": {
                                        "name": call.function.name,
                                        "arguments": call.function.arguments,
                                    }
                                })
                            })
                            .collect(),
                    );
                }
                out
            }
            Role::Tool => serde_json::json!({
                "role": "tool",
                "content": msg.content_str(),
                "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
            }),
        }
    }

    fn map_finish(reason: &str) -> FinishReason {
        match reason {
            "stop" => FinishReason::Stop,
            "tool_calls" => FinishReason::ToolCalls,
            "length" | "model_length" => FinishReason::Length,
            "content_filter" => FinishReason::ContentFilter,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

impl ProviderAdapter for MistralAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Mistral
    }

    fn build_request(&self, payload: &ChatPayload) -> Result<WireRequest, ProviderError> {
        let tools = if payload.tools.is_empty() {
            None
        } else {
            Some(Self::convert_tools(&payload.tools))
        };

        let request = MistralRequest {
            model: payload.model.model_id.clone(),
            messages: payload
                .messages
                .iter()
                .map(Self::convert_message)
                .collect(),
            temperature: payload.temperature,
            max_tokens: payload.max_tokens,
            stream: true,
            tool_choice: tools.as_ref().map(|_| "auto".to_string()),
            tools,
        };

        let base = payload
            .endpoint
            .clone()
            .unwrap_or_else(|| MISTRAL_API_BASE.to_string());
        let url = if base.contains("/chat/completions") {
            base
        } else {
            format!("{}/chat/completions", base.trim_end_matches('/'))
        };

        Ok(WireRequest {
            url,
            headers: vec![("Authorization", format!("Bearer {}", payload.api_key))],
            body: serde_json::to_value(&request)?,
        })
    }

    fn parse_stream(&self, response: reqwest::Response) -> EventStream {
        let event_stream = response.bytes_stream().eventsource();

        let output = async_stream::stream! {
            futures::pin_mut!(event_stream);

            let mut finish_reason: Option<FinishReason> = None;
            let mut usage: Option<Usage> = None;
            let mut saw_tool_calls = false;
            let mut delta_counter = 0usize;

            while let Some(event_result) = event_stream.next().await {
                let event = match event_result {
                    Ok(event) => event,
                    Err(err) => {
                        yield Err(ProviderError::Api(format!("stream error: {}", err)));
                        return;
                    }
                };

                if event.data == "[DONE]" {
                    break;
                }

                let chunk: MistralChunk = match serde_json::from_str(&event.data) {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        yield Err(ProviderError::Api(format!(
                            "failed to parse chunk: {}",
                            err
                        )));
                        return;
                    }
                };

                if let Some(wire_usage) = chunk.usage {
                    usage = Some(Usage {
                        prompt_tokens: wire_usage.prompt_tokens,
                        completion_tokens: wire_usage.completion_tokens,
                        cached_tokens: 0,
                    });
                }

                for choice in chunk.choices {
                    if let Some(text) = choice.delta.content {
                        if !text.is_empty() {
                            yield Ok(StreamEvent::ContentDelta { text });
                        }
                    }

                    if let Some(deltas) = choice.delta.tool_calls {
                        saw_tool_calls = true;
                        for delta in deltas {
                            // Mistral may omit the index on single calls.
                            let index = delta.index.unwrap_or(delta_counter);
                            delta_counter = index + 1;
                            yield Ok(StreamEvent::ToolCallDelta {
                                index,
                                id: delta.id,
                                name: delta.function.as_ref().and_then(|f| f.name.clone()),
                                args_delta: delta
                                    .function
                                    .as_ref()
                                    .and_then(|f| f.arguments.clone()),
                            });
                        }
                    }

                    if let Some(reason) = choice.finish_reason {
                        finish_reason = Some(Self::map_finish(&reason));
                    }
                }
            }

            let reason = finish_reason.unwrap_or(if saw_tool_calls {
                FinishReason::ToolCalls
            } else {
                FinishReason::Stop
            });
            yield Ok(StreamEvent::Finish { reason, usage });
        };

        Box::pin(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::ToolCall;

    #[test]
    fn test_tools_have_no_strict_flag() {
        let tools = MistralAdapter::convert_tools(&[ToolDefinition::new(
            "search",
            "Search",
            serde_json::json!({"type": "object", "properties": {}}),
        )]);
        assert_eq!(tools[0]["function"]["name"], "search");
        assert!(tools[0]["function"].get("strict").is_none());
    }

    #[test]
    fn test_assistant_continuation_keeps_short_call_ids() {
        let mut msg = Message::assistant("");
        msg.content = None;
        msg.tool_calls = Some(vec![ToolCall::new("a1b2c3d4e", 0, "lookup", "{}")]);

        let wire = MistralAdapter::convert_message(&msg);
        assert_eq!(wire["tool_calls"][0]["id"], "a1b2c3d4e");
        assert_eq!(wire["content"], Value::Null);
    }

    #[test]
    fn test_finish_mapping_includes_model_length() {
        assert_eq!(
            MistralAdapter::map_finish("model_length"),
            FinishReason::Length
        );
        assert_eq!(
            MistralAdapter::map_finish("tool_calls"),
            FinishReason::ToolCalls
        );
    }

    #[test]
    fn test_build_request_url() {
        let payload = ChatPayload {
            model: serde_json::from_value(serde_json::json!({
                "id": "mistral", "modelId": "mistral-large-latest", "provider": "mistral"
            }))
            .unwrap(),
            api_key: "mk".to_string(),
            endpoint: None,
            messages: vec![Message::user("hi")],
            tools: Vec::new(),
            max_tokens: None,
            temperature: Some(0.2),
        };
        let wire = MistralAdapter.build_request(&payload).unwrap();
        assert_eq!(wire.url, "https://api.mistral.ai/v1/chat/completions");
        assert_eq!(wire.body["temperature"], 0.2f32 as f64);
    }
}
