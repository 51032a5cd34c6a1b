// OpenAI Responses API adapter.
//
// The Responses dialect differs from Chat Completions in ways that matter:
// tool definitions are FLAT (no nested `function` object), conversation
// turns are "input items" rather than messages, and the response never
// carries a finish_reason; it is derived from the presence of
// `function_call` items in the output array.

use crate::config::types::ProviderKind;
use crate::llm::adapters::{ChatPayload, EventStream, ProviderAdapter, WireRequest};
use crate::llm::provider::{
    FinishReason, FunctionCall, Message, ProviderError, ProviderResponse, Role, StreamEvent,
    ToolCall, ToolCallMetadata, Usage,
};
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

const RESPONSES_API_BASE: &str = "https://api.openai.com/v1/responses";

pub struct ResponsesAdapter;

#[derive(Debug, Deserialize)]
struct ResponsesStreamEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    delta: Option<String>,
    #[serde(default)]
    item: Option<Value>,
    #[serde(default)]
    item_id: Option<String>,
    #[serde(default)]
    output_index: Option<usize>,
    #[serde(default)]
    arguments: Option<String>,
    #[serde(default)]
    response: Option<Value>,
}

impl ResponsesAdapter {
    /// Flat tool definition: `name`/`parameters` at the top level. Nesting
    /// them under `function` (the Chat Completions shape) is rejected by
    /// this API.
    fn convert_tools(tools: &[crate::llm::provider::ToolDefinition]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "name": t.name,
                    "description": t.description,
                    "parameters": super::openai::OpenAiAdapter::strict_parameters(&t.parameters),
                    "strict": true,
                })
            })
            .collect()
    }

    /// Generic history -> Responses input items. System content travels in
    /// the separate `instructions` field, returned alongside the items.
    pub(crate) fn convert_input(messages: &[Message]) -> (Vec<Value>, Option<String>) {
        let mut instructions = None;
        let mut items = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => {
                    if instructions.is_none() {
                        instructions = Some(msg.content_str().to_string());
                    }
                }
                Role::User => {
                    let mut content = vec![json!({"type": "input_text", "text": msg.content_str()})];
                    for url in &msg.images {
                        content.push(json!({"type": "input_image", "image_url": url}));
                    }
                    items.push(json!({"role": "user", "content": content}));
                }
                Role::Assistant => {
                    if let Some(text) = msg.content.as_deref().filter(|t| !t.is_empty()) {
                        items.push(json!({
                            "role": "assistant",
                            "content": [{"type": "output_text", "text": text}],
                        }));
                    }
                    if let Some(calls) = &msg.tool_calls {
                        for call in calls {
                            items.push(json!({
                                "type": "function_call",
                                "call_id": call.id,
                                "name": call.function.name,
                                "arguments": call.function.arguments,
                            }));
                        }
                    }
                }
                Role::Tool => {
                    items.push(json!({
                        "type": "function_call_output",
                        "call_id": msg.tool_call_id.clone().unwrap_or_default(),
                        "output": msg.content_str(),
                    }));
                }
            }
        }

        (items, instructions)
    }

    /// No finish_reason on the wire: any `function_call` item in the output
    /// array means tool calls, otherwise the turn simply stopped.
    pub fn derive_finish(output: &[Value]) -> FinishReason {
        let has_calls = output
            .iter()
            .any(|item| item.get("type").and_then(Value::as_str) == Some("function_call"));
        if has_calls {
            FinishReason::ToolCalls
        } else {
            FinishReason::Stop
        }
    }

    /// Parse a complete (non-streaming) response body.
    pub fn parse_response(body: &Value) -> ProviderResponse {
        let output = body
            .get("output")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut content = String::new();
        let mut tool_calls = Vec::new();

        for item in &output {
            match item.get("type").and_then(Value::as_str) {
                Some("message") => {
                    if let Some(parts) = item.get("content").and_then(Value::as_array) {
                        for part in parts {
                            if part.get("type").and_then(Value::as_str) == Some("output_text") {
                                content.push_str(part.get("text").and_then(Value::as_str).unwrap_or(""));
                            }
                        }
                    }
                }
                Some("function_call") => {
                    let index = tool_calls.len();
                    tool_calls.push(ToolCall {
                        id: item
                            .get("call_id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        index,
                        call_type: "function".to_string(),
                        function: FunctionCall {
                            name: item
                                .get("name")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            arguments: item
                                .get("arguments")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                        },
                        metadata: ToolCallMetadata::default(),
                    });
                }
                _ => {}
            }
        }

        let usage = body.get("usage").map(|u| Usage {
            prompt_tokens: u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
            completion_tokens: u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
            cached_tokens: 0,
        });

        ProviderResponse {
            content: if content.is_empty() {
                None
            } else {
                Some(content)
            },
            finish_reason: Some(Self::derive_finish(&output)),
            tool_calls,
            thought_signatures: Vec::new(),
            usage,
            images: Vec::new(),
        }
    }
}

impl ProviderAdapter for ResponsesAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAiResponses
    }

    fn build_request(&self, payload: &ChatPayload) -> Result<WireRequest, ProviderError> {
        let (input, instructions) = Self::convert_input(&payload.messages);

        let mut body = json!({
            "model": payload.model.model_id,
            "input": input,
            "stream": true,
        });
        if let Some(instructions) = instructions {
            body["instructions"] = Value::String(instructions);
        }
        if !payload.tools.is_empty() {
            body["tools"] = Value::Array(Self::convert_tools(&payload.tools));
        }
        if let Some(max) = payload.max_tokens {
            body["max_output_tokens"] = json!(max);
        }

        let url = payload
            .endpoint
            .clone()
            .unwrap_or_else(|| RESPONSES_API_BASE.to_string());

        Ok(WireRequest {
            url,
            headers: vec![("Authorization", format!("Bearer {}", payload.api_key))],
            body,
        })
    }

    fn parse_stream(&self, response: reqwest::Response) -> EventStream {
        let event_stream = response.bytes_stream().eventsource();

        let output = async_stream::stream! {
            futures::pin_mut!(event_stream);

            // item_id -> generic tool-call index; output_index -> item_id as
            // the defensive fallback for fragments missing the id.
            let mut call_index_by_item: HashMap<String, usize> = HashMap::new();
            let mut item_by_output_index: HashMap<usize, String> = HashMap::new();
            let mut next_call_index = 0usize;
            let mut saw_function_call = false;
            let mut finished = false;

            while let Some(event_result) = event_stream.next().await {
                let event = match event_result {
                    Ok(event) => event,
                    Err(err) => {
                        yield Err(ProviderError::Api(format!("stream error: {}", err)));
                        return;
                    }
                };

                if event.data.trim().is_empty() || event.data == "[DONE]" {
                    continue;
                }

                let parsed: ResponsesStreamEvent = match serde_json::from_str(&event.data) {
                    Ok(parsed) => parsed,
                    Err(err) => {
                        yield Err(ProviderError::Api(format!(
                            "failed to parse event: {}",
                            err
                        )));
                        return;
                    }
                };

                match parsed.event_type.as_str() {
                    "response.output_text.delta" => {
                        if let Some(text) = parsed.delta {
                            if !text.is_empty() {
                                yield Ok(StreamEvent::ContentDelta { text });
                            }
                        }
                    }
                    "response.output_item.added" => {
                        let Some(item) = parsed.item else { continue };
                        if item.get("type").and_then(Value::as_str) != Some("function_call") {
                            continue;
                        }
                        saw_function_call = true;

                        let item_id = item
                            .get("id")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .or(parsed.item_id.clone())
                            .unwrap_or_else(|| format!("item-{}", next_call_index));
                        let index = next_call_index;
                        next_call_index += 1;
                        call_index_by_item.insert(item_id.clone(), index);
                        if let Some(output_index) = parsed.output_index {
                            item_by_output_index.insert(output_index, item_id);
                        }

                        yield Ok(StreamEvent::ToolCallDelta {
                            index,
                            id: item.get("call_id").and_then(Value::as_str).map(str::to_string),
                            name: item.get("name").and_then(Value::as_str).map(str::to_string),
                            args_delta: None,
                        });
                    }
                    "response.function_call_arguments.delta" => {
                        let index = parsed
                            .item_id
                            .as_deref()
                            .and_then(|id| call_index_by_item.get(id).copied())
                            .or_else(|| {
                                parsed
                                    .output_index
                                    .and_then(|oi| item_by_output_index.get(&oi))
                                    .and_then(|id| call_index_by_item.get(id).copied())
                            });
                        let Some(index) = index else { continue };

                        yield Ok(StreamEvent::ToolCallDelta {
                            index,
                            id: None,
                            name: None,
                            args_delta: parsed.delta,
                        });
                    }
                    "response.function_call_arguments.done" => {
                        // The done event carries the authoritative complete
                        // argument string.
                        let index = parsed
                            .item_id
                            .as_deref()
                            .and_then(|id| call_index_by_item.get(id).copied());
                        if let (Some(index), Some(args)) = (index, parsed.arguments) {
                            // Empty id/name mean "keep what the added event
                            // already supplied".
                            yield Ok(StreamEvent::ToolCallComplete {
                                index,
                                id: String::new(),
                                name: String::new(),
                                args,
                                metadata: ToolCallMetadata::default(),
                            });
                        }
                    }
                    "response.output_item.done" => {
                        let Some(item) = parsed.item else { continue };
                        if item.get("type").and_then(Value::as_str) != Some("function_call") {
                            continue;
                        }
                        let item_id = item
                            .get("id")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .or(parsed.item_id);
                        let Some(index) = item_id
                            .as_deref()
                            .and_then(|id| call_index_by_item.get(id).copied())
                        else {
                            continue;
                        };

                        yield Ok(StreamEvent::ToolCallComplete {
                            index,
                            id: item
                                .get("call_id")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            name: item
                                .get("name")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            args: item
                                .get("arguments")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            metadata: ToolCallMetadata::default(),
                        });
                    }
                    "response.completed" => {
                        let usage = parsed
                            .response
                            .as_ref()
                            .and_then(|r| r.get("usage"))
                            .map(|u| Usage {
                                prompt_tokens: u
                                    .get("input_tokens")
                                    .and_then(Value::as_u64)
                                    .unwrap_or(0) as u32,
                                completion_tokens: u
                                    .get("output_tokens")
                                    .and_then(Value::as_u64)
                                    .unwrap_or(0) as u32,
                                cached_tokens: 0,
                            });
                        let reason = if saw_function_call {
                            FinishReason::ToolCalls
                        } else {
                            FinishReason::Stop
                        };
                        finished = true;
                        yield Ok(StreamEvent::Finish { reason, usage });
                    }
                    "response.failed" | "error" => {
                        let message = parsed
                            .response
                            .as_ref()
                            .and_then(|r| r.get("error"))
                            .and_then(|e| e.get("message"))
                            .and_then(Value::as_str)
                            .unwrap_or("response failed")
                            .to_string();
                        yield Err(ProviderError::Api(message));
                        return;
                    }
                    _ => {}
                }
            }

            if !finished {
                let reason = if saw_function_call {
                    FinishReason::ToolCalls
                } else {
                    FinishReason::Stop
                };
                yield Ok(StreamEvent::Finish { reason, usage: None });
            }
        };

        Box::pin(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::ToolDefinition;

    #[test]
    fn test_tool_definitions_are_flat() {
        let tools = ResponsesAdapter::convert_tools(&[ToolDefinition::new(
            "webContentExtractor",
            "Extract page content",
            json!({"type": "object", "properties": {"url": {"type": "string"}}}),
        )]);
        // name at the top level, and no nested `function` object
        assert_eq!(tools[0]["name"], "webContentExtractor");
        assert_eq!(tools[0]["type"], "function");
        assert_eq!(tools[0]["strict"], true);
        assert!(tools[0].get("function").is_none());
    }

    #[test]
    fn test_derive_finish_from_output_items() {
        let with_call = vec![
            json!({"type": "message", "content": []}),
            json!({"type": "function_call", "call_id": "c1"}),
        ];
        assert_eq!(
            ResponsesAdapter::derive_finish(&with_call),
            FinishReason::ToolCalls
        );

        let without = vec![json!({"type": "message", "content": []})];
        assert_eq!(
            ResponsesAdapter::derive_finish(&without),
            FinishReason::Stop
        );
        assert_eq!(ResponsesAdapter::derive_finish(&[]), FinishReason::Stop);
    }

    #[test]
    fn test_parse_response_collects_calls_in_order() {
        let body = json!({
            "output": [
                {"type": "message", "content": [{"type": "output_text", "text": "Let me check."}]},
                {"type": "function_call", "call_id": "c1", "name": "alpha", "arguments": "{}"},
                {"type": "function_call", "call_id": "c2", "name": "beta", "arguments": "{\"x\":1}"}
            ],
            "usage": {"input_tokens": 12, "output_tokens": 30}
        });
        let parsed = ResponsesAdapter::parse_response(&body);
        assert_eq!(parsed.content.as_deref(), Some("Let me check."));
        assert_eq!(parsed.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(parsed.tool_calls.len(), 2);
        assert_eq!(parsed.tool_calls[0].index, 0);
        assert_eq!(parsed.tool_calls[0].id, "c1");
        assert_eq!(parsed.tool_calls[1].index, 1);
        assert_eq!(parsed.tool_calls[1].function.name, "beta");
        assert_eq!(parsed.usage.unwrap().prompt_tokens, 12);
    }

    #[test]
    fn test_continuation_items_for_tool_loop() {
        let mut assistant = Message::assistant("");
        assistant.content = None;
        assistant.tool_calls = Some(vec![ToolCall::new(
            "c1",
            0,
            "webContentExtractor",
            r#"{"url":"https://example.com"}"#,
        )]);
        let messages = vec![
            Message::system("Be helpful."),
            Message::user("extract example.com"),
            assistant,
            Message::tool_result("c1", r#"{"title":"Example"}"#),
        ];

        let (items, instructions) = ResponsesAdapter::convert_input(&messages);
        assert_eq!(instructions.as_deref(), Some("Be helpful."));
        assert_eq!(items.len(), 3);
        assert_eq!(items[0]["role"], "user");
        assert_eq!(items[1]["type"], "function_call");
        assert_eq!(items[1]["call_id"], "c1");
        assert_eq!(items[1]["arguments"], r#"{"url":"https://example.com"}"#);
        assert_eq!(items[2]["type"], "function_call_output");
        assert_eq!(items[2]["call_id"], "c1");
    }

    #[test]
    fn test_build_request_shape() {
        let payload = ChatPayload {
            model: serde_json::from_value(json!({
                "id": "gpt-5", "modelId": "gpt-5", "provider": "openai-responses"
            }))
            .unwrap(),
            api_key: "k".to_string(),
            endpoint: None,
            messages: vec![Message::user("hi")],
            tools: vec![ToolDefinition::new("t", "d", json!({"type": "object", "properties": {}}))],
            max_tokens: Some(1024),
            temperature: None,
        };
        let wire = ResponsesAdapter.build_request(&payload).unwrap();
        assert_eq!(wire.url, RESPONSES_API_BASE);
        assert_eq!(wire.body["stream"], true);
        assert_eq!(wire.body["max_output_tokens"], 1024);
        assert_eq!(wire.body["tools"][0]["name"], "t");
    }
}
