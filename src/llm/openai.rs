// OpenAI Chat Completions adapter using reqwest + SSE streaming

use crate::config::types::ProviderKind;
use crate::llm::adapters::{ChatPayload, EventStream, ProviderAdapter, WireRequest};
use crate::llm::provider::{
    FinishReason, FunctionCall, Message, Role, StreamEvent, ToolCall, ToolCallMetadata,
    ToolDefinition, Usage,
};
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

pub struct OpenAiAdapter;

// Request/Response types matching the Chat Completions spec

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct OpenAiTool {
    #[serde(rename = "type")]
    tool_type: String, // Always "function"
    function: OpenAiFunction,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct OpenAiFunction {
    name: String,
    description: String,
    parameters: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    strict: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "role")]
pub(crate) enum ChatMessage {
    #[serde(rename = "system")]
    System { content: String },
    #[serde(rename = "user")]
    User { content: UserContent },
    #[serde(rename = "assistant")]
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<OpenAiToolCall>>,
    },
    #[serde(rename = "tool")]
    Tool {
        content: String,
        tool_call_id: String,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub(crate) enum UserContent {
    Text(String),
    Parts(Vec<UserPart>),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type")]
pub(crate) enum UserPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub(crate) struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub(crate) struct OpenAiToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub tool_type: String, // Always "function"
    pub function: OpenAiFunctionCall,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub(crate) struct OpenAiFunctionCall {
    pub name: String,
    pub arguments: String, // JSON string
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    delta: Delta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl OpenAiAdapter {
    /// Strict-mode tool schemas require every property to be listed in
    /// `required`; promote the list before sending so app-configured
    /// schemas with optional fields still validate.
    pub(crate) fn strict_parameters(schema: &Value) -> Value {
        let mut schema = schema.clone();
        if let Some(obj) = schema.as_object_mut() {
            if let Some(props) = obj.get("properties").and_then(Value::as_object) {
                let mut keys: Vec<Value> = props.keys().cloned().map(Value::String).collect();
                keys.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
                obj.insert("required".to_string(), Value::Array(keys));
            }
            obj.entry("additionalProperties".to_string())
                .or_insert(Value::Bool(false));
        }
        schema
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Vec<OpenAiTool> {
        tools
            .iter()
            .map(|t| OpenAiTool {
                tool_type: "function".to_string(),
                function: OpenAiFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: Self::strict_parameters(&t.parameters),
                    strict: Some(true),
                },
            })
            .collect()
    }

    /// Generic message -> wire message, including assistant continuations
    /// with their tool calls.
    pub(crate) fn convert_message(msg: &Message) -> ChatMessage {
        match msg.role {
            Role::System => ChatMessage::System {
                content: msg.content_str().to_string(),
            },
            Role::User => {
                if msg.images.is_empty() {
                    ChatMessage::User {
                        content: UserContent::Text(msg.content_str().to_string()),
                    }
                } else {
                    let mut parts = vec![UserPart::Text {
                        text: msg.content_str().to_string(),
                    }];
                    parts.extend(msg.images.iter().map(|url| UserPart::ImageUrl {
                        image_url: ImageUrl { url: url.clone() },
                    }));
                    ChatMessage::User {
                        content: UserContent::Parts(parts),
                    }
                }
            }
            Role::Assistant => {
                let tool_calls = msg.tool_calls.as_ref().map(|calls| {
                    calls
                        .iter()
                        .map(|tc| OpenAiToolCall {
                            id: tc.id.clone(),
                            tool_type: "function".to_string(),
                            function: OpenAiFunctionCall {
                                name: tc.function.name.clone(),
                                arguments: tc.function.arguments.clone(),
                            },
                        })
                        .collect()
                });
                ChatMessage::Assistant {
                    content: msg.content.clone(),
                    tool_calls,
                }
            }
            Role::Tool => ChatMessage::Tool {
                content: msg.content_str().to_string(),
                tool_call_id: msg.tool_call_id.clone().unwrap_or_default(),
            },
        }
    }

    /// Wire assistant message -> generic, with the output position as the
    /// tool-call index.
    pub(crate) fn message_from_wire(msg: &ChatMessage) -> Message {
        match msg {
            ChatMessage::Assistant {
                content,
                tool_calls,
            } => Message {
                role: Role::Assistant,
                content: content.clone(),
                tool_call_id: None,
                tool_calls: tool_calls.as_ref().map(|calls| {
                    calls
                        .iter()
                        .enumerate()
                        .map(|(index, tc)| ToolCall {
                            id: tc.id.clone(),
                            index,
                            call_type: "function".to_string(),
                            function: FunctionCall {
                                name: tc.function.name.clone(),
                                arguments: tc.function.arguments.clone(),
                            },
                            metadata: ToolCallMetadata::default(),
                        })
                        .collect()
                }),
                thought_signatures: Vec::new(),
                images: Vec::new(),
            },
            ChatMessage::System { content } => Message::system(content.clone()),
            ChatMessage::User { content } => match content {
                UserContent::Text(text) => Message::user(text.clone()),
                UserContent::Parts(parts) => {
                    let mut msg = Message::user(String::new());
                    for part in parts {
                        match part {
                            UserPart::Text { text } => msg.content = Some(text.clone()),
                            UserPart::ImageUrl { image_url } => {
                                msg.images.push(image_url.url.clone())
                            }
                        }
                    }
                    msg
                }
            },
            ChatMessage::Tool {
                content,
                tool_call_id,
            } => Message::tool_result(tool_call_id.clone(), content.clone()),
        }
    }

    fn map_finish(reason: &str) -> FinishReason {
        match reason {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "tool_calls" => FinishReason::ToolCalls,
            "content_filter" => FinishReason::ContentFilter,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

impl ProviderAdapter for OpenAiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn build_request(&self, payload: &ChatPayload) -> Result<WireRequest, crate::llm::provider::ProviderError> {
        let messages = payload.messages.iter().map(Self::convert_message).collect();
        let tools = if payload.tools.is_empty() {
            None
        } else {
            Some(Self::convert_tools(&payload.tools))
        };

        let request = ChatCompletionRequest {
            model: payload.model.model_id.clone(),
            messages,
            // Models reject custom temperature alongside tools
            temperature: if tools.is_some() {
                None
            } else {
                payload.temperature
            },
            max_completion_tokens: payload.max_tokens,
            stream: true,
            stream_options: Some(StreamOptions {
                include_usage: true,
            }),
            tools,
        };

        let base = payload
            .endpoint
            .clone()
            .unwrap_or_else(|| OPENAI_API_BASE.to_string());
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
            let mut saw_tool_calls = false;
            let mut finished = false;

            while let Some(event_result) = event_stream.next().await {
                match event_result {
                    Ok(event) => {
                        if event.data == "[DONE]" {
                            break;
                        }

                        let chunk: ChatCompletionChunk = match serde_json::from_str(&event.data) {
                            Ok(chunk) => chunk,
                            Err(err) => {
                                yield Err(crate::llm::provider::ProviderError::Api(format!(
                                    "failed to parse chunk: {}",
                                    err
                                )));
                                return;
                            }
                        };

                        // Usage arrives in a final chunk with no choices.
                        if chunk.choices.is_empty() {
                            if let Some(usage) = chunk.usage {
                                let reason = finish_reason.take().unwrap_or(if saw_tool_calls {
                                    FinishReason::ToolCalls
                                } else {
                                    FinishReason::Stop
                                });
                                finished = true;
                                yield Ok(StreamEvent::Finish {
                                    reason,
                                    usage: Some(Usage {
                                        prompt_tokens: usage.prompt_tokens,
                                        completion_tokens: usage.completion_tokens,
                                        cached_tokens: 0,
                                    }),
                                });
                            }
                            continue;
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
                                    yield Ok(StreamEvent::ToolCallDelta {
                                        index: delta.index,
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
                    Err(err) => {
                        yield Err(crate::llm::provider::ProviderError::Api(format!(
                            "stream error: {}",
                            err
                        )));
                        return;
                    }
                }
            }

            // Stream ended without a usage chunk ([DONE] straight after
            // the last choice); still deliver the finish.
            if !finished {
                let reason = finish_reason.unwrap_or(if saw_tool_calls {
                    FinishReason::ToolCalls
                } else {
                    FinishReason::Stop
                });
                yield Ok(StreamEvent::Finish { reason, usage: None });
            }
        };

        Box::pin(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_parameters_promotes_required() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {"city": {"type": "string"}, "unit": {"type": "string"}},
            "required": ["city"]
        });
        let strict = OpenAiAdapter::strict_parameters(&schema);
        let required: Vec<&str> = strict["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(required, vec!["city", "unit"]);
        assert_eq!(strict["additionalProperties"], false);
    }

    #[test]
    fn test_tool_definitions_are_nested_with_strict() {
        let tools = OpenAiAdapter::convert_tools(&[ToolDefinition::new(
            "search",
            "Search the web",
            serde_json::json!({"type": "object", "properties": {"q": {"type": "string"}}}),
        )]);
        let wire = serde_json::to_value(&tools).unwrap();
        assert_eq!(wire[0]["type"], "function");
        assert_eq!(wire[0]["function"]["name"], "search");
        assert_eq!(wire[0]["function"]["strict"], true);
    }

    #[test]
    fn test_build_request_simple_chat_has_no_tools_field() {
        let payload = ChatPayload {
            model: serde_json::from_value(serde_json::json!({
                "id": "gpt-4o", "modelId": "gpt-4o", "provider": "openai"
            }))
            .unwrap(),
            api_key: "test-key".to_string(),
            endpoint: None,
            messages: vec![Message::system("You are helpful."), Message::user("Hello")],
            tools: Vec::new(),
            max_tokens: Some(4096),
            temperature: Some(0.7),
        };

        let wire = OpenAiAdapter.build_request(&payload).unwrap();
        assert_eq!(wire.url, "https://api.openai.com/v1/chat/completions");
        assert!(wire.body.get("tools").is_none());
        assert_eq!(wire.body["messages"][0]["role"], "system");
        assert_eq!(wire.body["messages"][1]["content"], "Hello");
        assert_eq!(wire.headers[0].1, "Bearer test-key");
    }

    #[test]
    fn test_assistant_continuation_roundtrip() {
        let mut message = Message::assistant("checking");
        message.tool_calls = Some(vec![
            ToolCall::new("call_a", 0, "get_weather", r#"{"city":"Tokyo"}"#),
            ToolCall::new("call_b", 1, "get_weather", r#"{"city":"Paris"}"#),
        ]);

        let wire = OpenAiAdapter::convert_message(&message);
        let back = OpenAiAdapter::message_from_wire(&wire);
        assert_eq!(back, message);
    }

    #[test]
    fn test_user_message_with_images_becomes_parts() {
        let mut message = Message::user("describe this");
        message
            .images
            .push("data:image/png;base64,AAAA".to_string());

        let wire = serde_json::to_value(OpenAiAdapter::convert_message(&message)).unwrap();
        assert_eq!(wire["content"][0]["type"], "text");
        assert_eq!(wire["content"][1]["type"], "image_url");
        assert_eq!(
            wire["content"][1]["image_url"]["url"],
            "data:image/png;base64,AAAA"
        );
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(OpenAiAdapter::map_finish("stop"), FinishReason::Stop);
        assert_eq!(
            OpenAiAdapter::map_finish("tool_calls"),
            FinishReason::ToolCalls
        );
        assert_eq!(OpenAiAdapter::map_finish("length"), FinishReason::Length);
        assert_eq!(
            OpenAiAdapter::map_finish("content_filter"),
            FinishReason::ContentFilter
        );
    }

    #[test]
    fn test_custom_endpoint_used_verbatim() {
        let payload = ChatPayload {
            model: serde_json::from_value(serde_json::json!({
                "id": "llama", "modelId": "llama-3", "provider": "local"
            }))
            .unwrap(),
            api_key: "none".to_string(),
            endpoint: Some("http://localhost:11434/v1".to_string()),
            messages: vec![Message::user("hi")],
            tools: Vec::new(),
            max_tokens: None,
            temperature: None,
        };
        let wire = OpenAiAdapter.build_request(&payload).unwrap();
        assert_eq!(wire.url, "http://localhost:11434/v1/chat/completions");
    }
}
