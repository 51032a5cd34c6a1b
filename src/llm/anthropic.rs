// Anthropic Messages API adapter using reqwest + SSE streaming

use crate::config::types::ProviderKind;
use crate::llm::adapters::{ChatPayload, EventStream, ProviderAdapter, WireRequest};
use crate::llm::provider::{
    FinishReason, FunctionCall, Message, ProviderError, Role, StreamEvent, ToolCall,
    ToolCallMetadata, ToolDefinition, Usage,
};
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicAdapter;

#[derive(Debug, Serialize)]
struct CreateMessageRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub(crate) struct AnthropicMessage {
    pub role: String,
    pub content: AnthropicContent,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub(crate) enum AnthropicContent {
    Text(String),
    Blocks(Vec<AnthropicContentBlock>),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type")]
pub(crate) enum AnthropicContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image { source: ImageSource },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub(crate) struct ImageSource {
    #[serde(rename = "type")]
    pub source_type: String, // "base64"
    pub media_type: String,
    pub data: String,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    input_schema: Value,
}

// Streaming event payloads

#[derive(Debug, Deserialize)]
struct MessageStart {
    message: MessageStartBody,
}

#[derive(Debug, Deserialize)]
struct MessageStartBody {
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlockStart {
    index: usize,
    content_block: ContentBlockInfo,
}

#[derive(Debug, Deserialize)]
struct ContentBlockInfo {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlockDelta {
    index: usize,
    delta: BlockDelta,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum BlockDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(rename = "input_json_delta")]
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageDelta {
    delta: MessageDeltaBody,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaBody {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
    #[serde(default)]
    cache_read_input_tokens: Option<u32>,
}

impl AnthropicAdapter {
    fn convert_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|tool| AnthropicTool {
                name: tool.name.clone(),
                description: Some(tool.description.clone()),
                input_schema: tool.parameters.clone(),
            })
            .collect()
    }

    /// Split a data URL into (media type, raw base64).
    fn split_data_url(url: &str) -> Option<(String, String)> {
        let rest = url.strip_prefix("data:")?;
        let (meta, data) = rest.split_once(',')?;
        let media_type = meta.strip_suffix(";base64").unwrap_or(meta);
        Some((media_type.to_string(), data.to_string()))
    }

    /// Generic history -> wire messages plus the separate system field.
    pub(crate) fn convert_messages(
        messages: &[Message],
    ) -> (Vec<AnthropicMessage>, Option<String>) {
        let mut out = Vec::new();
        let mut system = None;

        for msg in messages {
            match msg.role {
                Role::System => {
                    if system.is_none() {
                        system = Some(msg.content_str().to_string());
                    }
                }
                Role::User => {
                    if msg.images.is_empty() {
                        out.push(AnthropicMessage {
                            role: "user".to_string(),
                            content: AnthropicContent::Text(msg.content_str().to_string()),
                        });
                    } else {
                        let mut blocks = vec![AnthropicContentBlock::Text {
                            text: msg.content_str().to_string(),
                        }];
                        for url in &msg.images {
                            if let Some((media_type, data)) = Self::split_data_url(url) {
                                blocks.push(AnthropicContentBlock::Image {
                                    source: ImageSource {
                                        source_type: "base64".to_string(),
                                        media_type,
                                        data,
                                    },
                                });
                            }
                        }
                        out.push(AnthropicMessage {
                            role: "user".to_string(),
                            content: AnthropicContent::Blocks(blocks),
                        });
                    }
                }
                Role::Assistant => {
                    let mut blocks = Vec::new();
                    if let Some(text) = msg.content.as_deref().filter(|t| !t.is_empty()) {
                        blocks.push(AnthropicContentBlock::Text {
                            text: text.to_string(),
                        });
                    }
                    if let Some(calls) = &msg.tool_calls {
                        for call in calls {
                            blocks.push(AnthropicContentBlock::ToolUse {
                                id: call.id.clone(),
                                name: call.function.name.clone(),
                                input: call
                                    .parsed_arguments()
                                    .unwrap_or_else(|_| serde_json::json!({})),
                            });
                        }
                    }
                    if !blocks.is_empty() {
                        out.push(AnthropicMessage {
                            role: "assistant".to_string(),
                            content: AnthropicContent::Blocks(blocks),
                        });
                    }
                }
                Role::Tool => {
                    if let Some(call_id) = &msg.tool_call_id {
                        out.push(AnthropicMessage {
                            role: "user".to_string(),
                            content: AnthropicContent::Blocks(vec![
                                AnthropicContentBlock::ToolResult {
                                    tool_use_id: call_id.clone(),
                                    content: msg.content_str().to_string(),
                                    is_error: None,
                                },
                            ]),
                        });
                    }
                }
            }
        }

        (out, system)
    }

    /// Wire assistant message -> generic, for continuation round-trips.
    pub(crate) fn message_from_wire(msg: &AnthropicMessage) -> Message {
        let mut content = String::new();
        let mut tool_calls = Vec::new();

        if let AnthropicContent::Blocks(blocks) = &msg.content {
            for block in blocks {
                match block {
                    AnthropicContentBlock::Text { text } => content.push_str(text),
                    AnthropicContentBlock::ToolUse { id, name, input } => {
                        let index = tool_calls.len();
                        tool_calls.push(ToolCall {
                            id: id.clone(),
                            index,
                            call_type: "function".to_string(),
                            function: FunctionCall {
                                name: name.clone(),
                                arguments: serde_json::to_string(input).unwrap_or_default(),
                            },
                            metadata: ToolCallMetadata::default(),
                        });
                    }
                    _ => {}
                }
            }
        } else if let AnthropicContent::Text(text) = &msg.content {
            content.push_str(text);
        }

        Message {
            role: Role::Assistant,
            content: if content.is_empty() {
                None
            } else {
                Some(content)
            },
            tool_call_id: None,
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            thought_signatures: Vec::new(),
            images: Vec::new(),
        }
    }

    fn map_finish(reason: Option<&str>) -> FinishReason {
        match reason {
            Some("end_turn") | Some("stop_sequence") | None => FinishReason::Stop,
            Some("max_tokens") => FinishReason::Length,
            Some("tool_use") => FinishReason::ToolCalls,
            Some("refusal") => FinishReason::ContentFilter,
            Some(other) => FinishReason::Other(other.to_string()),
        }
    }
}

impl ProviderAdapter for AnthropicAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn build_request(&self, payload: &ChatPayload) -> Result<WireRequest, ProviderError> {
        let (messages, system) = Self::convert_messages(&payload.messages);
        let tools = if payload.tools.is_empty() {
            None
        } else {
            Some(Self::convert_tools(&payload.tools))
        };

        let request = CreateMessageRequest {
            model: payload.model.model_id.clone(),
            max_tokens: payload.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages,
            system,
            temperature: payload.temperature,
            stream: true,
            tool_choice: tools
                .as_ref()
                .map(|_| serde_json::json!({"type": "auto"})),
            tools,
        };

        let url = payload
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("{}/messages", ANTHROPIC_API_BASE));

        Ok(WireRequest {
            url,
            headers: vec![
                ("x-api-key", payload.api_key.clone()),
                ("anthropic-version", ANTHROPIC_VERSION.to_string()),
            ],
            body: serde_json::to_value(&request)?,
        })
    }

    fn parse_stream(&self, response: reqwest::Response) -> EventStream {
        let event_stream = response.bytes_stream().eventsource();

        let output = async_stream::stream! {
            futures::pin_mut!(event_stream);

            // Content-block indexes count text blocks too; tool calls get
            // their own zero-based index.
            let mut call_index_by_block: HashMap<usize, usize> = HashMap::new();
            let mut next_call_index = 0usize;
            let mut input_tokens = 0u32;
            let mut cached_tokens = 0u32;
            let mut output_tokens = 0u32;
            let mut stop_reason: Option<String> = None;
            let mut finished = false;

            while let Some(event_result) = event_stream.next().await {
                let event = match event_result {
                    Ok(event) => event,
                    Err(err) => {
                        yield Err(ProviderError::Api(format!("stream error: {}", err)));
                        return;
                    }
                };

                match event.event.as_str() {
                    "message_start" => {
                        if let Ok(start) = serde_json::from_str::<MessageStart>(&event.data) {
                            if let Some(usage) = start.message.usage {
                                input_tokens = usage.input_tokens;
                                cached_tokens = usage.cache_read_input_tokens.unwrap_or(0);
                            }
                        }
                    }
                    "content_block_start" => {
                        let Ok(start) = serde_json::from_str::<ContentBlockStart>(&event.data)
                        else {
                            continue;
                        };
                        if start.content_block.block_type == "tool_use" {
                            let index = next_call_index;
                            next_call_index += 1;
                            call_index_by_block.insert(start.index, index);
                            yield Ok(StreamEvent::ToolCallDelta {
                                index,
                                id: start.content_block.id,
                                name: start.content_block.name,
                                args_delta: None,
                            });
                        }
                    }
                    "content_block_delta" => {
                        let Ok(delta) = serde_json::from_str::<ContentBlockDelta>(&event.data)
                        else {
                            continue;
                        };
                        match delta.delta {
                            BlockDelta::TextDelta { text } => {
                                if !text.is_empty() {
                                    yield Ok(StreamEvent::ContentDelta { text });
                                }
                            }
                            BlockDelta::InputJsonDelta { partial_json } => {
                                if let Some(index) = call_index_by_block.get(&delta.index) {
                                    yield Ok(StreamEvent::ToolCallDelta {
                                        index: *index,
                                        id: None,
                                        name: None,
                                        args_delta: Some(partial_json),
                                    });
                                }
                            }
                            BlockDelta::Other => {}
                        }
                    }
                    "message_delta" => {
                        if let Ok(delta) = serde_json::from_str::<MessageDelta>(&event.data) {
                            if let Some(reason) = delta.delta.stop_reason {
                                stop_reason = Some(reason);
                            }
                            if let Some(usage) = delta.usage {
                                output_tokens = usage.output_tokens;
                            }
                        }
                    }
                    "message_stop" => {
                        finished = true;
                        yield Ok(StreamEvent::Finish {
                            reason: Self::map_finish(stop_reason.as_deref()),
                            usage: Some(Usage {
                                prompt_tokens: input_tokens,
                                completion_tokens: output_tokens,
                                cached_tokens,
                            }),
                        });
                        break;
                    }
                    "error" => {
                        let message = serde_json::from_str::<Value>(&event.data)
                            .ok()
                            .and_then(|v| {
                                v.get("error")
                                    .and_then(|e| e.get("message"))
                                    .and_then(Value::as_str)
                                    .map(str::to_string)
                            })
                            .unwrap_or_else(|| "provider error".to_string());
                        yield Err(ProviderError::Api(message));
                        return;
                    }
                    _ => {}
                }
            }

            if !finished {
                yield Ok(StreamEvent::Finish {
                    reason: Self::map_finish(stop_reason.as_deref()),
                    usage: None,
                });
            }
        };

        Box::pin(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_definitions_use_input_schema() {
        let tools = AnthropicAdapter::convert_tools(&[ToolDefinition::new(
            "search",
            "Search",
            serde_json::json!({"type": "object", "properties": {"q": {"type": "string"}}}),
        )]);
        let wire = serde_json::to_value(&tools).unwrap();
        assert!(wire[0].get("input_schema").is_some());
        assert!(wire[0].get("parameters").is_none());
    }

    #[test]
    fn test_system_prompt_goes_to_separate_field() {
        let (messages, system) = AnthropicAdapter::convert_messages(&[
            Message::system("Be terse."),
            Message::user("hi"),
        ]);
        assert_eq!(system.as_deref(), Some("Be terse."));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "user");
    }

    #[test]
    fn test_tool_results_become_user_tool_result_blocks() {
        let (messages, _) = AnthropicAdapter::convert_messages(&[Message::tool_result(
            "toolu_1",
            r#"{"ok":true}"#,
        )]);
        assert_eq!(messages[0].role, "user");
        let wire = serde_json::to_value(&messages[0]).unwrap();
        assert_eq!(wire["content"][0]["type"], "tool_result");
        assert_eq!(wire["content"][0]["tool_use_id"], "toolu_1");
    }

    #[test]
    fn test_assistant_continuation_roundtrip() {
        let mut message = Message::assistant("let me look");
        // Keys already sorted so the string form survives the Value hop.
        message.tool_calls = Some(vec![ToolCall::new(
            "toolu_1",
            0,
            "search",
            r#"{"limit":3,"q":"rust"}"#,
        )]);

        let (wire, _) = AnthropicAdapter::convert_messages(&[message.clone()]);
        let back = AnthropicAdapter::message_from_wire(&wire[0]);
        assert_eq!(back, message);
    }

    #[test]
    fn test_image_data_url_becomes_base64_block() {
        let mut msg = Message::user("what is this");
        msg.images.push("data:image/jpeg;base64,QUJD".to_string());
        let (messages, _) = AnthropicAdapter::convert_messages(&[msg]);
        let wire = serde_json::to_value(&messages[0]).unwrap();
        assert_eq!(wire["content"][1]["type"], "image");
        assert_eq!(wire["content"][1]["source"]["media_type"], "image/jpeg");
        assert_eq!(wire["content"][1]["source"]["data"], "QUJD");
    }

    #[test]
    fn test_finish_mapping() {
        assert_eq!(
            AnthropicAdapter::map_finish(Some("end_turn")),
            FinishReason::Stop
        );
        assert_eq!(
            AnthropicAdapter::map_finish(Some("tool_use")),
            FinishReason::ToolCalls
        );
        assert_eq!(
            AnthropicAdapter::map_finish(Some("max_tokens")),
            FinishReason::Length
        );
    }

    #[test]
    fn test_build_request_headers() {
        let payload = ChatPayload {
            model: serde_json::from_value(serde_json::json!({
                "id": "claude", "modelId": "claude-sonnet-4-20250514", "provider": "anthropic"
            }))
            .unwrap(),
            api_key: "sk-ant-xyz".to_string(),
            endpoint: None,
            messages: vec![Message::user("hello")],
            tools: Vec::new(),
            max_tokens: None,
            temperature: None,
        };
        let wire = AnthropicAdapter.build_request(&payload).unwrap();
        assert_eq!(wire.url, "https://api.anthropic.com/v1/messages");
        assert!(wire
            .headers
            .iter()
            .any(|(k, v)| *k == "x-api-key" && v == "sk-ant-xyz"));
        assert!(wire
            .headers
            .iter()
            .any(|(k, _)| *k == "anthropic-version"));
        assert_eq!(wire.body["max_tokens"], 4096);
    }
}
