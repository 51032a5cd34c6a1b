// Google Gemini adapter using reqwest + SSE streaming.
//
// With thinking enabled, Gemini attaches a `thoughtSignature` to text parts
// AND to functionCall parts. Every signature from a response must be kept
// on the assistant message and replayed on the same kind of part in the
// continuation request; losing any of them makes the next request fail
// with INVALID_ARGUMENT.

use crate::config::types::ProviderKind;
use crate::llm::adapters::{ChatPayload, EventStream, ProviderAdapter, WireRequest};
use crate::llm::provider::{
    FinishReason, Message, ProviderError, Role, StreamEvent, ToolCallMetadata, ToolDefinition,
    Usage,
};
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiAdapter;

// ============================== API types ==============================

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GeminiTool>>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
    #[serde(rename = "toolConfig", skip_serializing_if = "Option::is_none")]
    tool_config: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub(crate) struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub(crate) struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
    #[serde(
        rename = "thoughtSignature",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub thought_signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(
        rename = "functionCall",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub function_call: Option<GeminiFunctionCall>,
    #[serde(
        rename = "functionResponse",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub function_response: Option<GeminiFunctionResponse>,
    #[serde(
        rename = "inlineData",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub inline_data: Option<GeminiInlineData>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub(crate) struct GeminiFunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub(crate) struct GeminiFunctionResponse {
    pub name: String,
    pub response: Value,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub(crate) struct GeminiInlineData {
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Serialize)]
struct GeminiTool {
    #[serde(rename = "functionDeclarations")]
    function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionDeclaration {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    parameters: Value,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Option<Vec<GeminiCandidate>>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize, Clone)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<u32>,
    #[serde(rename = "cachedContentTokenCount")]
    cached_content_token_count: Option<u32>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<u32>,
}

impl GeminiAdapter {
    fn convert_tools(tools: &[ToolDefinition]) -> Vec<GeminiTool> {
        vec![GeminiTool {
            function_declarations: tools
                .iter()
                .map(|tool| GeminiFunctionDeclaration {
                    name: tool.name.clone(),
                    description: Some(tool.description.clone()),
                    parameters: tool.parameters.clone(),
                })
                .collect(),
        }]
    }

    fn split_data_url(url: &str) -> Option<(String, String)> {
        let rest = url.strip_prefix("data:")?;
        let (meta, data) = rest.split_once(',')?;
        let mime_type = meta.strip_suffix(";base64").unwrap_or(meta);
        Some((mime_type.to_string(), data.to_string()))
    }

    /// Generic history -> Gemini contents plus the systemInstruction.
    ///
    /// Assistant turns replay every thought signature on its original part
    /// kind: call signatures ride on their functionCall parts, the
    /// remaining message-level signatures on text parts. Tool results look
    /// up the function name from the assistant turn that issued the call.
    pub(crate) fn convert_contents(
        messages: &[Message],
    ) -> (Vec<GeminiContent>, Option<GeminiContent>) {
        let mut contents = Vec::new();
        let mut system_instruction = None;
        let mut call_names: HashMap<String, String> = HashMap::new();

        for msg in messages {
            match msg.role {
                Role::System => {
                    if system_instruction.is_none() {
                        system_instruction = Some(GeminiContent {
                            role: None,
                            parts: vec![GeminiPart {
                                text: Some(msg.content_str().to_string()),
                                ..Default::default()
                            }],
                        });
                    }
                }
                Role::User => {
                    let mut parts = vec![GeminiPart {
                        text: Some(msg.content_str().to_string()),
                        ..Default::default()
                    }];
                    for url in &msg.images {
                        if let Some((mime_type, data)) = Self::split_data_url(url) {
                            parts.push(GeminiPart {
                                inline_data: Some(GeminiInlineData { mime_type, data }),
                                ..Default::default()
                            });
                        }
                    }
                    contents.push(GeminiContent {
                        role: Some("user".to_string()),
                        parts,
                    });
                }
                Role::Assistant => {
                    let mut parts = Vec::new();

                    // Signatures not claimed by a call belong to text parts.
                    let mut text_signatures: Vec<String> = msg.thought_signatures.clone();
                    if let Some(calls) = &msg.tool_calls {
                        for call in calls {
                            if let Some(sig) = &call.metadata.thought_signature {
                                if let Some(pos) =
                                    text_signatures.iter().position(|s| s == sig)
                                {
                                    text_signatures.remove(pos);
                                }
                            }
                        }
                    }

                    let mut text_signatures = text_signatures.into_iter();
                    if let Some(text) = msg.content.as_deref().filter(|t| !t.is_empty()) {
                        parts.push(GeminiPart {
                            text: Some(text.to_string()),
                            thought_signature: text_signatures.next(),
                            ..Default::default()
                        });
                    }
                    // Leftover text-part signatures must still be replayed.
                    for signature in text_signatures {
                        parts.push(GeminiPart {
                            text: Some(String::new()),
                            thought_signature: Some(signature),
                            ..Default::default()
                        });
                    }

                    if let Some(calls) = &msg.tool_calls {
                        for call in calls {
                            call_names
                                .insert(call.id.clone(), call.function.name.clone());
                            parts.push(GeminiPart {
                                thought_signature: call.metadata.thought_signature.clone(),
                                function_call: Some(GeminiFunctionCall {
                                    name: call.function.name.clone(),
                                    args: call
                                        .parsed_arguments()
                                        .unwrap_or_else(|_| serde_json::json!({})),
                                }),
                                ..Default::default()
                            });
                        }
                    }

                    if !parts.is_empty() {
                        contents.push(GeminiContent {
                            role: Some("model".to_string()),
                            parts,
                        });
                    }
                }
                Role::Tool => {
                    let Some(call_id) = &msg.tool_call_id else { continue };
                    let name = call_names
                        .get(call_id)
                        .cloned()
                        .unwrap_or_else(|| "tool".to_string());
                    let response = serde_json::from_str(msg.content_str())
                        .unwrap_or_else(|_| serde_json::json!({ "result": msg.content_str() }));
                    contents.push(GeminiContent {
                        role: Some("user".to_string()),
                        parts: vec![GeminiPart {
                            function_response: Some(GeminiFunctionResponse { name, response }),
                            ..Default::default()
                        }],
                    });
                }
            }
        }

        (contents, system_instruction)
    }

    fn map_finish(reason: Option<&str>, saw_calls: bool) -> FinishReason {
        match reason {
            _ if saw_calls => FinishReason::ToolCalls,
            Some("STOP") | None => FinishReason::Stop,
            Some("MAX_TOKENS") => FinishReason::Length,
            Some("SAFETY") | Some("RECITATION") | Some("BLOCKLIST")
            | Some("PROHIBITED_CONTENT") => FinishReason::ContentFilter,
            Some(other) => FinishReason::Other(other.to_string()),
        }
    }

    fn convert_usage(usage: &UsageMetadata) -> Usage {
        Usage {
            prompt_tokens: usage.prompt_token_count.unwrap_or(0),
            completion_tokens: usage.candidates_token_count.unwrap_or(0),
            cached_tokens: usage.cached_content_token_count.unwrap_or(0),
        }
    }
}

impl ProviderAdapter for GeminiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    fn build_request(&self, payload: &ChatPayload) -> Result<WireRequest, ProviderError> {
        let (contents, system_instruction) = Self::convert_contents(&payload.messages);
        let tools = if payload.tools.is_empty() {
            None
        } else {
            Some(Self::convert_tools(&payload.tools))
        };

        let request = GenerateContentRequest {
            contents,
            tool_config: tools.as_ref().map(|_| {
                serde_json::json!({"functionCallingConfig": {"mode": "AUTO"}})
            }),
            tools,
            system_instruction,
            generation_config: Some(GeminiGenerationConfig {
                temperature: payload.temperature,
                max_output_tokens: payload.max_tokens,
            }),
        };

        let base = payload
            .endpoint
            .clone()
            .unwrap_or_else(|| GEMINI_API_BASE.to_string());
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            base.trim_end_matches('/'),
            payload.model.model_id
        );

        Ok(WireRequest {
            url,
            headers: vec![("x-goog-api-key", payload.api_key.clone())],
            body: serde_json::to_value(&request)?,
        })
    }

    fn parse_stream(&self, response: reqwest::Response) -> EventStream {
        let event_stream = response.bytes_stream().eventsource();

        let output = async_stream::stream! {
            futures::pin_mut!(event_stream);

            let mut next_call_index = 0usize;
            let mut saw_calls = false;
            let mut finish_reason: Option<String> = None;
            let mut usage: Option<Usage> = None;

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

                let chunk: GenerateContentResponse = match serde_json::from_str(&event.data) {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        yield Err(ProviderError::Api(format!(
                            "failed to parse chunk: {}",
                            err
                        )));
                        return;
                    }
                };

                if let Some(meta) = &chunk.usage_metadata {
                    usage = Some(Self::convert_usage(meta));
                }

                let Some(candidate) = chunk.candidates.and_then(|c| c.into_iter().next())
                else {
                    continue;
                };
                if let Some(reason) = &candidate.finish_reason {
                    finish_reason = Some(reason.clone());
                }
                let Some(content) = candidate.content else { continue };

                for part in content.parts {
                    // Thinking text is not forwarded, but its signature is
                    // still continuation state.
                    if part.thought == Some(true) {
                        if let Some(signature) = part.thought_signature {
                            yield Ok(StreamEvent::ThoughtSignature { signature });
                        }
                        continue;
                    }

                    if let Some(text) = part.text {
                        if let Some(signature) = part.thought_signature.clone() {
                            yield Ok(StreamEvent::ThoughtSignature { signature });
                        }
                        if !text.is_empty() {
                            yield Ok(StreamEvent::ContentDelta { text });
                        }
                        continue;
                    }

                    if let Some(call) = part.function_call {
                        saw_calls = true;
                        let index = next_call_index;
                        next_call_index += 1;
                        yield Ok(StreamEvent::ToolCallComplete {
                            index,
                            id: format!("gemini_call_{}", index + 1),
                            name: call.name,
                            args: call.args.to_string(),
                            metadata: ToolCallMetadata {
                                original_format: Some("google".to_string()),
                                thought_signature: part.thought_signature,
                                extra: Default::default(),
                            },
                        });
                        continue;
                    }

                    if let Some(inline) = part.inline_data {
                        yield Ok(StreamEvent::Image {
                            mime_type: inline.mime_type,
                            b64: inline.data,
                        });
                    }
                }
            }

            yield Ok(StreamEvent::Finish {
                reason: Self::map_finish(finish_reason.as_deref(), saw_calls),
                usage,
            });
        };

        Box::pin(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::ToolCall;

    fn signed_assistant() -> Message {
        // One functionCall part signed SIG_A, one text part signed SIG_B.
        let mut call = ToolCall::new("gemini_call_1", 0, "enhancedWebSearch", r#"{"q":"rust"}"#);
        call.metadata.original_format = Some("google".to_string());
        call.metadata.thought_signature = Some("SIG_A".to_string());

        let mut msg = Message::assistant("Searching now.");
        msg.tool_calls = Some(vec![call]);
        msg.thought_signatures = vec!["SIG_B".to_string(), "SIG_A".to_string()];
        msg
    }

    #[test]
    fn test_continuation_replays_every_signature_on_its_part_kind() {
        let messages = vec![
            Message::user("find rust news"),
            signed_assistant(),
            Message::tool_result("gemini_call_1", r#"{"hits":3}"#),
        ];
        let (contents, _) = GeminiAdapter::convert_contents(&messages);

        // user, model, user(functionResponse)
        assert_eq!(contents.len(), 3);
        let model_parts = &contents[1].parts;
        assert_eq!(model_parts.len(), 2);

        // text part carries SIG_B
        assert_eq!(model_parts[0].text.as_deref(), Some("Searching now."));
        assert_eq!(model_parts[0].thought_signature.as_deref(), Some("SIG_B"));
        // functionCall part carries SIG_A
        assert!(model_parts[1].function_call.is_some());
        assert_eq!(model_parts[1].thought_signature.as_deref(), Some("SIG_A"));

        // total signature count preserved
        let count = model_parts
            .iter()
            .filter(|p| p.thought_signature.is_some())
            .count();
        assert_eq!(count, 2);

        // tool result resolves the function name from the assistant turn
        let response = contents[2].parts[0].function_response.as_ref().unwrap();
        assert_eq!(response.name, "enhancedWebSearch");
        assert_eq!(response.response["hits"], 3);
    }

    #[test]
    fn test_unclaimed_signatures_fall_back_to_extra_text_parts() {
        let mut msg = Message::assistant("short");
        msg.thought_signatures = vec!["S1".to_string(), "S2".to_string()];

        let (contents, _) = GeminiAdapter::convert_contents(&[msg]);
        let parts = &contents[0].parts;
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].thought_signature.as_deref(), Some("S1"));
        assert_eq!(parts[1].thought_signature.as_deref(), Some("S2"));
    }

    #[test]
    fn test_system_prompt_becomes_system_instruction() {
        let (contents, system) = GeminiAdapter::convert_contents(&[
            Message::system("Answer in German."),
            Message::user("hello"),
        ]);
        assert_eq!(contents.len(), 1);
        let system = system.unwrap();
        assert_eq!(system.parts[0].text.as_deref(), Some("Answer in German."));
    }

    #[test]
    fn test_non_json_tool_output_is_wrapped() {
        let messages = vec![
            {
                let mut msg = Message::assistant("");
                msg.content = None;
                msg.tool_calls = Some(vec![ToolCall::new("c1", 0, "probe", "{}")]);
                msg
            },
            Message::tool_result("c1", "plain text output"),
        ];
        let (contents, _) = GeminiAdapter::convert_contents(&messages);
        let response = contents[1].parts[0].function_response.as_ref().unwrap();
        assert_eq!(response.response["result"], "plain text output");
    }

    #[test]
    fn test_finish_mapping_prefers_tool_calls() {
        assert_eq!(
            GeminiAdapter::map_finish(Some("STOP"), true),
            FinishReason::ToolCalls
        );
        assert_eq!(
            GeminiAdapter::map_finish(Some("STOP"), false),
            FinishReason::Stop
        );
        assert_eq!(
            GeminiAdapter::map_finish(Some("MAX_TOKENS"), false),
            FinishReason::Length
        );
        assert_eq!(
            GeminiAdapter::map_finish(Some("SAFETY"), false),
            FinishReason::ContentFilter
        );
    }

    #[test]
    fn test_build_request_url_and_auth_header() {
        let payload = ChatPayload {
            model: serde_json::from_value(serde_json::json!({
                "id": "gemini", "modelId": "gemini-2.5-pro", "provider": "google"
            }))
            .unwrap(),
            api_key: "g-key".to_string(),
            endpoint: None,
            messages: vec![Message::user("hi")],
            tools: vec![ToolDefinition::new(
                "enhancedWebSearch",
                "search",
                serde_json::json!({"type": "object", "properties": {"q": {"type": "string"}}}),
            )],
            max_tokens: Some(2048),
            temperature: None,
        };
        let wire = GeminiAdapter.build_request(&payload).unwrap();
        assert!(wire
            .url
            .ends_with("/models/gemini-2.5-pro:streamGenerateContent?alt=sse"));
        assert_eq!(wire.headers[0].0, "x-goog-api-key");
        assert!(wire.body["tools"][0]["functionDeclarations"][0]["name"]
            .as_str()
            .unwrap()
            .contains("enhancedWebSearch"));
        assert_eq!(
            wire.body["toolConfig"]["functionCallingConfig"]["mode"],
            "AUTO"
        );
    }
}
