use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Message Types
// ============================================================================

/// Message role in conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Message in conversation history, provider-agnostic.
///
/// Assistant messages may carry tool calls and, for Google models with
/// thinking enabled, the full list of thought signatures from the response
/// (text-part signatures included) so continuations can replay every one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: Option<String>,

    /// Tool call ID (for tool result messages)
    #[serde(rename = "tool_call_id", default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Tool calls made by the assistant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// ALL thought signatures from a Google response, in original part
    /// order. Signatures belonging to function-call parts also appear in
    /// that call's metadata.
    #[serde(
        rename = "thoughtSignatures",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub thought_signatures: Vec<String>,

    /// Attached input images as data URLs; each adapter re-encodes them
    /// into its own wire shape.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    /// A tool result message answering `tool_call_id`.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: None,
            thought_signatures: Vec::new(),
            images: Vec::new(),
        }
    }

    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_call_id: None,
            tool_calls: None,
            thought_signatures: Vec::new(),
            images: Vec::new(),
        }
    }

    pub fn content_str(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.role {
            Role::System => write!(f, "System: {}", self.content_str()),
            Role::User => write!(f, "User: {}", self.content_str()),
            Role::Assistant => write!(f, "Assistant: {}", self.content_str()),
            Role::Tool => write!(f, "Tool: {}", self.content_str()),
        }
    }
}

// ============================================================================
// Tool Calls
// ============================================================================

/// A tool call in the generic representation.
///
/// `index` preserves the original output position end-to-end; `metadata`
/// carries provider-opaque state that must survive the round-trip through
/// the conversation (Google thought signatures especially).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub index: usize,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: FunctionCall,
    #[serde(default, skip_serializing_if = "ToolCallMetadata::is_empty")]
    pub metadata: ToolCallMetadata,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    /// Raw JSON string, exactly as the provider produced it.
    pub arguments: String,
}

/// Provider-opaque continuation state. Unknown fields from providers land
/// in `extra` and are replayed untouched; nothing here may be stripped
/// during normalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolCallMetadata {
    #[serde(
        rename = "originalFormat",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub original_format: Option<String>,
    #[serde(
        rename = "thoughtSignature",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub thought_signature: Option<String>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ToolCallMetadata {
    pub fn is_empty(&self) -> bool {
        self.original_format.is_none() && self.thought_signature.is_none() && self.extra.is_empty()
    }
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        index: usize,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            index,
            call_type: function_type(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
            metadata: ToolCallMetadata::default(),
        }
    }

    /// Parse the argument JSON; malformed arguments become an error the
    /// caller can feed back to the model.
    pub fn parsed_arguments(&self) -> Result<serde_json::Value, serde_json::Error> {
        if self.function.arguments.trim().is_empty() {
            return Ok(serde_json::json!({}));
        }
        serde_json::from_str(&self.function.arguments)
    }
}

// ============================================================================
// Tool Definitions
// ============================================================================

/// Tool definition handed to the normalizers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments.
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

// ============================================================================
// Stream Events
// ============================================================================

/// Provider-agnostic streaming event, produced by every adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Text content delta
    ContentDelta { text: String },

    /// Partial tool call, keyed by output index
    ToolCallDelta {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        args_delta: Option<String>,
    },

    /// A tool call is fully assembled. Empty `id`/`name` mean "keep the
    /// values earlier deltas supplied".
    ToolCallComplete {
        index: usize,
        id: String,
        name: String,
        args: String,
        metadata: ToolCallMetadata,
    },

    /// A provider-opaque reasoning signature attached to a non-call part;
    /// must be replayed on the continuation's text part.
    ThoughtSignature { signature: String },

    /// A generated image (full object, not a delta)
    Image { mime_type: String, b64: String },

    /// Generation finished
    Finish {
        reason: FinishReason,
        usage: Option<Usage>,
    },

    /// A mid-stream provider error
    StreamError {
        category: ErrorCategory,
        message: String,
    },
}

/// Reason why generation finished
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    ContentFilter,
    /// The loop paused on an `ask_user` clarification
    Clarification,
    Error,
    #[serde(untagged)]
    Other(String),
}

/// Token usage statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(rename = "promptTokens")]
    pub prompt_tokens: u32,
    #[serde(rename = "completionTokens")]
    pub completion_tokens: u32,
    #[serde(rename = "cachedTokens", default)]
    pub cached_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.cached_tokens += other.cached_tokens;
    }
}

/// A fully parsed (non-delta) provider response.
#[derive(Debug, Clone, Default)]
pub struct ProviderResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub thought_signatures: Vec<String>,
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<Usage>,
    /// (mime type, base64 data) pairs
    pub images: Vec<(String, String)>,
}

impl ProviderResponse {
    /// Fold the parsed response into a generic assistant message.
    pub fn into_assistant_message(self) -> Message {
        Message {
            role: Role::Assistant,
            content: self.content,
            tool_call_id: None,
            tool_calls: if self.tool_calls.is_empty() {
                None
            } else {
                Some(self.tool_calls)
            },
            thought_signatures: self.thought_signatures,
            images: Vec::new(),
        }
    }
}

// ============================================================================
// Helper: Tool Call Assembler
// ============================================================================

/// Assembles parallel tool calls from streamed deltas, keyed by output
/// index so ordering survives end-to-end.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    calls: BTreeMap<usize, PartialToolCall>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
    /// Set once a complete event supplied authoritative values.
    finalized: bool,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Process a tool call delta for `index`. Fragments are concatenated in
    /// arrival order.
    pub fn process_delta(
        &mut self,
        index: usize,
        id: Option<String>,
        name: Option<String>,
        args_delta: Option<String>,
    ) {
        let call = self.calls.entry(index).or_default();
        if call.finalized {
            return;
        }
        if let Some(id) = id {
            call.id = Some(id);
        }
        if let Some(name) = name {
            call.name = Some(name);
        }
        if let Some(delta) = args_delta {
            call.arguments.push_str(&delta);
        }
    }

    /// A "done"-style event with the authoritative name and complete
    /// argument string; overwrites whatever was accumulated.
    pub fn complete(
        &mut self,
        index: usize,
        id: Option<String>,
        name: Option<String>,
        args: String,
    ) {
        let call = self.calls.entry(index).or_default();
        if let Some(id) = id {
            call.id = Some(id);
        }
        if let Some(name) = name {
            call.name = Some(name);
        }
        call.arguments = args;
        call.finalized = true;
    }

    /// Drain all assembled calls in index order.
    pub fn into_tool_calls(self) -> Vec<ToolCall> {
        self.calls
            .into_iter()
            .map(|(index, partial)| ToolCall {
                id: partial
                    .id
                    .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple())),
                index,
                call_type: function_type(),
                function: FunctionCall {
                    name: partial.name.unwrap_or_default(),
                    arguments: partial.arguments,
                },
                metadata: ToolCallMetadata::default(),
            })
            .collect()
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Category used for mid-stream error events and client envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    Auth,
    RateLimit,
    ContentFilter,
    BadRequest,
    ProviderUnavailable,
    Network,
    Parse,
    Cancelled,
    Unknown,
}

/// Provider error types
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limit exceeded: {message}")]
    RateLimited {
        message: String,
        /// Seconds from the provider's Retry-After, when present
        retry_after: Option<u64>,
    },

    #[error("content filtered: {0}")]
    ContentFilter(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("request cancelled")]
    Cancelled,

    #[error("API error: {0}")]
    Api(String),
}

impl ProviderError {
    /// Map an HTTP error status + body into a category the orchestrator can
    /// act on. The provider's message is preserved in the envelope.
    pub fn from_status(status: u16, body: &str, retry_after: Option<u64>) -> Self {
        let message = if body.trim().is_empty() {
            format!("HTTP {}", status)
        } else {
            format!("HTTP {}: {}", status, body.trim())
        };
        match status {
            401 | 403 => ProviderError::Auth(message),
            429 => ProviderError::RateLimited {
                message,
                retry_after,
            },
            400 | 404 | 422 => ProviderError::BadRequest(message),
            500..=599 => ProviderError::Unavailable(message),
            _ => ProviderError::Api(message),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ProviderError::Auth(_) => ErrorCategory::Auth,
            ProviderError::RateLimited { .. } => ErrorCategory::RateLimit,
            ProviderError::ContentFilter(_) => ErrorCategory::ContentFilter,
            ProviderError::BadRequest(_) => ErrorCategory::BadRequest,
            ProviderError::Unavailable(_) => ErrorCategory::ProviderUnavailable,
            ProviderError::Network(_) => ErrorCategory::Network,
            ProviderError::Json(_) => ErrorCategory::Parse,
            ProviderError::Cancelled => ErrorCategory::Cancelled,
            ProviderError::Api(_) => ErrorCategory::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assembler_concatenates_fragments_in_order() {
        let mut assembler = ToolCallAssembler::new();
        assembler.process_delta(
            0,
            Some("call_1".into()),
            Some("get_weather".into()),
            Some(r#"{"city": "#.into()),
        );
        assembler.process_delta(0, None, None, Some(r#""Tokyo"}"#.into()));

        let calls = assembler.into_tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].function.name, "get_weather");
        assert_eq!(calls[0].parsed_arguments().unwrap()["city"], "Tokyo");
    }

    #[test]
    fn test_assembler_preserves_index_order() {
        let mut assembler = ToolCallAssembler::new();
        assembler.process_delta(1, Some("b".into()), Some("second".into()), Some("{}".into()));
        assembler.process_delta(0, Some("a".into()), Some("first".into()), Some("{}".into()));

        let calls = assembler.into_tool_calls();
        assert_eq!(calls[0].index, 0);
        assert_eq!(calls[0].function.name, "first");
        assert_eq!(calls[1].index, 1);
        assert_eq!(calls[1].function.name, "second");
    }

    #[test]
    fn test_complete_overrides_accumulated_arguments() {
        let mut assembler = ToolCallAssembler::new();
        assembler.process_delta(0, Some("c1".into()), None, Some(r#"{"ur"#.into()));
        assembler.complete(
            0,
            None,
            Some("webContentExtractor".into()),
            r#"{"url":"https://example.com"}"#.into(),
        );
        // A straggler after completion must not corrupt the call.
        assembler.process_delta(0, None, None, Some("garbage".into()));

        let calls = assembler.into_tool_calls();
        assert_eq!(
            calls[0].function.arguments,
            r#"{"url":"https://example.com"}"#
        );
        assert_eq!(calls[0].function.name, "webContentExtractor");
    }

    #[test]
    fn test_metadata_survives_serde_roundtrip() {
        let mut call = ToolCall::new("c1", 0, "search", r#"{"q":"x"}"#);
        call.metadata.thought_signature = Some("SIG_A".to_string());
        call.metadata.original_format = Some("google".to_string());
        call.metadata
            .extra
            .insert("futureField".to_string(), serde_json::json!({"a": 1}));

        let json = serde_json::to_string(&call).unwrap();
        let back: ToolCall = serde_json::from_str(&json).unwrap();
        assert_eq!(back, call);
        assert_eq!(back.metadata.thought_signature.as_deref(), Some("SIG_A"));
        assert_eq!(back.metadata.extra["futureField"]["a"], 1);
    }

    #[test]
    fn test_empty_arguments_parse_as_object() {
        let call = ToolCall::new("c1", 0, "noop", "");
        assert_eq!(call.parsed_arguments().unwrap(), serde_json::json!({}));
    }

    #[test]
    fn test_error_status_classification() {
        assert_eq!(
            ProviderError::from_status(401, "bad key", None).category(),
            ErrorCategory::Auth
        );
        assert_eq!(
            ProviderError::from_status(429, "slow down", Some(30)).category(),
            ErrorCategory::RateLimit
        );
        assert_eq!(
            ProviderError::from_status(503, "overloaded", None).category(),
            ErrorCategory::ProviderUnavailable
        );
        assert_eq!(
            ProviderError::from_status(400, "bad schema", None).category(),
            ErrorCategory::BadRequest
        );
    }

    #[test]
    fn test_retry_after_preserved() {
        match ProviderError::from_status(429, "", Some(12)) {
            ProviderError::RateLimited { retry_after, .. } => assert_eq!(retry_after, Some(12)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_assistant_message_from_response() {
        let response = ProviderResponse {
            content: Some("thinking done".to_string()),
            tool_calls: vec![ToolCall::new("c1", 0, "search", "{}")],
            thought_signatures: vec!["SIG_B".to_string(), "SIG_A".to_string()],
            finish_reason: Some(FinishReason::ToolCalls),
            usage: None,
            images: Vec::new(),
        };
        let message = response.into_assistant_message();
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.thought_signatures.len(), 2);
        assert_eq!(message.tool_calls.as_ref().unwrap().len(), 1);
    }
}
