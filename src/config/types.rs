//! Struct definitions and serde defaults for gateway configuration.
//!
//! Everything here deserializes from pretty-printed JSON under `contents/`
//! (with `defaults/` fallbacks). Fields use serde defaults so a partial
//! file still loads; unknown fields are preserved where providers may need
//! them later.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Language-keyed text with an `en` fallback.
pub type Localized = HashMap<String, String>;

/// Resolve a localized string for `lang`, falling back to `en`, then to any
/// entry at all.
pub fn localize<'a>(text: &'a Localized, lang: &str) -> &'a str {
    text.get(lang)
        .or_else(|| text.get("en"))
        .or_else(|| text.values().next())
        .map(|s| s.as_str())
        .unwrap_or("")
}

// ============================================================================
// Apps
// ============================================================================

/// A configured conversation experience: prompt, variables, tool and source
/// bindings, model defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct App {
    pub id: String,
    #[serde(default)]
    pub name: Localized,
    #[serde(default)]
    pub description: Localized,
    /// System prompt template with `{{variable}}` placeholders.
    #[serde(rename = "systemPrompt", default)]
    pub system_prompt: String,
    #[serde(default)]
    pub variables: Vec<AppVariable>,
    /// Empty list means every model the user can see.
    #[serde(rename = "allowedModels", default)]
    pub allowed_models: Vec<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(rename = "preferredModel", default)]
    pub preferred_model: Option<String>,
    #[serde(default)]
    pub settings: AppSettings,
    #[serde(rename = "type", default = "default_app_type")]
    pub app_type: AppType,
    /// Seed an initial empty user turn so the model speaks first.
    #[serde(rename = "autoStart", default)]
    pub auto_start: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppType {
    Chat,
    Redirect,
    Iframe,
}

fn default_app_type() -> AppType {
    AppType::Chat
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppVariable {
    pub name: String,
    #[serde(rename = "type", default = "default_variable_type")]
    pub var_type: String,
    #[serde(default)]
    pub required: bool,
    /// When set, submitted values must be one of these.
    #[serde(rename = "predefinedValues", default)]
    pub predefined_values: Vec<String>,
    #[serde(rename = "defaultValue", default)]
    pub default_value: Option<String>,
}

fn default_variable_type() -> String {
    "string".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default)]
    pub model: ModelSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Capability filter: every entry must match the model's flag,
    /// e.g. `{"supportsImageGeneration": true}`.
    #[serde(default)]
    pub filter: HashMap<String, bool>,
}

// ============================================================================
// Models
// ============================================================================

/// A configured LLM endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    #[serde(default)]
    pub name: Localized,
    #[serde(default)]
    pub description: Localized,
    /// Wire name sent to the provider.
    #[serde(rename = "modelId")]
    pub model_id: String,
    pub provider: ProviderKind,
    /// May contain `${VAR}` environment placeholders.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(rename = "tokenLimit", default = "default_token_limit")]
    pub token_limit: u32,
    #[serde(rename = "supportsTools", default)]
    pub supports_tools: bool,
    #[serde(rename = "supportsImages", default)]
    pub supports_images: bool,
    #[serde(rename = "supportsImageGeneration", default)]
    pub supports_image_generation: bool,
    #[serde(rename = "default", default)]
    pub is_default: bool,
    /// Encrypted at rest; never serialized to non-admin views.
    #[serde(rename = "apiKey", default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<ModelHint>,
}

fn default_token_limit() -> u32 {
    8192
}

impl Model {
    /// Capability flag lookup used by the app model filter.
    pub fn capability(&self, name: &str) -> Option<bool> {
        match name {
            "supportsTools" => Some(self.supports_tools),
            "supportsImages" => Some(self.supports_images),
            "supportsImageGeneration" => Some(self.supports_image_generation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "openai-responses")]
    OpenAiResponses,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "google")]
    Google,
    #[serde(rename = "mistral")]
    Mistral,
    #[serde(rename = "local")]
    Local,
    #[serde(rename = "iassistant")]
    IAssistant,
    #[serde(rename = "azure-image")]
    AzureImage,
}

impl ProviderKind {
    /// Uppercased name used for `<PROVIDER>_API_KEY` lookups.
    pub fn env_name(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi | ProviderKind::OpenAiResponses => "OPENAI",
            ProviderKind::Anthropic => "ANTHROPIC",
            ProviderKind::Google => "GOOGLE",
            ProviderKind::Mistral => "MISTRAL",
            ProviderKind::Local => "LOCAL",
            ProviderKind::IAssistant => "IASSISTANT",
            ProviderKind::AzureImage => "AZURE_OPENAI",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::OpenAiResponses => "openai-responses",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Google => "google",
            ProviderKind::Mistral => "mistral",
            ProviderKind::Local => "local",
            ProviderKind::IAssistant => "iassistant",
            ProviderKind::AzureImage => "azure-image",
        };
        f.write_str(name)
    }
}

/// An operator notice attached to a model. An `alert` disables client input
/// until acknowledged; the server only carries the field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelHint {
    pub level: HintLevel,
    #[serde(default)]
    pub dismissible: bool,
    #[serde(default)]
    pub message: Localized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HintLevel {
    Hint,
    Info,
    Warning,
    Alert,
}

// ============================================================================
// Tools
// ============================================================================

/// Tool definition as configured on disk. A tool either names a single
/// script or carries a `functions` map; the registry expands the latter
/// into one virtual tool per function (`parent.function`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub id: String,
    #[serde(default)]
    pub name: Localized,
    #[serde(default)]
    pub description: Localized,
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub functions: Option<HashMap<String, ToolFunction>>,
    /// JSON Schema for the arguments.
    #[serde(default = "default_parameters")]
    pub parameters: serde_json::Value,
    /// Max concurrent executions per chat.
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// Provider-native tool (e.g. Google Search grounding) passed through
    /// instead of executed locally.
    #[serde(default)]
    pub provider: Option<ProviderKind>,
    #[serde(rename = "isSpecialTool", default)]
    pub is_special_tool: bool,
    /// The tool pauses the loop for user input (`ask_user`).
    #[serde(rename = "requiresUserInput", default)]
    pub requires_user_input: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolFunction {
    #[serde(default)]
    pub description: Localized,
    #[serde(default = "default_parameters")]
    pub parameters: serde_json::Value,
}

pub(crate) fn default_parameters() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

// ============================================================================
// Sources
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    #[serde(rename = "exposeAs", default = "default_expose_as")]
    pub expose_as: ExposeAs,
    /// Handler-specific configuration.
    #[serde(default)]
    pub config: serde_json::Value,
    /// Cache TTL in seconds; `None` means the handler default.
    #[serde(rename = "cacheTtl", default)]
    pub cache_ttl: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Filesystem,
    Url,
    IFinder,
    Page,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExposeAs {
    Prompt,
    Tool,
}

fn default_expose_as() -> ExposeAs {
    ExposeAs::Prompt
}

// ============================================================================
// Groups and users
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub permissions: GroupPermissions,
    /// Parent groups whose permissions this group absorbs. The graph must
    /// be acyclic; cycles are dropped at the repeat edge with a warning.
    #[serde(default)]
    pub inherits: Vec<String>,
    /// External (identity provider) group names mapping onto this group.
    #[serde(default)]
    pub mappings: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupPermissions {
    /// App ids, or `["*"]` for all.
    #[serde(default)]
    pub apps: Vec<String>,
    #[serde(default)]
    pub prompts: Vec<String>,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(rename = "adminAccess", default)]
    pub admin_access: bool,
}

/// A resolved user for the duration of one request. Constructed from the
/// identity layer's token; never persisted except the first-login audit
/// append to users.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Internal group ids after mapping.
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub authenticated: bool,
    #[serde(rename = "authMethod", default)]
    pub auth_method: Option<String>,
    /// Raw LDAP group names kept for persistence re-mapping.
    #[serde(rename = "extractedGroups", default)]
    pub extracted_groups: Vec<String>,
}

impl User {
    /// The anonymous pseudo-user every unauthenticated request resolves to.
    pub fn anonymous() -> Self {
        Self {
            id: "anonymous".to_string(),
            provider: String::new(),
            email: None,
            name: None,
            groups: vec!["anonymous".to_string()],
            authenticated: false,
            auth_method: None,
            extracted_groups: Vec::new(),
        }
    }
}

// ============================================================================
// Platform
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// `anonymous`, `local`, `oidc`, `ntlm`, `proxy`, ...
    #[serde(rename = "authMode", default = "default_auth_mode")]
    pub auth_mode: String,
    /// Per auth method fallback groups when external mapping yields nothing.
    #[serde(rename = "defaultGroups", default)]
    pub default_groups: HashMap<String, Vec<String>>,
    /// Secret granting admin access, honored only in anonymous mode.
    #[serde(rename = "adminSecret", default)]
    pub admin_secret: Option<String>,
    /// Secret the model API key encryption derives from.
    #[serde(rename = "keySecret", default)]
    pub key_secret: Option<String>,
    #[serde(rename = "refreshSeconds", default)]
    pub refresh_seconds: Option<u64>,
    #[serde(rename = "rateLimits", default)]
    pub rate_limits: HashMap<String, RateLimitOverride>,
    /// Feature switches (`shortlinks`, `usageTracking`, ...); absent means
    /// enabled.
    #[serde(default)]
    pub features: HashMap<String, bool>,
    /// Max tool-loop iterations per request.
    #[serde(rename = "maxToolRounds", default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
}

fn default_auth_mode() -> String {
    "anonymous".to_string()
}

pub(crate) fn default_max_tool_rounds() -> usize {
    10
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            auth_mode: default_auth_mode(),
            default_groups: HashMap::new(),
            admin_secret: None,
            key_secret: None,
            refresh_seconds: None,
            rate_limits: HashMap::new(),
            features: HashMap::new(),
            max_tool_rounds: default_max_tool_rounds(),
        }
    }
}

impl PlatformConfig {
    pub fn feature_enabled(&self, name: &str) -> bool {
        self.features.get(name).copied().unwrap_or(true)
    }
}

/// Partial override of one rate-limit bucket; unset fields keep defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitOverride {
    #[serde(rename = "windowMs", default)]
    pub window_ms: Option<u64>,
    #[serde(default)]
    pub limit: Option<u32>,
}
