//! Chat orchestrator.
//!
//! Resolves a chat request (app, model, tools, sources, variables), then
//! drives the tool loop as an explicit state machine: prepare a provider
//! request, stream it, classify the finish, execute any tool calls, and
//! loop until the model stops, a clarification pauses the conversation,
//! the round cap trips, or the request is cancelled. Events flow out
//! through the per-chat bus; resolution failures surface as typed errors
//! before any streaming starts.

use crate::auth::resolver::permissions_for;
use crate::chat::model_filter::resolve_model;
use crate::chat::session::{CancelToken, SessionRegistry};
use crate::chat::stream::{ChatEvent, ChatEventBus};
use crate::config::cache::{ConfigCache, Snapshot};
use crate::config::types::{App, ExposeAs, Model, SourceConfig, User};
use crate::llm::adapters::{adapter_for, execute, ChatPayload, DEFAULT_REQUEST_TIMEOUT};
use crate::llm::keys::{expand_env_placeholders, resolve_api_key, KeyError};
use crate::llm::provider::{
    FinishReason, Message, ProviderError, Role, StreamEvent, ToolCall, ToolCallAssembler,
    ToolCallMetadata, ToolDefinition, Usage,
};
use crate::sources::handler::SourceContext;
use crate::sources::manager::{substitute_sources, SourceManager, SourceToolExecutor};
use crate::tools;
use crate::tools::ask_user::{self, ASK_USER_TOOL_ID, MAX_CLARIFICATIONS};
use crate::tools::registry::{ToolContext, ToolRegistry, ToolSpec};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatOptions {
    /// Extra tool ids unioned with the app's bindings.
    #[serde(default)]
    pub tools: Option<Vec<String>>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(rename = "maxTokens", default)]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(rename = "chatId")]
    pub chat_id: String,
    #[serde(rename = "appId")]
    pub app_id: String,
    #[serde(rename = "modelId", default)]
    pub model_id: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
    /// Full conversation history as the client holds it.
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    #[serde(default)]
    pub options: ChatOptions,
}

fn default_language() -> String {
    "en".to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("app '{0}' not found")]
    AppNotFound(String),

    #[error("access to app '{0}' denied")]
    Forbidden(String),

    #[error("no compatible model for app '{0}'")]
    NoCompatibleModel(String),

    #[error("variable '{0}' is required")]
    MissingVariable(String),

    #[error("variable '{name}' does not accept '{value}'")]
    InvalidVariable { name: String, value: String },

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

pub struct ChatOrchestrator {
    cache: Arc<ConfigCache>,
    sources: Arc<SourceManager>,
    pub sessions: Arc<SessionRegistry>,
    pub bus: Arc<ChatEventBus>,
    usage: Option<Arc<crate::storage::UsageTracker>>,
    client: reqwest::Client,
}

impl ChatOrchestrator {
    pub fn new(
        cache: Arc<ConfigCache>,
        sources: Arc<SourceManager>,
        sessions: Arc<SessionRegistry>,
        bus: Arc<ChatEventBus>,
        usage: Option<Arc<crate::storage::UsageTracker>>,
    ) -> Self {
        Self {
            cache,
            sources,
            sessions,
            bus,
            usage,
            client: reqwest::Client::new(),
        }
    }

    /// Is a request currently live for this chat?
    pub fn is_live(&self, chat_id: &str) -> bool {
        self.sessions.is_live(chat_id)
    }

    /// Cancel the live request for this chat, if any.
    pub fn stop(&self, chat_id: &str) -> bool {
        self.sessions.cancel(chat_id)
    }

    /// Run one chat request to completion, publishing events on the bus.
    ///
    /// Resolution failures return before anything streams; once streaming
    /// has begun, provider failures end the stream with an error event
    /// and the call still returns `Ok`. The chat's event channel is closed
    /// on every exit path so subscribers never hang.
    pub async fn handle(&self, request: ChatRequest, user: User) -> Result<(), ChatError> {
        let chat_id = request.chat_id.clone();
        let result = self.handle_inner(request, user).await;
        if let Err(err) = &result {
            log::warn!("chat {}: {}", chat_id, err);
        }
        self.bus.close(&chat_id);
        result
    }

    async fn handle_inner(&self, request: ChatRequest, user: User) -> Result<(), ChatError> {
        let snapshot = self.cache.snapshot();

        let app = snapshot
            .app(&request.app_id)
            .cloned()
            .ok_or_else(|| ChatError::AppNotFound(request.app_id.clone()))?;

        let perms = permissions_for(&snapshot.groups, &user);
        if !perms.allows_app(&app.id) {
            return Err(ChatError::Forbidden(app.id.clone()));
        }

        let permitted: Vec<Model> = snapshot
            .models
            .iter()
            .filter(|m| perms.allows_model(&m.id))
            .cloned()
            .collect();
        let model = resolve_model(&permitted, &app, request.model_id.as_deref())
            .cloned()
            .ok_or_else(|| ChatError::NoCompatibleModel(app.id.clone()))?;

        let system_prompt = self
            .render_system_prompt(&app, &request, &user, &snapshot)
            .await?;

        let (registry, tool_defs) = self.prepare_tools(&app, &request, &model, &snapshot);

        // Assemble the conversation: server-rendered system prompt first,
        // then the client history minus any system turns it carried.
        let mut messages = vec![Message::system(system_prompt)];
        let mut incoming: Vec<Message> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .cloned()
            .collect();

        // Resuming from a clarification: the latest user message IS the
        // pending tool call's result.
        if let Some(pending) = self.sessions.take_pending_clarification(&request.chat_id) {
            if let Some(last) = incoming.last_mut() {
                if last.role == Role::User {
                    *last = Message::tool_result(pending, last.content_str().to_string());
                }
            }
        }

        if incoming.is_empty() && app.auto_start {
            incoming.push(Message::user(String::new()));
        }
        messages.extend(incoming);

        let (request_id, cancel) = self.sessions.begin(&request.chat_id);
        let result = self
            .run_loop(&request, &user, &snapshot, &app, &model, registry, tool_defs, messages, cancel)
            .await;
        self.sessions.finish(&request.chat_id, request_id);
        result
    }

    /// Render the app's system prompt: `{{variable}}` substitution plus
    /// inlined prompt sources.
    async fn render_system_prompt(
        &self,
        app: &App,
        request: &ChatRequest,
        user: &User,
        snapshot: &Snapshot,
    ) -> Result<String, ChatError> {
        let mut prompt = app.system_prompt.clone();

        for variable in &app.variables {
            let value = request
                .variables
                .get(&variable.name)
                .cloned()
                .or_else(|| variable.default_value.clone());

            let value = match value {
                Some(value) => value,
                None if variable.required => {
                    return Err(ChatError::MissingVariable(variable.name.clone()))
                }
                None => String::new(),
            };

            if !variable.predefined_values.is_empty()
                && !variable.predefined_values.contains(&value)
            {
                return Err(ChatError::InvalidVariable {
                    name: variable.name.clone(),
                    value,
                });
            }

            prompt = prompt.replace(&format!("{{{{{}}}}}", variable.name), &value);
        }

        let prompt_sources: Vec<SourceConfig> = app
            .sources
            .iter()
            .filter_map(|id| snapshot.source(id).cloned())
            .filter(|s| s.expose_as == ExposeAs::Prompt)
            .collect();

        if !prompt_sources.is_empty() {
            let ctx = SourceContext::for_user(user.clone(), request.language.clone());
            let (combined, by_id) = self.sources.load_prompt_sources(&prompt_sources, &ctx).await;
            prompt = substitute_sources(&prompt, &combined, &by_id);
        }

        Ok(prompt)
    }

    /// Build the per-request tool registry and the wire definitions:
    /// app tools unioned with request overrides, gated on the model's
    /// tool support, plus synthetic tools for `exposeAs=tool` sources and
    /// the built-in clarification tool.
    fn prepare_tools(
        &self,
        app: &App,
        request: &ChatRequest,
        model: &Model,
        snapshot: &Snapshot,
    ) -> (ToolRegistry, Vec<ToolDefinition>) {
        let mut registry = ToolRegistry::from_configs(&snapshot.tools, &request.language);
        tools::register_builtins(&mut registry);

        let mut tool_ids = app.tools.clone();
        if let Some(extra) = &request.options.tools {
            for id in extra {
                if !tool_ids.contains(id) {
                    tool_ids.push(id.clone());
                }
            }
        }

        let tool_sources: Vec<SourceConfig> = app
            .sources
            .iter()
            .filter_map(|id| snapshot.source(id).cloned())
            .filter(|s| s.expose_as == ExposeAs::Tool)
            .collect();

        if !model.supports_tools {
            if !tool_ids.is_empty() || !tool_sources.is_empty() {
                log::info!(
                    "model '{}' does not support tools; app '{}' bindings are dropped for this request",
                    model.id,
                    app.id
                );
            }
            return (registry, Vec::new());
        }

        let mut defs = registry.definitions_for(&tool_ids);

        if !tool_sources.is_empty() {
            let executor = Arc::new(SourceToolExecutor::new(
                self.sources.clone(),
                tool_sources.clone(),
            ));
            for source in &tool_sources {
                let def = SourceManager::tool_definition(source);
                registry.add_spec(ToolSpec {
                    id: def.name.clone(),
                    parent_id: def.name.clone(),
                    function: def.name.clone(),
                    description: def.description.clone(),
                    parameters: def.parameters.clone(),
                    concurrency: Some(2),
                    requires_user_input: false,
                    provider: None,
                });
                registry.register_executor(def.name.clone(), executor.clone());
                defs.push(def);
            }
        }

        // Clarifications are available wherever any tool is.
        if !defs.is_empty() && !defs.iter().any(|d| d.name == ASK_USER_TOOL_ID) {
            defs.push(ToolDefinition::new(
                ASK_USER_TOOL_ID,
                ask_user::description(),
                ask_user::parameters(),
            ));
        }

        (registry, defs)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_loop(
        &self,
        request: &ChatRequest,
        user: &User,
        snapshot: &Snapshot,
        app: &App,
        model: &Model,
        registry: ToolRegistry,
        tool_defs: Vec<ToolDefinition>,
        mut messages: Vec<Message>,
        mut cancel: CancelToken,
    ) -> Result<(), ChatError> {
        let chat_id = &request.chat_id;
        let adapter = adapter_for(model.provider);
        let api_key = resolve_api_key(model, &snapshot.platform)?;
        let endpoint = match &model.url {
            Some(url) => Some(expand_env_placeholders(url)?),
            None => None,
        };
        let max_rounds = snapshot.platform.max_tool_rounds;

        let mut tool_ctx = ToolContext::new(user.clone(), chat_id.clone(), request.language.clone());
        tool_ctx.actions = Some(crate::chat::stream::ActionSink::new(
            self.bus.clone(),
            chat_id.clone(),
        ));

        let mut total_usage = Usage::default();
        let mut rounds = 0usize;

        loop {
            let payload = ChatPayload {
                model: model.clone(),
                api_key: api_key.clone(),
                endpoint: endpoint.clone(),
                messages: messages.clone(),
                tools: tool_defs.clone(),
                max_tokens: request.options.max_tokens,
                temperature: request.options.temperature,
            };

            let mut stream =
                match execute(&self.client, adapter, &payload, DEFAULT_REQUEST_TIMEOUT).await {
                    Ok(stream) => stream,
                    Err(err) => {
                        self.publish_error(chat_id, &err);
                        return Ok(());
                    }
                };

            // -------- stream one provider turn --------
            let mut assembler = ToolCallAssembler::new();
            let mut metadata_by_index: BTreeMap<usize, ToolCallMetadata> = BTreeMap::new();
            let mut content = String::new();
            let mut text_signatures: Vec<String> = Vec::new();
            let mut finish: Option<(FinishReason, Option<Usage>)> = None;

            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => {
                        // Dropping the stream aborts the provider request.
                        drop(stream);
                        self.bus.publish(chat_id, ChatEvent::Cancelled);
                        return Ok(());
                    }
                    next = stream.next() => next,
                };

                let Some(event) = next else { break };
                match event {
                    Ok(StreamEvent::ContentDelta { text }) => {
                        content.push_str(&text);
                        self.bus.publish(chat_id, ChatEvent::Content { text });
                    }
                    Ok(StreamEvent::ToolCallDelta {
                        index,
                        id,
                        name,
                        args_delta,
                    }) => {
                        assembler.process_delta(index, id, name, args_delta);
                    }
                    Ok(StreamEvent::ToolCallComplete {
                        index,
                        id,
                        name,
                        args,
                        metadata,
                    }) => {
                        let id = if id.is_empty() { None } else { Some(id) };
                        let name = if name.is_empty() { None } else { Some(name) };
                        assembler.complete(index, id, name, args);
                        if !metadata.is_empty() {
                            metadata_by_index.insert(index, metadata);
                        }
                    }
                    Ok(StreamEvent::ThoughtSignature { signature }) => {
                        text_signatures.push(signature);
                    }
                    Ok(StreamEvent::Image { mime_type, b64 }) => {
                        self.bus
                            .publish(chat_id, ChatEvent::Image { mime_type, b64 });
                    }
                    Ok(StreamEvent::Finish { reason, usage }) => {
                        finish = Some((reason, usage));
                    }
                    Ok(StreamEvent::StreamError { category, message }) => {
                        self.bus
                            .publish(chat_id, ChatEvent::Error { category, message });
                    }
                    Err(err) => {
                        self.publish_error(chat_id, &err);
                        return Ok(());
                    }
                }
            }

            let (finish_reason, usage) = finish.unwrap_or((FinishReason::Stop, None));
            if let Some(usage) = usage {
                total_usage.add(&usage);
            }

            let mut tool_calls = assembler.into_tool_calls();
            for call in &mut tool_calls {
                if let Some(metadata) = metadata_by_index.remove(&call.index) {
                    call.metadata = metadata;
                }
            }

            // -------- classify the finish --------
            if finish_reason != FinishReason::ToolCalls || tool_calls.is_empty() {
                if !content.is_empty() {
                    messages.push(Message::assistant(content));
                }
                self.record_usage(app, model, user, &total_usage);
                self.bus.publish(
                    chat_id,
                    ChatEvent::Done {
                        finish_reason,
                        usage: Some(total_usage),
                        messages,
                    },
                );
                return Ok(());
            }

            // -------- tool round --------
            for call in &tool_calls {
                self.bus.publish(
                    chat_id,
                    ChatEvent::ToolCall {
                        id: call.id.clone(),
                        name: call.function.name.clone(),
                    },
                );
            }

            // Assistant message carries the calls AND every signature so
            // continuations replay provider reasoning state exactly.
            let mut signatures = text_signatures.clone();
            signatures.extend(
                tool_calls
                    .iter()
                    .filter_map(|c| c.metadata.thought_signature.clone()),
            );
            messages.push(Message {
                role: Role::Assistant,
                content: if content.is_empty() {
                    None
                } else {
                    Some(content.clone())
                },
                tool_call_id: None,
                tool_calls: Some(tool_calls.clone()),
                thought_signatures: signatures,
                images: Vec::new(),
            });

            rounds += 1;
            if rounds > max_rounds {
                self.bus.publish(
                    chat_id,
                    ChatEvent::Warning {
                        message: format!(
                            "tool loop stopped after {} rounds; answering with what is known",
                            max_rounds
                        ),
                    },
                );
                self.record_usage(app, model, user, &total_usage);
                self.bus.publish(
                    chat_id,
                    ChatEvent::Done {
                        finish_reason: FinishReason::Stop,
                        usage: Some(total_usage),
                        messages,
                    },
                );
                return Ok(());
            }

            // ask_user pauses the loop; everything else executes.
            let mut precomputed: HashMap<String, String> = HashMap::new();
            let mut to_execute: Vec<&ToolCall> = Vec::new();

            for call in &tool_calls {
                if call.function.name != ASK_USER_TOOL_ID {
                    to_execute.push(call);
                    continue;
                }

                if self.sessions.clarifications_used(chat_id) >= MAX_CLARIFICATIONS {
                    // The model gets an error result, the user never sees
                    // an eleventh question.
                    precomputed.insert(
                        call.id.clone(),
                        json!({
                            "error": "clarification limit reached; continue with your best judgement"
                        })
                        .to_string(),
                    );
                    continue;
                }

                let validated = call
                    .parsed_arguments()
                    .map_err(|err| err.to_string())
                    .and_then(|args| ask_user::validate(&args));

                match validated {
                    Ok(clarification) => {
                        self.sessions.note_clarification(chat_id, &call.id);
                        self.bus.publish(
                            chat_id,
                            ChatEvent::Clarification {
                                tool_call_id: call.id.clone(),
                                request: clarification,
                            },
                        );
                        self.bus.publish(
                            chat_id,
                            ChatEvent::Done {
                                finish_reason: FinishReason::Clarification,
                                usage: Some(total_usage),
                                messages,
                            },
                        );
                        return Ok(());
                    }
                    Err(reason) => {
                        precomputed.insert(
                            call.id.clone(),
                            json!({ "error": reason }).to_string(),
                        );
                    }
                }
            }

            // Execute concurrently; per-tool caps queue inside the
            // registry. join_all keeps input order, which is index order.
            let executions = futures::future::join_all(
                to_execute.iter().map(|call| registry.execute(call, &tool_ctx)),
            );
            let outcomes = tokio::select! {
                _ = cancel.cancelled() => {
                    self.bus.publish(chat_id, ChatEvent::Cancelled);
                    return Ok(());
                }
                outcomes = executions => outcomes,
            };

            let mut results_by_id: HashMap<String, String> = precomputed;
            for outcome in outcomes {
                results_by_id.insert(outcome.tool_call_id.clone(), outcome.content);
            }

            // One tool message per call, re-ordered to the original
            // tool-call index.
            for call in &tool_calls {
                let result = results_by_id
                    .remove(&call.id)
                    .unwrap_or_else(|| json!({"error": "tool produced no result"}).to_string());
                messages.push(Message::tool_result(call.id.clone(), result));
            }
        }
    }

    fn publish_error(&self, chat_id: &str, err: &ProviderError) {
        log::error!("chat {}: provider error: {}", chat_id, err);
        self.bus.publish(
            chat_id,
            ChatEvent::Error {
                category: err.category(),
                message: err.to_string(),
            },
        );
        self.bus.publish(
            chat_id,
            ChatEvent::Done {
                finish_reason: FinishReason::Error,
                usage: None,
                messages: Vec::new(),
            },
        );
    }

    fn record_usage(&self, app: &App, model: &Model, user: &User, usage: &Usage) {
        if let Some(tracker) = &self.usage {
            tracker.record(&app.id, &model.id, &user.id, usage);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::store::ContentStore;
    use std::fs;

    fn orchestrator(contents: &std::path::Path) -> ChatOrchestrator {
        let store = Arc::new(ContentStore::new(
            contents.to_path_buf(),
            contents.parent().unwrap().join("defaults"),
        ));
        let cache = Arc::new(ConfigCache::load(store.clone()));
        let sources = Arc::new(SourceManager::new(store, contents.join("sources-data")));
        ChatOrchestrator::new(
            cache,
            sources,
            Arc::new(SessionRegistry::new()),
            Arc::new(ChatEventBus::new()),
            None,
        )
    }

    fn seed(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let contents = dir.path().join("contents");
        fs::create_dir_all(contents.join("apps")).unwrap();
        fs::create_dir_all(contents.join("models")).unwrap();
        fs::create_dir_all(contents.join("config")).unwrap();
        fs::write(
            contents.join("apps/chat.json"),
            r#"{
                "id": "chat",
                "systemPrompt": "You are {{persona}}.",
                "variables": [{"name": "persona", "required": true}]
            }"#,
        )
        .unwrap();
        fs::write(
            contents.join("models/gpt-4o.json"),
            r#"{"id": "gpt-4o", "modelId": "gpt-4o", "provider": "openai", "supportsTools": true}"#,
        )
        .unwrap();
        fs::write(
            contents.join("config/groups.json"),
            r#"[{"id": "anonymous", "permissions": {"apps": ["*"], "models": ["*"]}}]"#,
        )
        .unwrap();
        contents
    }

    fn request(raw: serde_json::Value) -> ChatRequest {
        serde_json::from_value(raw).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_app_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(&seed(&dir));
        let result = orchestrator
            .handle(
                request(serde_json::json!({"chatId": "c1", "appId": "ghost"})),
                User::anonymous(),
            )
            .await;
        assert!(matches!(result, Err(ChatError::AppNotFound(_))));
    }

    #[tokio::test]
    async fn test_missing_required_variable_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(&seed(&dir));
        let result = orchestrator
            .handle(
                request(serde_json::json!({
                    "chatId": "c1",
                    "appId": "chat",
                    "messages": [{"role": "user", "content": "hi"}]
                })),
                User::anonymous(),
            )
            .await;
        assert!(matches!(result, Err(ChatError::MissingVariable(_))));
    }

    #[tokio::test]
    async fn test_unpermitted_app_is_forbidden() {
        let dir = tempfile::tempdir().unwrap();
        let contents = seed(&dir);
        fs::write(
            contents.join("config/groups.json"),
            r#"[{"id": "anonymous", "permissions": {"apps": ["other"], "models": ["*"]}}]"#,
        )
        .unwrap();
        let orchestrator = orchestrator(&contents);
        let result = orchestrator
            .handle(
                request(serde_json::json!({"chatId": "c1", "appId": "chat"})),
                User::anonymous(),
            )
            .await;
        assert!(matches!(result, Err(ChatError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_prepare_tools_adds_ask_user_only_with_other_tools() {
        let dir = tempfile::tempdir().unwrap();
        let contents = seed(&dir);
        fs::write(
            contents.join("apps/helper.json"),
            r#"{"id": "helper", "systemPrompt": "x", "tools": ["webFetch"]}"#,
        )
        .unwrap();
        let orchestrator = orchestrator(&contents);
        let snapshot = orchestrator.cache.snapshot();

        let model = snapshot.model("gpt-4o").unwrap().clone();

        let plain = snapshot.app("chat").unwrap().clone();
        let req = request(serde_json::json!({"chatId": "c", "appId": "chat"}));
        let (_registry, defs) = orchestrator.prepare_tools(&plain, &req, &model, &snapshot);
        assert!(defs.is_empty());

        let helper = snapshot.app("helper").unwrap().clone();
        let req = request(serde_json::json!({"chatId": "c", "appId": "helper"}));
        let (_registry, defs) = orchestrator.prepare_tools(&helper, &req, &model, &snapshot);
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        assert!(names.contains(&"webFetch"));
        assert!(names.contains(&ASK_USER_TOOL_ID));
    }

    #[tokio::test]
    async fn test_variable_substitution_and_predefined_values() {
        let dir = tempfile::tempdir().unwrap();
        let contents = seed(&dir);
        fs::write(
            contents.join("apps/strict.json"),
            r#"{
                "id": "strict",
                "systemPrompt": "Mode: {{mode}}",
                "variables": [{"name": "mode", "required": true, "predefinedValues": ["fast", "careful"]}]
            }"#,
        )
        .unwrap();
        let orchestrator = orchestrator(&contents);
        let snapshot = orchestrator.cache.snapshot();
        let app = snapshot.app("strict").unwrap().clone();

        let req = request(serde_json::json!({
            "chatId": "c", "appId": "strict", "variables": {"mode": "fast"}
        }));
        let prompt = orchestrator
            .render_system_prompt(&app, &req, &User::anonymous(), &snapshot)
            .await
            .unwrap();
        assert_eq!(prompt, "Mode: fast");

        let req = request(serde_json::json!({
            "chatId": "c", "appId": "strict", "variables": {"mode": "reckless"}
        }));
        let result = orchestrator
            .render_system_prompt(&app, &req, &User::anonymous(), &snapshot)
            .await;
        assert!(matches!(result, Err(ChatError::InvalidVariable { .. })));
    }
}
