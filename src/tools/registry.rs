//! Tool registry.
//!
//! Loads tool configs, expands multi-function tools into one virtual tool
//! per function (`parent.function`), validates arguments against each
//! tool's JSON Schema, and executes calls through registered executors
//! under per-tool concurrency caps. Execution failures become structured
//! tool-error results the model can recover from.

use crate::config::types::{localize, ProviderKind, ToolConfig, User};
use crate::llm::provider::{ToolCall, ToolDefinition};
use crate::tools::schema;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Reserved prefix for synthetic source tools; regular tool ids must not
/// use it.
pub const SOURCE_TOOL_PREFIX: char = '@';

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("tool '{0}' is not registered")]
    NotFound(String),

    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("no executor registered for tool '{0}'")]
    NoExecutor(String),

    #[error("tool execution failed: {0}")]
    Execution(String),

    #[error("tool execution cancelled")]
    Cancelled,
}

/// Context passed to every tool invocation.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub user: User,
    pub chat_id: String,
    pub language: String,
    /// Where long-running tools report progress steps.
    pub actions: Option<crate::chat::stream::ActionSink>,
}

impl ToolContext {
    pub fn new(user: User, chat_id: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            user,
            chat_id: chat_id.into(),
            language: language.into(),
            actions: None,
        }
    }
}

/// Executors back one parent tool; multi-function tools receive the
/// function name they were invoked as.
#[async_trait::async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn invoke(
        &self,
        function: &str,
        args: Value,
        ctx: &ToolContext,
    ) -> Result<Value, ToolError>;
}

/// One callable tool after expansion.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub id: String,
    /// Config id the executor is registered under.
    pub parent_id: String,
    /// Function name within a multi-function tool.
    pub function: String,
    pub description: String,
    pub parameters: Value,
    pub concurrency: Option<usize>,
    pub requires_user_input: bool,
    /// Provider-native tools are passed through, never executed locally.
    pub provider: Option<ProviderKind>,
}

/// Result of one tool execution, ready to become a `tool` message.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub tool_call_id: String,
    pub content: String,
    pub is_error: bool,
}

pub struct ToolRegistry {
    specs: HashMap<String, ToolSpec>,
    executors: HashMap<String, Arc<dyn ToolExecutor>>,
    limits: HashMap<String, Arc<Semaphore>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            specs: HashMap::new(),
            executors: HashMap::new(),
            limits: HashMap::new(),
        }
    }

    /// Build a registry from tool configs, expanding `functions` maps.
    pub fn from_configs(configs: &[ToolConfig], language: &str) -> Self {
        let mut registry = Self::new();

        for config in configs {
            if config.id.starts_with(SOURCE_TOOL_PREFIX) {
                log::warn!(
                    "tool id '{}' uses the reserved source prefix and was skipped",
                    config.id
                );
                continue;
            }

            match &config.functions {
                Some(functions) => {
                    for (name, function) in functions {
                        registry.add_spec(ToolSpec {
                            id: format!("{}.{}", config.id, name),
                            parent_id: config.id.clone(),
                            function: name.clone(),
                            description: localize(&function.description, language).to_string(),
                            parameters: function.parameters.clone(),
                            concurrency: config.concurrency,
                            requires_user_input: config.requires_user_input,
                            provider: config.provider,
                        });
                    }
                }
                None => {
                    registry.add_spec(ToolSpec {
                        id: config.id.clone(),
                        parent_id: config.id.clone(),
                        function: config.id.clone(),
                        description: localize(&config.description, language).to_string(),
                        parameters: config.parameters.clone(),
                        concurrency: config.concurrency,
                        requires_user_input: config.requires_user_input,
                        provider: config.provider,
                    });
                }
            }
        }

        registry
    }

    pub fn add_spec(&mut self, spec: ToolSpec) {
        if let Some(limit) = spec.concurrency {
            self.limits
                .insert(spec.id.clone(), Arc::new(Semaphore::new(limit.max(1))));
        }
        self.specs.insert(spec.id.clone(), spec);
    }

    /// Register the executor backing a parent tool id.
    pub fn register_executor(&mut self, parent_id: impl Into<String>, executor: Arc<dyn ToolExecutor>) {
        self.executors.insert(parent_id.into(), executor);
    }

    pub fn get(&self, id: &str) -> Option<&ToolSpec> {
        self.specs.get(id)
    }

    pub fn has_tool(&self, id: &str) -> bool {
        self.specs.contains_key(id)
    }

    pub fn tool_ids(&self) -> Vec<&str> {
        self.specs.keys().map(String::as_str).collect()
    }

    /// Wire definitions for a set of tool ids, skipping unknown ids with a
    /// warning and provider-native specials (those are injected by the
    /// adapter, not declared as functions).
    pub fn definitions_for(&self, ids: &[String]) -> Vec<ToolDefinition> {
        let mut defs = Vec::new();
        for id in ids {
            match self.specs.get(id) {
                Some(spec) if spec.provider.is_none() => {
                    defs.push(ToolDefinition::new(
                        spec.id.clone(),
                        spec.description.clone(),
                        spec.parameters.clone(),
                    ));
                }
                Some(_) => {}
                None => log::warn!("app references unknown tool '{}'", id),
            }
        }
        defs
    }

    /// Execute one call. Validation failures and executor errors are
    /// folded into a structured error outcome rather than propagated, so
    /// the model can see what went wrong and recover.
    pub async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutcome {
        match self.try_execute(call, ctx).await {
            Ok(value) => ToolOutcome {
                tool_call_id: call.id.clone(),
                content: value.to_string(),
                is_error: false,
            },
            Err(err) => {
                log::warn!(
                    "tool '{}' failed for chat {}: {}",
                    call.function.name,
                    ctx.chat_id,
                    err
                );
                ToolOutcome {
                    tool_call_id: call.id.clone(),
                    content: json!({ "error": err.to_string() }).to_string(),
                    is_error: true,
                }
            }
        }
    }

    async fn try_execute(&self, call: &ToolCall, ctx: &ToolContext) -> Result<Value, ToolError> {
        let spec = self
            .specs
            .get(&call.function.name)
            .ok_or_else(|| ToolError::NotFound(call.function.name.clone()))?;

        let args = call
            .parsed_arguments()
            .map_err(|err| ToolError::InvalidArguments {
                tool: spec.id.clone(),
                reason: format!("arguments are not valid JSON: {}", err),
            })?;

        schema::validate(&args, &spec.parameters).map_err(|reason| {
            ToolError::InvalidArguments {
                tool: spec.id.clone(),
                reason,
            }
        })?;

        let executor = self
            .executors
            .get(&spec.parent_id)
            .ok_or_else(|| ToolError::NoExecutor(spec.id.clone()))?
            .clone();

        // Callers over the cap queue on the semaphore.
        let _permit = match self.limits.get(&spec.id) {
            Some(semaphore) => Some(
                semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| ToolError::Cancelled)?,
            ),
            None => None,
        };

        executor.invoke(&spec.function, args, ctx).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoExecutor;

    #[async_trait::async_trait]
    impl ToolExecutor for EchoExecutor {
        async fn invoke(
            &self,
            function: &str,
            args: Value,
            _ctx: &ToolContext,
        ) -> Result<Value, ToolError> {
            Ok(json!({ "function": function, "args": args }))
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::new(User::anonymous(), "chat-1", "en")
    }

    fn config(raw: Value) -> ToolConfig {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn test_multi_function_expansion() {
        let registry = ToolRegistry::from_configs(
            &[config(json!({
                "id": "browser",
                "functions": {
                    "open": {"parameters": {"type": "object", "properties": {"url": {"type": "string"}}}},
                    "extract": {"parameters": {"type": "object", "properties": {}}}
                }
            }))],
            "en",
        );
        assert!(registry.has_tool("browser.open"));
        assert!(registry.has_tool("browser.extract"));
        assert!(!registry.has_tool("browser"));
        assert_eq!(registry.get("browser.open").unwrap().parent_id, "browser");
    }

    #[test]
    fn test_reserved_prefix_rejected() {
        let registry = ToolRegistry::from_configs(
            &[config(json!({"id": "@sneaky", "parameters": {"type": "object"}}))],
            "en",
        );
        assert!(!registry.has_tool("@sneaky"));
    }

    #[test]
    fn test_definitions_skip_provider_native_tools() {
        let registry = ToolRegistry::from_configs(
            &[
                config(json!({"id": "search", "description": {"en": "Web search"}})),
                config(json!({
                    "id": "googleGrounding",
                    "provider": "google",
                    "isSpecialTool": true
                })),
            ],
            "en",
        );
        let defs = registry
            .definitions_for(&["search".to_string(), "googleGrounding".to_string()]);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "search");
        assert_eq!(defs[0].description, "Web search");
    }

    #[tokio::test]
    async fn test_execute_dispatches_function_name() {
        let mut registry = ToolRegistry::from_configs(
            &[config(json!({
                "id": "browser",
                "functions": {"open": {"parameters": {"type": "object", "properties": {"url": {"type": "string"}}, "required": ["url"]}}}
            }))],
            "en",
        );
        registry.register_executor("browser", Arc::new(EchoExecutor));

        let call = ToolCall::new("c1", 0, "browser.open", r#"{"url":"https://x"}"#);
        let outcome = registry.execute(&call, &ctx()).await;
        assert!(!outcome.is_error);
        let value: Value = serde_json::from_str(&outcome.content).unwrap();
        assert_eq!(value["function"], "open");
        assert_eq!(value["args"]["url"], "https://x");
    }

    #[tokio::test]
    async fn test_schema_violation_becomes_error_outcome() {
        let mut registry = ToolRegistry::from_configs(
            &[config(json!({
                "id": "lookup",
                "parameters": {"type": "object", "properties": {"q": {"type": "string"}}, "required": ["q"]}
            }))],
            "en",
        );
        registry.register_executor("lookup", Arc::new(EchoExecutor));

        let call = ToolCall::new("c1", 0, "lookup", r#"{"wrong": 1}"#);
        let outcome = registry.execute(&call, &ctx()).await;
        assert!(outcome.is_error);
        assert!(outcome.content.contains("required"));
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_error_outcome() {
        let registry = ToolRegistry::new();
        let call = ToolCall::new("c1", 0, "ghost", "{}");
        let outcome = registry.execute(&call, &ctx()).await;
        assert!(outcome.is_error);
        assert!(outcome.content.contains("not registered"));
    }

    #[tokio::test]
    async fn test_concurrency_cap_queues_rather_than_fails() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct SlowExecutor {
            active: Arc<AtomicUsize>,
            peak: Arc<AtomicUsize>,
        }

        #[async_trait::async_trait]
        impl ToolExecutor for SlowExecutor {
            async fn invoke(
                &self,
                _function: &str,
                _args: Value,
                _ctx: &ToolContext,
            ) -> Result<Value, ToolError> {
                let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                self.active.fetch_sub(1, Ordering::SeqCst);
                Ok(json!("done"))
            }
        }

        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut registry = ToolRegistry::from_configs(
            &[config(json!({"id": "slow", "concurrency": 1}))],
            "en",
        );
        registry.register_executor(
            "slow",
            Arc::new(SlowExecutor {
                active: active.clone(),
                peak: peak.clone(),
            }),
        );
        let registry = Arc::new(registry);

        let mut handles = Vec::new();
        for i in 0..3 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let call = ToolCall::new(format!("c{}", i), i, "slow", "{}");
                registry.execute(&call, &ctx()).await
            }));
        }
        for handle in handles {
            let outcome = handle.await.unwrap();
            assert!(!outcome.is_error);
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }
}
