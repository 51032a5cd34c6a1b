//! Source manager: cached loads, prompt inlining, synthetic source tools.

use crate::config::etag::etag_for;
use crate::config::store::ContentStore;
use crate::config::types::{ExposeAs, SourceConfig, SourceType};
use crate::llm::provider::ToolDefinition;
use crate::sources::cache::SourceCache;
use crate::sources::filesystem::FilesystemHandler;
use crate::sources::handler::{SourceContent, SourceContext, SourceError, SourceHandler};
use crate::sources::ifinder::IFinderHandler;
use crate::sources::page::PageHandler;
use crate::sources::url::UrlHandler;
use crate::tools::registry::{ToolContext, ToolError, ToolExecutor, SOURCE_TOOL_PREFIX};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Hard deadline for any single source load.
const LOAD_DEADLINE: Duration = Duration::from_secs(30);

pub struct SourceManager {
    handlers: HashMap<SourceType, Arc<dyn SourceHandler>>,
    cache: SourceCache,
}

impl SourceManager {
    pub fn new(store: Arc<ContentStore>, filesystem_base: PathBuf) -> Self {
        let mut handlers: HashMap<SourceType, Arc<dyn SourceHandler>> = HashMap::new();
        handlers.insert(
            SourceType::Filesystem,
            Arc::new(FilesystemHandler::new(filesystem_base)),
        );
        handlers.insert(SourceType::Url, Arc::new(UrlHandler::new()));
        handlers.insert(SourceType::Page, Arc::new(PageHandler::new(store)));
        handlers.insert(SourceType::IFinder, Arc::new(IFinderHandler::new()));

        Self {
            handlers,
            cache: SourceCache::new(),
        }
    }

    /// Load one source, consulting the cache. The cache key derives from
    /// the source's full config (plus the scoped query, when present) so
    /// config edits never serve stale content.
    pub async fn load(
        &self,
        config: &SourceConfig,
        ctx: &SourceContext,
    ) -> Result<SourceContent, SourceError> {
        let handler = self
            .handlers
            .get(&config.source_type)
            .ok_or_else(|| {
                SourceError::InvalidConfig(format!("no handler for {:?}", config.source_type))
            })?
            .clone();

        let mut key = etag_for(config);
        if let Some(query) = &ctx.query {
            key.push(':');
            key.push_str(query);
        }

        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }

        let loaded = tokio::time::timeout(LOAD_DEADLINE, handler.load(config, ctx))
            .await
            .map_err(|_| SourceError::Timeout)??;

        let ttl = config.cache_ttl.unwrap_or_else(|| handler.default_ttl());
        self.cache
            .insert(key, loaded.clone(), Duration::from_secs(ttl));
        Ok(loaded)
    }

    pub fn invalidate_cache(&self) {
        self.cache.clear();
    }

    /// Concatenate `exposeAs=prompt` sources into prompt-ready text,
    /// keyed for named placeholders. A failing source is skipped with a
    /// log line; its error text never reaches the prompt.
    pub async fn load_prompt_sources(
        &self,
        sources: &[SourceConfig],
        ctx: &SourceContext,
    ) -> (String, HashMap<String, String>) {
        let mut combined = String::new();
        let mut by_id = HashMap::new();

        for config in sources {
            if config.expose_as != ExposeAs::Prompt {
                continue;
            }
            match self.load(config, ctx).await {
                Ok(loaded) => {
                    if !combined.is_empty() {
                        combined.push_str("\n\n");
                    }
                    combined.push_str(&format!("## {}\n{}", config.id, loaded.content));
                    by_id.insert(config.id.clone(), loaded.content);
                }
                Err(err) => {
                    log::warn!("source '{}' skipped: {}", config.id, err);
                }
            }
        }

        (combined, by_id)
    }

    /// Wire definition for a source exposed as a tool. The reserved prefix
    /// keeps synthetic names clear of regular tool ids.
    pub fn tool_definition(config: &SourceConfig) -> ToolDefinition {
        ToolDefinition::new(
            format!("{}{}", SOURCE_TOOL_PREFIX, config.id),
            format!("Look up content from the '{}' source.", config.id),
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "What to look up"}
                },
                "required": ["query"]
            }),
        )
    }
}

/// Executor behind synthetic source tools: a call performs a scoped load.
pub struct SourceToolExecutor {
    manager: Arc<SourceManager>,
    sources: HashMap<String, SourceConfig>,
}

impl SourceToolExecutor {
    pub fn new(manager: Arc<SourceManager>, sources: Vec<SourceConfig>) -> Self {
        Self {
            manager,
            sources: sources
                .into_iter()
                .map(|s| (format!("{}{}", SOURCE_TOOL_PREFIX, s.id), s))
                .collect(),
        }
    }
}

#[async_trait::async_trait]
impl ToolExecutor for SourceToolExecutor {
    async fn invoke(
        &self,
        function: &str,
        args: Value,
        ctx: &ToolContext,
    ) -> Result<Value, ToolError> {
        let config = self
            .sources
            .get(function)
            .ok_or_else(|| ToolError::NotFound(function.to_string()))?;

        let mut source_ctx = SourceContext::for_user(ctx.user.clone(), ctx.language.clone());
        source_ctx.query = args
            .get("query")
            .and_then(Value::as_str)
            .map(str::to_string);

        let loaded = self
            .manager
            .load(config, &source_ctx)
            .await
            .map_err(|err| ToolError::Execution(err.to_string()))?;

        Ok(json!({ "content": loaded.content, "meta": loaded.meta }))
    }
}

/// Substitute `{{sources}}` and `{{source:<id>}}` placeholders in a system
/// prompt template. When no placeholder exists but content was loaded, it
/// is appended after the prompt.
pub fn substitute_sources(
    prompt: &str,
    combined: &str,
    by_id: &HashMap<String, String>,
) -> String {
    let mut result = prompt.to_string();
    let mut placed = false;

    if result.contains("{{sources}}") {
        result = result.replace("{{sources}}", combined);
        placed = true;
    }
    for (id, content) in by_id {
        let placeholder = format!("{{{{source:{}}}}}", id);
        if result.contains(&placeholder) {
            result = result.replace(&placeholder, content);
            placed = true;
        }
    }

    if !placed && !combined.is_empty() {
        result.push_str("\n\n");
        result.push_str(combined);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::User;
    use std::fs;

    fn manager_with_fs() -> (tempfile::TempDir, Arc<SourceManager>) {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join("facts.md"), "water is wet").unwrap();

        let store = Arc::new(ContentStore::new(
            dir.path().join("contents"),
            dir.path().join("defaults"),
        ));
        let manager = Arc::new(SourceManager::new(store, data));
        (dir, manager)
    }

    fn fs_source(id: &str) -> SourceConfig {
        serde_json::from_value(json!({
            "id": id,
            "type": "filesystem",
            "exposeAs": "prompt",
            "config": {"path": "facts.md"}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_load_and_cache() {
        let (dir, manager) = manager_with_fs();
        let ctx = SourceContext::for_user(User::anonymous(), "en");
        let source = fs_source("facts");

        let first = manager.load(&source, &ctx).await.unwrap();
        assert_eq!(first.content, "water is wet");

        // Mutate the file; the cached copy is still served inside the TTL.
        fs::write(dir.path().join("data/facts.md"), "changed").unwrap();
        let second = manager.load(&source, &ctx).await.unwrap();
        assert_eq!(second.content, "water is wet");

        manager.invalidate_cache();
        let third = manager.load(&source, &ctx).await.unwrap();
        assert_eq!(third.content, "changed");
    }

    #[tokio::test]
    async fn test_prompt_sources_skip_failures() {
        let (_dir, manager) = manager_with_fs();
        let ctx = SourceContext::for_user(User::anonymous(), "en");

        let missing: SourceConfig = serde_json::from_value(json!({
            "id": "missing",
            "type": "filesystem",
            "exposeAs": "prompt",
            "config": {"path": "absent.md"}
        }))
        .unwrap();

        let (combined, by_id) = manager
            .load_prompt_sources(&[fs_source("facts"), missing], &ctx)
            .await;
        assert!(combined.contains("water is wet"));
        assert!(!combined.contains("absent"));
        assert_eq!(by_id.len(), 1);
    }

    #[tokio::test]
    async fn test_source_tool_executor_scoped_load() {
        let (_dir, manager) = manager_with_fs();
        let executor = SourceToolExecutor::new(manager, vec![fs_source("facts")]);
        let ctx = ToolContext::new(User::anonymous(), "c", "en");

        let result = executor
            .invoke("@facts", json!({"query": "wet"}), &ctx)
            .await
            .unwrap();
        assert_eq!(result["content"], "water is wet");

        assert!(executor
            .invoke("@unknown", json!({"query": "x"}), &ctx)
            .await
            .is_err());
    }

    #[test]
    fn test_substitute_sources_placeholders() {
        let mut by_id = HashMap::new();
        by_id.insert("facts".to_string(), "water is wet".to_string());

        let out = substitute_sources("Context:\n{{sources}}\nGo.", "## facts\nwater is wet", &by_id);
        assert!(out.contains("## facts"));

        let out = substitute_sources("Only: {{source:facts}}", "irrelevant", &by_id);
        assert_eq!(out, "Only: water is wet");

        // No placeholder: content is appended.
        let out = substitute_sources("Plain prompt.", "## facts\nwater is wet", &by_id);
        assert!(out.starts_with("Plain prompt."));
        assert!(out.contains("water is wet"));
    }

    #[test]
    fn test_tool_definition_uses_reserved_prefix() {
        let def = SourceManager::tool_definition(&fs_source("facts"));
        assert_eq!(def.name, "@facts");
        assert_eq!(def.parameters["required"][0], "query");
    }
}
