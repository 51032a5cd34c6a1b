//! Page source handler: localized pages shipped under `pages/<lang>/`.

use crate::config::store::ContentStore;
use crate::config::types::SourceConfig;
use crate::sources::handler::{SourceContent, SourceContext, SourceError, SourceHandler};
use serde_json::{json, Value};
use std::sync::Arc;

pub struct PageHandler {
    store: Arc<ContentStore>,
}

impl PageHandler {
    pub fn new(store: Arc<ContentStore>) -> Self {
        Self { store }
    }

    fn page_id(config: &SourceConfig) -> Result<&str, SourceError> {
        config
            .config
            .get("pageId")
            .and_then(Value::as_str)
            .ok_or_else(|| SourceError::InvalidConfig("page source needs a 'pageId'".into()))
    }
}

#[async_trait::async_trait]
impl SourceHandler for PageHandler {
    fn default_ttl(&self) -> u64 {
        300
    }

    fn validate(&self, config: &SourceConfig) -> Result<(), SourceError> {
        let page_id = Self::page_id(config)?;
        if page_id.contains("..") || page_id.contains('/') {
            return Err(SourceError::InvalidConfig(
                "pageId must be a bare slug".into(),
            ));
        }
        Ok(())
    }

    async fn load(
        &self,
        config: &SourceConfig,
        ctx: &SourceContext,
    ) -> Result<SourceContent, SourceError> {
        self.validate(config)?;
        let page_id = Self::page_id(config)?;

        // Requested language first, then the `en` fallback.
        for lang in [ctx.language.as_str(), "en"] {
            for ext in ["md", "jsx"] {
                let rel = format!("pages/{}/{}.{}", lang, page_id, ext);
                if let Ok(Some(content)) = self.store.read_text(&rel) {
                    return Ok(SourceContent {
                        content,
                        meta: json!({ "pageId": page_id, "language": lang }),
                    });
                }
            }
        }

        Err(SourceError::NotFound(config.id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::User;
    use std::fs;

    fn setup() -> (tempfile::TempDir, PageHandler) {
        let dir = tempfile::tempdir().unwrap();
        let contents = dir.path().join("contents");
        fs::create_dir_all(contents.join("pages/en")).unwrap();
        fs::create_dir_all(contents.join("pages/de")).unwrap();
        fs::write(contents.join("pages/en/faq.md"), "English FAQ").unwrap();
        fs::write(contents.join("pages/de/faq.md"), "Deutsche FAQ").unwrap();

        let store = Arc::new(ContentStore::new(contents, dir.path().join("defaults")));
        (dir, PageHandler::new(store))
    }

    fn source() -> SourceConfig {
        serde_json::from_value(json!({
            "id": "faq", "type": "page", "config": {"pageId": "faq"}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_loads_requested_language() {
        let (_dir, handler) = setup();
        let ctx = SourceContext::for_user(User::anonymous(), "de");
        let loaded = handler.load(&source(), &ctx).await.unwrap();
        assert_eq!(loaded.content, "Deutsche FAQ");
    }

    #[tokio::test]
    async fn test_falls_back_to_english() {
        let (_dir, handler) = setup();
        let ctx = SourceContext::for_user(User::anonymous(), "fr");
        let loaded = handler.load(&source(), &ctx).await.unwrap();
        assert_eq!(loaded.content, "English FAQ");
    }

    #[tokio::test]
    async fn test_slug_traversal_rejected() {
        let (_dir, handler) = setup();
        let bad: SourceConfig = serde_json::from_value(json!({
            "id": "x", "type": "page", "config": {"pageId": "../secret"}
        }))
        .unwrap();
        let ctx = SourceContext::for_user(User::anonymous(), "en");
        assert!(handler.load(&bad, &ctx).await.is_err());
    }
}
