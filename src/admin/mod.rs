//! Admin CRUD service.
//!
//! Each mutation validates the payload against the resource's type,
//! writes the on-disk JSON atomically, refreshes the config cache, and
//! answers with the resource's new ETag. Deletes check dependents first:
//! a source referenced by an app, a group with mapped users, or a model
//! that is some app's preferred model all reject with the dependent list.

use crate::config::cache::{ConfigCache, Resource};
use crate::config::types::{App, Group, Model, SourceConfig, ToolConfig, User};
use crate::error::ApiError;
use crate::llm::keys;
use crate::logger::mask_secret;
use serde_json::Value;
use std::sync::Arc;

pub struct AdminService {
    cache: Arc<ConfigCache>,
}

impl AdminService {
    pub fn new(cache: Arc<ConfigCache>) -> Self {
        Self { cache }
    }

    fn id_of(value: &Value) -> Result<String, ApiError> {
        value
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ApiError::validation("/id", "id is required"))
    }

    fn etag(&self, resource: Resource) -> String {
        self.cache
            .snapshot()
            .etags
            .get(&resource)
            .cloned()
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Apps
    // ------------------------------------------------------------------

    pub async fn upsert_app(&self, value: Value) -> Result<String, ApiError> {
        let id = Self::id_of(&value)?;
        serde_json::from_value::<App>(value.clone())
            .map_err(|err| ApiError::validation("/", err.to_string()))?;

        self.cache
            .store()
            .write_entry("apps", &id, &value)
            .map_err(ApiError::internal)?;
        self.cache.refresh(Resource::Apps).await;
        Ok(self.etag(Resource::Apps))
    }

    pub async fn delete_app(&self, id: &str) -> Result<(), ApiError> {
        let removed = self
            .cache
            .store()
            .delete_entry("apps", id)
            .map_err(ApiError::internal)?;
        if !removed {
            return Err(ApiError::not_found("app", id));
        }
        self.cache.refresh(Resource::Apps).await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Models
    // ------------------------------------------------------------------

    /// Create or update a model.
    ///
    /// A payload carrying the masked key placeholder means "keep the
    /// stored key": the previously persisted encrypted value is read
    /// straight from disk (not the cache, which may have been built
    /// without the field) and preserved byte-for-byte. A plaintext key is
    /// encrypted before it touches disk.
    pub async fn upsert_model(&self, mut value: Value) -> Result<String, ApiError> {
        let id = Self::id_of(&value)?;

        if let Some(api_key) = value.get("apiKey").and_then(Value::as_str) {
            if api_key == mask_secret("") {
                let stored = self
                    .cache
                    .store()
                    .read_entry_raw("models", &id)
                    .map_err(ApiError::internal)?
                    .and_then(|existing| {
                        existing
                            .get("apiKey")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                    });
                match stored {
                    Some(stored) => value["apiKey"] = Value::String(stored),
                    None => {
                        if let Some(obj) = value.as_object_mut() {
                            obj.remove("apiKey");
                        }
                    }
                }
            } else if !keys::is_encrypted(api_key) {
                let secret = self
                    .cache
                    .snapshot()
                    .platform
                    .key_secret
                    .clone()
                    .ok_or_else(|| {
                        ApiError::validation(
                            "/apiKey",
                            "platform keySecret must be configured before storing model keys",
                        )
                    })?;
                let encrypted = keys::encrypt_api_key(api_key, &secret)
                    .map_err(ApiError::internal)?;
                value["apiKey"] = Value::String(encrypted);
            }
        }

        serde_json::from_value::<Model>(value.clone())
            .map_err(|err| ApiError::validation("/", err.to_string()))?;

        self.cache
            .store()
            .write_entry("models", &id, &value)
            .map_err(ApiError::internal)?;
        self.cache.refresh(Resource::Models).await;
        Ok(self.etag(Resource::Models))
    }

    pub async fn delete_model(&self, id: &str) -> Result<(), ApiError> {
        let snapshot = self.cache.snapshot();
        let dependents: Vec<&str> = snapshot
            .apps
            .iter()
            .filter(|app| app.preferred_model.as_deref() == Some(id))
            .map(|app| app.id.as_str())
            .collect();
        if !dependents.is_empty() {
            return Err(ApiError::validation(
                "/id",
                format!(
                    "model '{}' is the preferred model of: {}",
                    id,
                    dependents.join(", ")
                ),
            ));
        }

        let removed = self
            .cache
            .store()
            .delete_entry("models", id)
            .map_err(ApiError::internal)?;
        if !removed {
            return Err(ApiError::not_found("model", id));
        }
        self.cache.refresh(Resource::Models).await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Tools
    // ------------------------------------------------------------------

    pub async fn upsert_tool(&self, value: Value) -> Result<String, ApiError> {
        let id = Self::id_of(&value)?;
        if id.starts_with(crate::tools::SOURCE_TOOL_PREFIX) {
            return Err(ApiError::validation(
                "/id",
                "tool ids must not start with the reserved '@' prefix",
            ));
        }
        serde_json::from_value::<ToolConfig>(value.clone())
            .map_err(|err| ApiError::validation("/", err.to_string()))?;

        self.cache
            .store()
            .write_entry("tools", &id, &value)
            .map_err(ApiError::internal)?;
        self.cache.refresh(Resource::Tools).await;
        Ok(self.etag(Resource::Tools))
    }

    pub async fn delete_tool(&self, id: &str) -> Result<(), ApiError> {
        let snapshot = self.cache.snapshot();
        let dependents: Vec<&str> = snapshot
            .apps
            .iter()
            .filter(|app| app.tools.iter().any(|t| t == id || t.starts_with(&format!("{}.", id))))
            .map(|app| app.id.as_str())
            .collect();
        if !dependents.is_empty() {
            return Err(ApiError::validation(
                "/id",
                format!("tool '{}' is bound by: {}", id, dependents.join(", ")),
            ));
        }

        let removed = self
            .cache
            .store()
            .delete_entry("tools", id)
            .map_err(ApiError::internal)?;
        if !removed {
            return Err(ApiError::not_found("tool", id));
        }
        self.cache.refresh(Resource::Tools).await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sources
    // ------------------------------------------------------------------

    pub async fn upsert_source(&self, value: Value) -> Result<String, ApiError> {
        let id = Self::id_of(&value)?;
        serde_json::from_value::<SourceConfig>(value.clone())
            .map_err(|err| ApiError::validation("/", err.to_string()))?;

        self.cache
            .store()
            .write_entry("sources", &id, &value)
            .map_err(ApiError::internal)?;
        self.cache.refresh(Resource::Sources).await;
        Ok(self.etag(Resource::Sources))
    }

    pub async fn delete_source(&self, id: &str) -> Result<(), ApiError> {
        let snapshot = self.cache.snapshot();
        let dependents: Vec<&str> = snapshot
            .apps
            .iter()
            .filter(|app| app.sources.iter().any(|s| s == id))
            .map(|app| app.id.as_str())
            .collect();
        if !dependents.is_empty() {
            return Err(ApiError::validation(
                "/id",
                format!("source '{}' is referenced by: {}", id, dependents.join(", ")),
            ));
        }

        let removed = self
            .cache
            .store()
            .delete_entry("sources", id)
            .map_err(ApiError::internal)?;
        if !removed {
            return Err(ApiError::not_found("source", id));
        }
        self.cache.refresh(Resource::Sources).await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------

    pub async fn upsert_group(&self, value: Value) -> Result<String, ApiError> {
        let group: Group = serde_json::from_value(value)
            .map_err(|err| ApiError::validation("/", err.to_string()))?;
        if group.id.is_empty() {
            return Err(ApiError::validation("/id", "id is required"));
        }

        let mut groups = self.cache.snapshot().groups.clone();
        match groups.iter_mut().find(|g| g.id == group.id) {
            Some(existing) => *existing = group,
            None => groups.push(group),
        }

        self.write_groups(&groups).await?;
        Ok(self.etag(Resource::Groups))
    }

    pub async fn delete_group(&self, id: &str) -> Result<(), ApiError> {
        let users: Vec<User> = self
            .cache
            .store()
            .read_json("config/users.json")
            .map_err(ApiError::internal)?
            .unwrap_or_default();
        let dependents: Vec<&str> = users
            .iter()
            .filter(|user| user.groups.iter().any(|g| g == id))
            .map(|user| user.id.as_str())
            .collect();
        if !dependents.is_empty() {
            return Err(ApiError::validation(
                "/id",
                format!("group '{}' still has users: {}", id, dependents.join(", ")),
            ));
        }

        let mut groups = self.cache.snapshot().groups.clone();
        let before = groups.len();
        groups.retain(|g| g.id != id);
        if groups.len() == before {
            return Err(ApiError::not_found("group", id));
        }

        self.write_groups(&groups).await
    }

    // ------------------------------------------------------------------
    // Singleton configs
    // ------------------------------------------------------------------

    pub async fn update_ui(&self, value: Value) -> Result<String, ApiError> {
        self.cache
            .store()
            .write_json("config/ui.json", &value)
            .map_err(ApiError::internal)?;
        self.cache.refresh(Resource::Ui).await;
        Ok(self.etag(Resource::Ui))
    }

    pub async fn update_platform(&self, value: Value) -> Result<String, ApiError> {
        serde_json::from_value::<crate::config::types::PlatformConfig>(value.clone())
            .map_err(|err| ApiError::validation("/", err.to_string()))?;
        self.cache
            .store()
            .write_json("config/platform.json", &value)
            .map_err(ApiError::internal)?;
        self.cache.refresh(Resource::Platform).await;
        Ok(self.etag(Resource::Platform))
    }

    async fn write_groups(&self, groups: &[Group]) -> Result<(), ApiError> {
        let value = serde_json::to_value(groups).map_err(ApiError::internal)?;
        self.cache
            .store()
            .write_json("config/groups.json", &value)
            .map_err(ApiError::internal)?;
        self.cache.refresh(Resource::Groups).await;
        Ok(())
    }
}
