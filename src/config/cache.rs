//! Preloaded configuration cache.
//!
//! Single source of truth for apps, models, tools, sources, groups, ui,
//! styles, prompts and platform settings. Readers dereference an atomic
//! snapshot (`RwLock<Arc<Snapshot>>`, swapped wholesale on refresh) so the
//! hot path takes no long-held lock. Refreshes are singleflight per
//! resource and fail open: on error the last-good snapshot stays in place.

use crate::auth::permissions::Permissions;
use crate::config::etag::{compose_view_etag, etag_for};
use crate::config::store::{ConfigError, ContentStore};
use crate::config::types::{
    App, Group, Model, PlatformConfig, SourceConfig, ToolConfig,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Apps,
    Models,
    Tools,
    Sources,
    Groups,
    Prompts,
    Ui,
    Styles,
    Platform,
}

impl Resource {
    pub const ALL: [Resource; 9] = [
        Resource::Apps,
        Resource::Models,
        Resource::Tools,
        Resource::Sources,
        Resource::Groups,
        Resource::Prompts,
        Resource::Ui,
        Resource::Styles,
        Resource::Platform,
    ];
}

/// One immutable view of every config resource plus its global ETag.
#[derive(Default)]
pub struct Snapshot {
    pub apps: Vec<App>,
    pub models: Vec<Model>,
    pub tools: Vec<ToolConfig>,
    pub sources: Vec<SourceConfig>,
    pub groups: Vec<Group>,
    pub prompts: Vec<Value>,
    pub ui: Value,
    pub styles: Value,
    pub platform: PlatformConfig,
    pub etags: HashMap<Resource, String>,
}

impl Snapshot {
    pub fn app(&self, id: &str) -> Option<&App> {
        self.apps.iter().find(|a| a.id == id)
    }

    pub fn model(&self, id: &str) -> Option<&Model> {
        self.models.iter().find(|m| m.id == id)
    }

    pub fn source(&self, id: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.id == id)
    }
}

/// A user-specific filtered view with its content-derived ETag.
pub struct FilteredView<T> {
    pub data: Vec<T>,
    pub etag: String,
}

pub struct ConfigCache {
    store: Arc<ContentStore>,
    snapshot: RwLock<Arc<Snapshot>>,
    /// Singleflight state: per-resource generation counter + guard.
    refresh_state: HashMap<Resource, RefreshGuard>,
    stale: Mutex<Vec<Resource>>,
}

struct RefreshGuard {
    generation: AtomicU64,
    lock: tokio::sync::Mutex<()>,
}

impl ConfigCache {
    /// Load every resource and build the initial snapshot. Load problems in
    /// individual files are logged and skipped, never fatal.
    pub fn load(store: Arc<ContentStore>) -> Self {
        let snapshot = Self::build_snapshot(&store);
        let refresh_state = Resource::ALL
            .iter()
            .map(|r| {
                (
                    *r,
                    RefreshGuard {
                        generation: AtomicU64::new(0),
                        lock: tokio::sync::Mutex::new(()),
                    },
                )
            })
            .collect();

        Self {
            store,
            snapshot: RwLock::new(Arc::new(snapshot)),
            refresh_state,
            stale: Mutex::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &Arc<ContentStore> {
        &self.store
    }

    /// Current snapshot; cheap Arc clone, never blocks on refreshes.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Force a reload of one resource. Concurrent callers collapse into a
    /// single reload: whoever waited for the lock and finds the generation
    /// already advanced skips its own reload.
    pub async fn refresh(&self, resource: Resource) {
        let guard = &self.refresh_state[&resource];
        let seen = guard.generation.load(Ordering::Acquire);
        let _lock = guard.lock.lock().await;
        if guard.generation.load(Ordering::Acquire) != seen {
            return;
        }

        self.reload_resource(resource);
        guard.generation.fetch_add(1, Ordering::Release);
    }

    /// Mark a resource stale; the next `ensure_fresh` pass reloads it.
    pub fn invalidate(&self, resource: Resource) {
        let mut stale = self.stale.lock().unwrap_or_else(|p| p.into_inner());
        if !stale.contains(&resource) {
            stale.push(resource);
        }
    }

    /// Reload everything marked stale.
    pub async fn ensure_fresh(&self) {
        let pending: Vec<Resource> = {
            let mut stale = self.stale.lock().unwrap_or_else(|p| p.into_inner());
            std::mem::take(&mut *stale)
        };
        for resource in pending {
            self.refresh(resource).await;
        }
    }

    /// Background TTL refresh: every `refresh_seconds` from platform config,
    /// else 60 s in dev / 300 s otherwise.
    pub fn spawn_refresh_loop(self: &Arc<Self>, dev_mode: bool) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let secs = cache
                    .snapshot()
                    .platform
                    .refresh_seconds
                    .unwrap_or(if dev_mode { 60 } else { 300 });
                tokio::time::sleep(Duration::from_secs(secs)).await;
                for resource in Resource::ALL {
                    cache.refresh(resource).await;
                }
                cache.ensure_fresh().await;
            }
        })
    }

    fn reload_resource(&self, resource: Resource) {
        let current = self.snapshot();
        let mut next = Snapshot {
            apps: current.apps.clone(),
            models: current.models.clone(),
            tools: current.tools.clone(),
            sources: current.sources.clone(),
            groups: current.groups.clone(),
            prompts: current.prompts.clone(),
            ui: current.ui.clone(),
            styles: current.styles.clone(),
            platform: current.platform.clone(),
            etags: current.etags.clone(),
        };

        match Self::load_one(&self.store, resource, &mut next) {
            Ok(()) => {
                let mut slot = self.snapshot.write().unwrap_or_else(|p| p.into_inner());
                *slot = Arc::new(next);
            }
            Err(err) => {
                // Fail open: keep serving the previous snapshot.
                log::error!("refresh of {:?} failed, keeping last-good data: {}", resource, err);
            }
        }
    }

    fn build_snapshot(store: &ContentStore) -> Snapshot {
        let mut snapshot = Snapshot::default();
        for resource in Resource::ALL {
            if let Err(err) = Self::load_one(store, resource, &mut snapshot) {
                log::error!("initial load of {:?} failed: {}", resource, err);
            }
        }
        snapshot
    }

    fn load_one(
        store: &ContentStore,
        resource: Resource,
        into: &mut Snapshot,
    ) -> Result<(), ConfigError> {
        match resource {
            Resource::Apps => {
                into.apps = store.load_collection::<App>("apps").items;
                into.etags.insert(resource, etag_for(&into.apps));
            }
            Resource::Models => {
                into.models = store.load_collection::<Model>("models").items;
                into.etags.insert(resource, etag_for(&into.models));
            }
            Resource::Tools => {
                into.tools = store.load_collection::<ToolConfig>("tools").items;
                into.etags.insert(resource, etag_for(&into.tools));
            }
            Resource::Sources => {
                into.sources = store.load_collection::<SourceConfig>("sources").items;
                into.etags.insert(resource, etag_for(&into.sources));
            }
            Resource::Groups => {
                into.groups = store
                    .read_json::<Vec<Group>>("config/groups.json")?
                    .unwrap_or_default();
                into.etags.insert(resource, etag_for(&into.groups));
            }
            Resource::Prompts => {
                into.prompts = store
                    .read_json::<Vec<Value>>("config/prompts.json")?
                    .unwrap_or_default();
                into.etags.insert(resource, etag_for(&into.prompts));
            }
            Resource::Ui => {
                into.ui = store.read_json("config/ui.json")?.unwrap_or(Value::Null);
                into.etags.insert(resource, etag_for(&into.ui));
            }
            Resource::Styles => {
                into.styles = store
                    .read_json("config/styles.json")?
                    .unwrap_or(Value::Null);
                into.etags.insert(resource, etag_for(&into.styles));
            }
            Resource::Platform => {
                into.platform = store
                    .read_json::<PlatformConfig>("config/platform.json")?
                    .unwrap_or_default();
                into.etags.insert(resource, etag_for(&into.platform));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Per-user filtered views
    // ------------------------------------------------------------------

    /// Apps this user may see, tagged with a view ETag.
    pub fn apps_view(&self, perms: &Permissions) -> FilteredView<App> {
        let snapshot = self.snapshot();
        let data: Vec<App> = snapshot
            .apps
            .iter()
            .filter(|a| perms.allows_app(&a.id))
            .cloned()
            .collect();
        let global = snapshot.etags.get(&Resource::Apps).cloned().unwrap_or_default();
        let etag = compose_view_etag(&global, &data);
        FilteredView { data, etag }
    }

    /// Models this user may see. API keys are stripped from the view.
    pub fn models_view(&self, perms: &Permissions) -> FilteredView<Model> {
        let snapshot = self.snapshot();
        let data: Vec<Model> = snapshot
            .models
            .iter()
            .filter(|m| perms.allows_model(&m.id))
            .cloned()
            .map(|mut m| {
                m.api_key = None;
                m
            })
            .collect();
        let global = snapshot
            .etags
            .get(&Resource::Models)
            .cloned()
            .unwrap_or_default();
        let etag = compose_view_etag(&global, &data);
        FilteredView { data, etag }
    }

    /// Prompt-library entries this user may see.
    pub fn prompts_view(&self, perms: &Permissions) -> FilteredView<Value> {
        let snapshot = self.snapshot();
        let data: Vec<Value> = snapshot
            .prompts
            .iter()
            .filter(|p| {
                p.get("id")
                    .and_then(Value::as_str)
                    .map(|id| perms.allows_prompt(id))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        let global = snapshot
            .etags
            .get(&Resource::Prompts)
            .cloned()
            .unwrap_or_default();
        let etag = compose_view_etag(&global, &data);
        FilteredView { data, etag }
    }

    /// Localized UI strings for one language, with an ETag. Falls back to
    /// `en` when the language has no bundle. Read through the store on
    /// demand; bundles are small and language-keyed caching would buy
    /// little.
    pub fn translations(&self, lang: &str) -> Option<(Value, String)> {
        for candidate in [lang, "en"] {
            let rel = format!("locales/{}.json", candidate);
            match self.store.read_json::<Value>(&rel) {
                Ok(Some(bundle)) => {
                    let etag = etag_for(&bundle);
                    return Some((bundle, etag));
                }
                Ok(None) => continue,
                Err(err) => {
                    log::warn!("translations bundle '{}' unreadable: {}", candidate, err);
                    continue;
                }
            }
        }
        None
    }

    /// Platform config with operator secrets removed, for the client.
    pub fn platform_public(&self) -> (Value, String) {
        let snapshot = self.snapshot();
        let mut value = serde_json::to_value(&snapshot.platform).unwrap_or(Value::Null);
        if let Some(map) = value.as_object_mut() {
            map.remove("adminSecret");
            map.remove("keySecret");
        }
        let etag = etag_for(&value);
        (value, etag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn seeded_cache() -> (tempfile::TempDir, Arc<ConfigCache>) {
        let dir = tempfile::tempdir().unwrap();
        let contents = dir.path().join("contents");
        fs::create_dir_all(contents.join("apps")).unwrap();
        fs::create_dir_all(contents.join("models")).unwrap();
        fs::create_dir_all(contents.join("config")).unwrap();

        for id in ["alpha", "beta", "gamma"] {
            fs::write(
                contents.join("apps").join(format!("{}.json", id)),
                format!(r#"{{"id": "{}"}}"#, id),
            )
            .unwrap();
        }
        fs::write(
            contents.join("models/gpt-4o.json"),
            r#"{"id": "gpt-4o", "modelId": "gpt-4o", "provider": "openai", "apiKey": "ENC[secret]"}"#,
        )
        .unwrap();
        fs::write(
            contents.join("config/platform.json"),
            r#"{"authMode": "anonymous", "adminSecret": "s3cret"}"#,
        )
        .unwrap();

        let store = Arc::new(ContentStore::new(contents, dir.path().join("defaults")));
        let cache = Arc::new(ConfigCache::load(store));
        (dir, cache)
    }

    fn perms(apps: &[&str]) -> Permissions {
        Permissions {
            apps: apps.iter().map(|s| s.to_string()).collect(),
            prompts: Default::default(),
            models: ["*".to_string()].into_iter().collect(),
            admin_access: false,
        }
    }

    #[test]
    fn test_filtered_views_get_distinct_etags() {
        let (_dir, cache) = seeded_cache();
        let admin = cache.apps_view(&perms(&["*"]));
        let user = cache.apps_view(&perms(&["alpha", "beta"]));

        assert_eq!(admin.data.len(), 3);
        assert_eq!(user.data.len(), 2);
        assert_ne!(admin.etag, user.etag);

        // Identical view content yields the identical tag.
        let user_again = cache.apps_view(&perms(&["alpha", "beta"]));
        assert_eq!(user.etag, user_again.etag);
    }

    #[test]
    fn test_models_view_strips_api_keys() {
        let (_dir, cache) = seeded_cache();
        let view = cache.models_view(&perms(&[]));
        assert_eq!(view.data.len(), 1);
        assert!(view.data[0].api_key.is_none());
    }

    #[test]
    fn test_platform_public_strips_secrets() {
        let (_dir, cache) = seeded_cache();
        let (value, _etag) = cache.platform_public();
        assert!(value.get("adminSecret").is_none());
        assert_eq!(value["authMode"], "anonymous");
    }

    #[tokio::test]
    async fn test_refresh_picks_up_changes_and_fails_open() {
        let (dir, cache) = seeded_cache();
        let contents = dir.path().join("contents");

        fs::write(contents.join("apps/delta.json"), r#"{"id": "delta"}"#).unwrap();
        cache.refresh(Resource::Apps).await;
        assert_eq!(cache.snapshot().apps.len(), 4);

        // A malformed new file is skipped, not fatal.
        fs::write(contents.join("apps/broken.json"), "{oops").unwrap();
        cache.refresh(Resource::Apps).await;
        assert_eq!(cache.snapshot().apps.len(), 4);
    }

    #[test]
    fn test_translations_fall_back_to_english() {
        let (dir, cache) = seeded_cache();
        let contents = dir.path().join("contents");
        fs::create_dir_all(contents.join("locales")).unwrap();
        fs::write(contents.join("locales/en.json"), r#"{"greeting": "Hello"}"#).unwrap();
        fs::write(contents.join("locales/de.json"), r#"{"greeting": "Hallo"}"#).unwrap();

        let (de, de_etag) = cache.translations("de").unwrap();
        assert_eq!(de["greeting"], "Hallo");

        let (fr, fr_etag) = cache.translations("fr").unwrap();
        assert_eq!(fr["greeting"], "Hello");
        assert_ne!(de_etag, fr_etag);
    }

    #[tokio::test]
    async fn test_invalidate_then_ensure_fresh() {
        let (dir, cache) = seeded_cache();
        fs::write(
            dir.path().join("contents/apps/late.json"),
            r#"{"id": "late"}"#,
        )
        .unwrap();

        cache.invalidate(Resource::Apps);
        assert_eq!(cache.snapshot().apps.len(), 3);
        cache.ensure_fresh().await;
        assert_eq!(cache.snapshot().apps.len(), 4);
    }
}
