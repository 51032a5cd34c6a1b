//! On-disk content store.
//!
//! Reads prefer `contents/<path>` and fall back to `defaults/<path>`; writes
//! always go to `contents/`. Collections (apps, models, tools, sources) load
//! either from a one-file-per-id directory or a single `<name>.json` array.
//! Malformed files are skipped with a logged path; bad user content must
//! never take the gateway down.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid JSON at {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("resource not found: {0}")]
    NotFound(String),
}

/// Result of loading a collection: parsed entries plus the files that were
/// skipped as malformed.
pub struct CollectionLoad<T> {
    pub items: Vec<T>,
    pub skipped: Vec<(PathBuf, String)>,
}

pub struct ContentStore {
    contents_dir: PathBuf,
    defaults_dir: PathBuf,
    /// Per-file write locks so concurrent admin writes serialize.
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl ContentStore {
    pub fn new(contents_dir: impl Into<PathBuf>, defaults_dir: impl Into<PathBuf>) -> Self {
        Self {
            contents_dir: contents_dir.into(),
            defaults_dir: defaults_dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn contents_dir(&self) -> &Path {
        &self.contents_dir
    }

    /// Read a single JSON resource, preferring contents over defaults.
    /// Returns `Ok(None)` when neither layer has the file.
    pub fn read_json<T: DeserializeOwned>(&self, rel: &str) -> Result<Option<T>, ConfigError> {
        for base in [&self.contents_dir, &self.defaults_dir] {
            let path = base.join(rel);
            if path.exists() {
                return Self::parse_file(&path).map(Some);
            }
        }
        Ok(None)
    }

    /// Read a plain text resource, preferring contents over defaults.
    pub fn read_text(&self, rel: &str) -> Result<Option<String>, ConfigError> {
        for base in [&self.contents_dir, &self.defaults_dir] {
            let path = base.join(rel);
            if path.exists() {
                let body = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                    path: path.clone(),
                    source,
                })?;
                return Ok(Some(body));
            }
        }
        Ok(None)
    }

    /// Read the raw JSON value of one collection entry straight from disk,
    /// bypassing any cache. Used where the stored bytes matter (encrypted
    /// model keys).
    pub fn read_entry_raw(&self, collection: &str, id: &str) -> Result<Option<Value>, ConfigError> {
        for base in [&self.contents_dir, &self.defaults_dir] {
            let dir_path = base.join(collection).join(format!("{}.json", id));
            if dir_path.exists() {
                return Self::parse_file(&dir_path).map(Some);
            }

            let file_path = base.join(format!("{}.json", collection));
            if file_path.exists() {
                let entries: Vec<Value> = Self::parse_file(&file_path)?;
                if let Some(entry) = entries
                    .into_iter()
                    .find(|e| e.get("id").and_then(Value::as_str) == Some(id))
                {
                    return Ok(Some(entry));
                }
            }
        }
        Ok(None)
    }

    /// Load a collection. Directory entries win over a same-named single
    /// file; contents entries win over defaults with the same id.
    pub fn load_collection<T: DeserializeOwned>(&self, collection: &str) -> CollectionLoad<T> {
        let mut by_id: HashMap<String, Value> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        let mut skipped = Vec::new();

        // Defaults first so contents can override per id.
        for base in [&self.defaults_dir, &self.contents_dir] {
            for (id, value) in Self::collect_entries(base, collection, &mut skipped) {
                if !by_id.contains_key(&id) {
                    order.push(id.clone());
                }
                by_id.insert(id, value);
            }
        }

        let mut items = Vec::with_capacity(order.len());
        for id in order {
            let value = by_id.remove(&id).unwrap_or(Value::Null);
            match serde_json::from_value::<T>(value) {
                Ok(item) => items.push(item),
                Err(err) => {
                    let path = self.entry_path(collection, &id);
                    log::warn!(
                        "skipping invalid entry '{}' in collection '{}' ({}): {}",
                        id,
                        collection,
                        path.display(),
                        err
                    );
                    skipped.push((path, err.to_string()));
                }
            }
        }

        CollectionLoad { items, skipped }
    }

    /// Write one collection entry atomically (temp file + rename-over),
    /// pretty-printed, under the contents dir.
    pub fn write_entry(&self, collection: &str, id: &str, value: &Value) -> Result<PathBuf, ConfigError> {
        let path = self.entry_path(collection, id);
        self.write_json_at(&path, value)?;
        Ok(path)
    }

    /// Delete one collection entry. Returns whether a file was removed.
    pub fn delete_entry(&self, collection: &str, id: &str) -> Result<bool, ConfigError> {
        let path = self.entry_path(collection, id);
        let lock = self.lock_for(&path);
        let _guard = lock.lock().unwrap_or_else(|p| p.into_inner());

        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(true)
    }

    /// Write a single (non-collection) JSON resource under contents.
    pub fn write_json(&self, rel: &str, value: &Value) -> Result<PathBuf, ConfigError> {
        let path = self.contents_dir.join(rel);
        self.write_json_at(&path, value)?;
        Ok(path)
    }

    fn write_json_at(&self, path: &Path, value: &Value) -> Result<(), ConfigError> {
        let lock = self.lock_for(path);
        let _guard = lock.lock().unwrap_or_else(|p| p.into_inner());

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut body = serde_json::to_string_pretty(value).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        body.push('\n');

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body).map_err(|source| ConfigError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Canonical write location for a collection entry.
    fn entry_path(&self, collection: &str, id: &str) -> PathBuf {
        self.contents_dir
            .join(collection)
            .join(format!("{}.json", id))
    }

    fn collect_entries(
        base: &Path,
        collection: &str,
        skipped: &mut Vec<(PathBuf, String)>,
    ) -> Vec<(String, Value)> {
        let mut entries = Vec::new();

        let dir = base.join(collection);
        if dir.is_dir() {
            let mut paths: Vec<PathBuf> = match fs::read_dir(&dir) {
                Ok(rd) => rd
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
                    .collect(),
                Err(err) => {
                    log::warn!("cannot read collection dir {}: {}", dir.display(), err);
                    return entries;
                }
            };
            paths.sort();

            for path in paths {
                match Self::parse_file::<Value>(&path) {
                    Ok(value) => {
                        if let Some(id) = value.get("id").and_then(Value::as_str) {
                            entries.push((id.to_string(), value));
                        } else {
                            log::warn!("entry without id skipped: {}", path.display());
                            skipped.push((path, "missing 'id' field".to_string()));
                        }
                    }
                    Err(err) => {
                        log::warn!("skipping malformed file {}: {}", path.display(), err);
                        skipped.push((path, err.to_string()));
                    }
                }
            }
            return entries;
        }

        let file = base.join(format!("{}.json", collection));
        if file.exists() {
            match Self::parse_file::<Vec<Value>>(&file) {
                Ok(values) => {
                    for value in values {
                        if let Some(id) = value.get("id").and_then(Value::as_str) {
                            entries.push((id.to_string(), value));
                        } else {
                            skipped.push((file.clone(), "entry missing 'id'".to_string()));
                        }
                    }
                }
                Err(err) => {
                    log::warn!("skipping malformed file {}: {}", file.display(), err);
                    skipped.push((file, err.to_string()));
                }
            }
        }

        entries
    }

    fn parse_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
        let body = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&body).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::App;
    use serde_json::json;

    fn store() -> (tempfile::TempDir, ContentStore) {
        let dir = tempfile::tempdir().unwrap();
        let contents = dir.path().join("contents");
        let defaults = dir.path().join("defaults");
        fs::create_dir_all(&contents).unwrap();
        fs::create_dir_all(&defaults).unwrap();
        let store = ContentStore::new(&contents, &defaults);
        (dir, store)
    }

    #[test]
    fn test_contents_wins_over_defaults() {
        let (dir, store) = store();
        fs::create_dir_all(dir.path().join("defaults/config")).unwrap();
        fs::create_dir_all(dir.path().join("contents/config")).unwrap();
        fs::write(
            dir.path().join("defaults/config/ui.json"),
            r#"{"title": "default"}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("contents/config/ui.json"),
            r#"{"title": "custom"}"#,
        )
        .unwrap();

        let ui: Value = store.read_json("config/ui.json").unwrap().unwrap();
        assert_eq!(ui["title"], "custom");
    }

    #[test]
    fn test_defaults_fallback() {
        let (dir, store) = store();
        fs::create_dir_all(dir.path().join("defaults/config")).unwrap();
        fs::write(
            dir.path().join("defaults/config/ui.json"),
            r#"{"title": "default"}"#,
        )
        .unwrap();

        let ui: Value = store.read_json("config/ui.json").unwrap().unwrap();
        assert_eq!(ui["title"], "default");
    }

    #[test]
    fn test_collection_dir_merge_by_id() {
        let (dir, store) = store();
        fs::create_dir_all(dir.path().join("defaults/apps")).unwrap();
        fs::create_dir_all(dir.path().join("contents/apps")).unwrap();
        fs::write(
            dir.path().join("defaults/apps/chat.json"),
            r#"{"id": "chat", "systemPrompt": "shipped"}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("defaults/apps/translate.json"),
            r#"{"id": "translate"}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("contents/apps/chat.json"),
            r#"{"id": "chat", "systemPrompt": "edited"}"#,
        )
        .unwrap();

        let load = store.load_collection::<App>("apps");
        assert_eq!(load.items.len(), 2);
        assert!(load.skipped.is_empty());
        let chat = load.items.iter().find(|a| a.id == "chat").unwrap();
        assert_eq!(chat.system_prompt, "edited");
    }

    #[test]
    fn test_malformed_entry_skipped_not_fatal() {
        let (dir, store) = store();
        fs::create_dir_all(dir.path().join("contents/apps")).unwrap();
        fs::write(dir.path().join("contents/apps/ok.json"), r#"{"id": "ok"}"#).unwrap();
        fs::write(dir.path().join("contents/apps/bad.json"), "{not json").unwrap();

        let load = store.load_collection::<App>("apps");
        assert_eq!(load.items.len(), 1);
        assert_eq!(load.skipped.len(), 1);
    }

    #[test]
    fn test_single_file_collection() {
        let (dir, store) = store();
        fs::write(
            dir.path().join("contents/tools.json"),
            r#"[{"id": "a"}, {"id": "b"}]"#,
        )
        .unwrap();

        let load = store.load_collection::<Value>("tools");
        assert_eq!(load.items.len(), 2);
    }

    #[test]
    fn test_write_entry_atomic_and_pretty() {
        let (dir, store) = store();
        let value = json!({"id": "gpt-4o", "modelId": "gpt-4o", "provider": "openai"});
        let path = store.write_entry("models", "gpt-4o", &value).unwrap();

        let body = fs::read_to_string(&path).unwrap();
        assert!(body.contains("\n  \"id\""), "should be pretty-printed");
        assert!(body.ends_with('\n'));
        assert!(!dir
            .path()
            .join("contents/models/gpt-4o.json.tmp")
            .exists());
    }

    #[test]
    fn test_read_entry_raw_prefers_contents() {
        let (dir, store) = store();
        fs::create_dir_all(dir.path().join("contents/models")).unwrap();
        fs::write(
            dir.path().join("contents/models/gpt-4o.json"),
            r#"{"id": "gpt-4o", "apiKey": "enc-bytes"}"#,
        )
        .unwrap();

        let raw = store.read_entry_raw("models", "gpt-4o").unwrap().unwrap();
        assert_eq!(raw["apiKey"], "enc-bytes");
        assert!(store.read_entry_raw("models", "missing").unwrap().is_none());
    }
}
