//! Persisted short-link store.
//!
//! A small JSON file under `contents/data/`; loaded at startup, written
//! atomically after every mutation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortLink {
    pub code: String,
    pub url: String,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(rename = "useCount", default)]
    pub use_count: u64,
}

pub struct ShortLinkStore {
    path: PathBuf,
    links: Mutex<HashMap<String, ShortLink>>,
}

impl ShortLinkStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let links = match fs::read_to_string(&path) {
            Ok(body) => serde_json::from_str(&body).unwrap_or_else(|err| {
                log::warn!("shortlinks file unreadable, starting empty: {}", err);
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };
        Self {
            path,
            links: Mutex::new(links),
        }
    }

    /// Create (or overwrite) a short link.
    pub fn put(&self, code: impl Into<String>, url: impl Into<String>) -> std::io::Result<ShortLink> {
        let code = code.into();
        let link = ShortLink {
            code: code.clone(),
            url: url.into(),
            created_at: chrono::Local::now().to_rfc3339(),
            use_count: 0,
        };
        let snapshot = {
            let mut links = self.links.lock().unwrap_or_else(|p| p.into_inner());
            links.insert(code, link.clone());
            links.clone()
        };
        self.flush(&snapshot)?;
        Ok(link)
    }

    /// Resolve a code, bumping its use counter.
    pub fn resolve(&self, code: &str) -> Option<ShortLink> {
        let (link, snapshot) = {
            let mut links = self.links.lock().unwrap_or_else(|p| p.into_inner());
            let link = links.get_mut(code)?;
            link.use_count += 1;
            (link.clone(), links.clone())
        };
        if let Err(err) = self.flush(&snapshot) {
            log::warn!("shortlink counter flush failed: {}", err);
        }
        Some(link)
    }

    pub fn delete(&self, code: &str) -> std::io::Result<bool> {
        let (removed, snapshot) = {
            let mut links = self.links.lock().unwrap_or_else(|p| p.into_inner());
            let removed = links.remove(code).is_some();
            (removed, links.clone())
        };
        if removed {
            self.flush(&snapshot)?;
        }
        Ok(removed)
    }

    fn flush(&self, links: &HashMap<String, ShortLink>) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut body = serde_json::to_string_pretty(links)?;
        body.push('\n');
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_resolve_counts_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data/shortlinks.json");

        let store = ShortLinkStore::open(&path);
        store.put("abc123", "https://example.com/docs").unwrap();

        assert_eq!(store.resolve("abc123").unwrap().use_count, 1);
        assert_eq!(store.resolve("abc123").unwrap().use_count, 2);
        assert!(store.resolve("nope").is_none());

        // a fresh store sees the persisted state
        let reopened = ShortLinkStore::open(&path);
        let link = reopened.resolve("abc123").unwrap();
        assert_eq!(link.url, "https://example.com/docs");
        assert_eq!(link.use_count, 3);
    }

    #[test]
    fn test_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShortLinkStore::open(dir.path().join("shortlinks.json"));
        store.put("x", "https://x").unwrap();
        assert!(store.delete("x").unwrap());
        assert!(!store.delete("x").unwrap());
        assert!(store.resolve("x").is_none());
    }
}
