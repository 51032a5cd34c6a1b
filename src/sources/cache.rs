//! TTL memory cache for loaded source content.
//!
//! Keyed by the canonical JSON of the source's full config, so any config
//! change is a new cache entry.

use crate::sources::handler::SourceContent;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct SourceCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

struct CacheEntry {
    content: SourceContent,
    expires_at: Instant,
}

impl SourceCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<SourceContent> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.content.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: String, content: SourceContent, ttl: Duration) {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.insert(
            key,
            CacheEntry {
                content,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }
}

impl Default for SourceCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn content(text: &str) -> SourceContent {
        SourceContent {
            content: text.to_string(),
            meta: json!({}),
        }
    }

    #[test]
    fn test_hit_within_ttl() {
        let cache = SourceCache::new();
        cache.insert("k".into(), content("v"), Duration::from_secs(60));
        assert_eq!(cache.get("k").unwrap().content, "v");
    }

    #[test]
    fn test_expired_entry_is_dropped() {
        let cache = SourceCache::new();
        cache.insert("k".into(), content("v"), Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn test_clear() {
        let cache = SourceCache::new();
        cache.insert("k".into(), content("v"), Duration::from_secs(60));
        cache.clear();
        assert!(cache.get("k").is_none());
    }
}
