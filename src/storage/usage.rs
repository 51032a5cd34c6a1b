//! Usage tracker.
//!
//! Per-app, per-model and per-user counters of messages and tokens,
//! persisted as one JSON file with atomic writes. The orchestrator
//! records an entry whenever a chat turn completes.

use crate::llm::provider::Usage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageCounter {
    #[serde(default)]
    pub messages: u64,
    #[serde(rename = "promptTokens", default)]
    pub prompt_tokens: u64,
    #[serde(rename = "completionTokens", default)]
    pub completion_tokens: u64,
}

impl UsageCounter {
    fn record(&mut self, usage: &Usage) {
        self.messages += 1;
        self.prompt_tokens += usage.prompt_tokens as u64;
        self.completion_tokens += usage.completion_tokens as u64;
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UsageData {
    #[serde(default)]
    apps: HashMap<String, UsageCounter>,
    #[serde(default)]
    models: HashMap<String, UsageCounter>,
    #[serde(default)]
    users: HashMap<String, UsageCounter>,
}

pub struct UsageTracker {
    path: PathBuf,
    data: Mutex<UsageData>,
}

impl UsageTracker {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = match fs::read_to_string(&path) {
            Ok(body) => serde_json::from_str(&body).unwrap_or_else(|err| {
                log::warn!("usage file unreadable, starting empty: {}", err);
                UsageData::default()
            }),
            Err(_) => UsageData::default(),
        };
        Self {
            path,
            data: Mutex::new(data),
        }
    }

    pub fn record(&self, app_id: &str, model_id: &str, user_id: &str, usage: &Usage) {
        let snapshot = {
            let mut data = self.data.lock().unwrap_or_else(|p| p.into_inner());
            data.apps.entry(app_id.to_string()).or_default().record(usage);
            data.models
                .entry(model_id.to_string())
                .or_default()
                .record(usage);
            data.users
                .entry(user_id.to_string())
                .or_default()
                .record(usage);
            data.clone()
        };
        if let Err(err) = self.flush(&snapshot) {
            log::warn!("usage flush failed: {}", err);
        }
    }

    pub fn app_usage(&self, app_id: &str) -> UsageCounter {
        self.data
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .apps
            .get(app_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn model_usage(&self, model_id: &str) -> UsageCounter {
        self.data
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .models
            .get(model_id)
            .cloned()
            .unwrap_or_default()
    }

    fn flush(&self, data: &UsageData) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut body = serde_json::to_string_pretty(data)?;
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
    fn test_record_accumulates_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data/usage.json");

        let tracker = UsageTracker::open(&path);
        let usage = Usage {
            prompt_tokens: 100,
            completion_tokens: 40,
            cached_tokens: 0,
        };
        tracker.record("chat", "gpt-4o", "alice", &usage);
        tracker.record("chat", "gpt-4o", "bob", &usage);

        let app = tracker.app_usage("chat");
        assert_eq!(app.messages, 2);
        assert_eq!(app.prompt_tokens, 200);

        let reopened = UsageTracker::open(&path);
        assert_eq!(reopened.model_usage("gpt-4o").completion_tokens, 80);
        assert_eq!(reopened.app_usage("unknown").messages, 0);
    }
}
