//! Per-IP sliding-window rate limiting.
//!
//! Four independent buckets (public, admin, auth, inference) with their
//! own window and limit; platform config overrides replace only the
//! fields they name. In-memory, intended for single-instance
//! deployments. Every decision carries the standard RateLimit-* header
//! values for the router to attach.

use crate::config::types::{PlatformConfig, RateLimitOverride};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Public,
    Admin,
    Auth,
    Inference,
}

impl Bucket {
    pub const ALL: [Bucket; 4] = [Bucket::Public, Bucket::Admin, Bucket::Auth, Bucket::Inference];

    fn config_key(&self) -> &'static str {
        match self {
            Bucket::Public => "public",
            Bucket::Admin => "admin",
            Bucket::Auth => "auth",
            Bucket::Inference => "inference",
        }
    }

    fn defaults(&self) -> (Duration, u32) {
        let window = Duration::from_secs(15 * 60);
        match self {
            Bucket::Public => (window, 100),
            Bucket::Admin => (window, 50),
            Bucket::Auth => (window, 30),
            Bucket::Inference => (window, 60),
        }
    }
}

/// Outcome of one rate-limit check, with header values.
#[derive(Debug, Clone)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the window frees a slot.
    pub reset_seconds: u64,
    /// `RateLimit-Policy` value, e.g. `100;w=900`.
    pub policy: String,
}

struct BucketConfig {
    window: Duration,
    limit: u32,
}

pub struct RateLimiter {
    configs: HashMap<Bucket, BucketConfig>,
    /// (bucket, ip) -> request timestamps within the window
    hits: Mutex<HashMap<(Bucket, String), Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(platform: &PlatformConfig) -> Self {
        let mut configs = HashMap::new();
        for bucket in Bucket::ALL {
            let (mut window, mut limit) = bucket.defaults();
            if let Some(overrides) = platform.rate_limits.get(bucket.config_key()) {
                apply_override(&mut window, &mut limit, overrides);
            }
            configs.insert(bucket, BucketConfig { window, limit });
        }
        Self {
            configs,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Record a request from `ip` and decide whether it may proceed.
    pub fn check(&self, bucket: Bucket, ip: &str) -> Decision {
        let config = &self.configs[&bucket];
        let now = Instant::now();

        let mut hits = self.hits.lock().unwrap_or_else(|p| p.into_inner());
        let entry = hits.entry((bucket, ip.to_string())).or_default();
        entry.retain(|t| now.duration_since(*t) < config.window);

        let allowed = (entry.len() as u32) < config.limit;
        if allowed {
            entry.push(now);
        }

        let remaining = config.limit.saturating_sub(entry.len() as u32);
        let reset_seconds = entry
            .first()
            .map(|oldest| {
                config
                    .window
                    .saturating_sub(now.duration_since(*oldest))
                    .as_secs()
            })
            .unwrap_or(0);

        Decision {
            allowed,
            limit: config.limit,
            remaining,
            reset_seconds,
            policy: format!("{};w={}", config.limit, config.window.as_secs()),
        }
    }

    /// Drop windows with no recent hits; called opportunistically.
    pub fn prune(&self) {
        let mut hits = self.hits.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();
        hits.retain(|(bucket, _), stamps| {
            let window = self.configs[bucket].window;
            stamps.retain(|t| now.duration_since(*t) < window);
            !stamps.is_empty()
        });
    }
}

impl Decision {
    /// Header values in response order.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("RateLimit-Policy", self.policy.clone()),
            ("RateLimit-Limit", self.limit.to_string()),
            ("RateLimit-Remaining", self.remaining.to_string()),
            ("RateLimit-Reset", self.reset_seconds.to_string()),
        ]
    }
}

fn apply_override(window: &mut Duration, limit: &mut u32, overrides: &RateLimitOverride) {
    if let Some(window_ms) = overrides.window_ms {
        *window = Duration::from_millis(window_ms);
    }
    if let Some(new_limit) = overrides.limit {
        *limit = new_limit;
    }
}
