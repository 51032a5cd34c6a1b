//! Content-derived ETags.
//!
//! An ETag hashes the content actually returned to a caller, so two users
//! with different filtered views get different tags and identical views get
//! identical tags. User-view tags compose the base resource's global tag
//! with the first 8 hex chars of the view hash, which keeps tags
//! content-isomorphic without leaking who asked.

use md5::{Digest, Md5};
use serde::Serialize;
use serde_json::Value;

/// Hash a serializable value into a full-length ETag.
pub fn etag_for<T: Serialize>(value: &T) -> String {
    let json = serde_json::to_value(value).unwrap_or(Value::Null);
    let canonical = canonical_json(&json);
    let mut hasher = Md5::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compose a user-view ETag from the base resource's global tag.
pub fn compose_view_etag<T: Serialize>(global: &str, view: &T) -> String {
    let hash = etag_for(view);
    format!("{}-{}", global, &hash[..8])
}

/// Does a client's `If-None-Match` header satisfy the current tag?
pub fn if_none_match(header: Option<&str>, current: &str) -> bool {
    let Some(header) = header else {
        return false;
    };
    header
        .split(',')
        .map(|t| t.trim().trim_matches('"'))
        .any(|t| t == current || t == "*")
}

/// JSON with recursively sorted object keys, so hashing is independent of
/// map iteration order.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let body: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", body.join(","))
        }
        Value::Array(items) => {
            let body: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", body.join(","))
        }
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}
