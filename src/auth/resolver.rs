//! Group mapping and permission resolution.
//!
//! External identity-provider groups map onto internal groups via each
//! group's `mappings` list. Internal groups inherit from parents through an
//! acyclic graph; a cycle is broken at the repeat edge with a warning so
//! resolution always terminates. Resolved permissions are memoized per
//! group id, so the closure costs O(|groups|) per snapshot.

use crate::auth::permissions::Permissions;
use crate::config::types::{Group, PlatformConfig, User};
use crate::error::ApiError;
use std::collections::{HashMap, HashSet};

pub const ANONYMOUS_GROUP: &str = "anonymous";

/// Map raw external group names to internal group ids.
///
/// Unmapped names are logged once per call with guidance. An empty result
/// falls back to the platform's per-auth-method default groups, then to
/// the anonymous group.
pub fn map_external_groups(
    groups: &[Group],
    external: &[String],
    auth_method: &str,
    platform: &PlatformConfig,
) -> Vec<String> {
    let mut mapped: Vec<String> = Vec::new();
    let mut warned: HashSet<&str> = HashSet::new();

    for name in external {
        let mut hit = false;
        for group in groups {
            if group.mappings.iter().any(|m| m == name) {
                hit = true;
                if !mapped.contains(&group.id) {
                    mapped.push(group.id.clone());
                }
            }
        }
        if !hit && warned.insert(name.as_str()) {
            log::warn!(
                "external group '{}' has no internal mapping; add it to a group's 'mappings' list to grant access",
                name
            );
        }
    }

    if mapped.is_empty() {
        mapped = platform
            .default_groups
            .get(auth_method)
            .cloned()
            .unwrap_or_else(|| vec![ANONYMOUS_GROUP.to_string()]);
    }

    mapped
}

/// Resolves effective permissions over the group inheritance graph.
pub struct GroupResolver<'a> {
    by_id: HashMap<&'a str, &'a Group>,
    memo: HashMap<String, Permissions>,
}

impl<'a> GroupResolver<'a> {
    pub fn new(groups: &'a [Group]) -> Self {
        Self {
            by_id: groups.iter().map(|g| (g.id.as_str(), g)).collect(),
            memo: HashMap::new(),
        }
    }

    /// Effective permissions for a user's group set.
    pub fn effective(&mut self, group_ids: &[String]) -> Permissions {
        let mut result = Permissions::default();
        for id in group_ids {
            let resolved = self.resolve(id);
            result.merge(&resolved);
        }
        result
    }

    fn resolve(&mut self, id: &str) -> Permissions {
        if let Some(found) = self.memo.get(id) {
            return found.clone();
        }
        let mut stack = Vec::new();
        self.resolve_inner(id, &mut stack)
    }

    fn resolve_inner(&mut self, id: &str, stack: &mut Vec<String>) -> Permissions {
        if let Some(found) = self.memo.get(id) {
            return found.clone();
        }

        if stack.iter().any(|s| s == id) {
            log::warn!(
                "group inheritance cycle detected: {} -> {}; dropping the repeat edge",
                stack.join(" -> "),
                id
            );
            return Permissions::default();
        }

        let Some(group) = self.by_id.get(id).copied() else {
            log::warn!("unknown group '{}' referenced; treating as empty", id);
            return Permissions::default();
        };

        stack.push(id.to_string());
        let mut perms = Permissions {
            apps: group.permissions.apps.iter().cloned().collect(),
            prompts: group.permissions.prompts.iter().cloned().collect(),
            models: group.permissions.models.iter().cloned().collect(),
            admin_access: group.permissions.admin_access,
        };
        for parent in &group.inherits {
            let inherited = self.resolve_inner(parent, stack);
            perms.merge(&inherited);
        }
        stack.pop();

        self.memo.insert(id.to_string(), perms.clone());
        perms
    }
}

/// Compute one user's effective permissions against the current groups.
/// Anonymous users go through the same pipeline with the anonymous group.
pub fn permissions_for(groups: &[Group], user: &User) -> Permissions {
    let mut resolver = GroupResolver::new(groups);
    if user.groups.is_empty() {
        resolver.effective(&[ANONYMOUS_GROUP.to_string()])
    } else {
        resolver.effective(&user.groups)
    }
}

/// Gate for `/admin/*` operations.
///
/// Requires `admin_access` from group resolution. The admin secret is an
/// escape hatch valid ONLY while the platform runs in anonymous auth mode;
/// in any other mode presenting it must not elevate.
pub fn authorize_admin(
    perms: &Permissions,
    platform: &PlatformConfig,
    presented_secret: Option<&str>,
) -> Result<(), ApiError> {
    if perms.admin_access {
        return Ok(());
    }

    if platform.auth_mode == "anonymous" {
        if let (Some(expected), Some(given)) = (platform.admin_secret.as_deref(), presented_secret)
        {
            if !expected.is_empty() && expected == given {
                return Ok(());
            }
        }
    }

    Err(ApiError::forbidden("admin access required"))
}

/// Audit-append a user record to users.json on first external login.
/// Existing records stay untouched; raw LDAP group names ride along for
/// later re-mapping. Returns whether a record was written.
pub fn persist_first_login(
    store: &crate::config::store::ContentStore,
    user: &User,
) -> Result<bool, crate::config::store::ConfigError> {
    let mut users: Vec<User> = store.read_json("config/users.json")?.unwrap_or_default();
    if users.iter().any(|u| u.id == user.id) {
        return Ok(false);
    }
    users.push(user.clone());

    let value = serde_json::to_value(&users).map_err(|source| {
        crate::config::store::ConfigError::Json {
            path: "config/users.json".into(),
            source,
        }
    })?;
    store.write_json("config/users.json", &value)?;
    log::info!("recorded first login for user '{}'", user.id);
    Ok(true)
}

/// The public authentication-status probe. Never fails, even with an
/// expired token: the client needs `auto_redirect` to recover silently.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct AuthStatus {
    pub authenticated: bool,
    #[serde(rename = "autoRedirect")]
    pub auto_redirect: bool,
}

pub fn auth_status(user: Option<&User>, platform: &PlatformConfig) -> AuthStatus {
    AuthStatus {
        authenticated: user.map(|u| u.authenticated).unwrap_or(false),
        auto_redirect: platform.auth_mode != "anonymous" && platform.auth_mode != "local",
    }
}
