//! Effective permission sets.
//!
//! Each resource list may hold the wildcard `*`, which subsumes any
//! explicit ids. Merging permission sets unions the lists and ORs
//! `admin_access`.

use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Permissions {
    pub apps: BTreeSet<String>,
    pub prompts: BTreeSet<String>,
    pub models: BTreeSet<String>,
    pub admin_access: bool,
}

pub const WILDCARD: &str = "*";

impl Permissions {
    pub fn merge(&mut self, other: &Permissions) {
        merge_list(&mut self.apps, &other.apps);
        merge_list(&mut self.prompts, &other.prompts);
        merge_list(&mut self.models, &other.models);
        self.admin_access |= other.admin_access;
    }

    pub fn allows_app(&self, id: &str) -> bool {
        allows(&self.apps, id)
    }

    pub fn allows_prompt(&self, id: &str) -> bool {
        allows(&self.prompts, id)
    }

    pub fn allows_model(&self, id: &str) -> bool {
        allows(&self.models, id)
    }
}

fn allows(list: &BTreeSet<String>, id: &str) -> bool {
    list.contains(WILDCARD) || list.contains(id)
}

fn merge_list(into: &mut BTreeSet<String>, from: &BTreeSet<String>) {
    if into.contains(WILDCARD) {
        return;
    }
    if from.contains(WILDCARD) {
        into.clear();
        into.insert(WILDCARD.to_string());
        return;
    }
    into.extend(from.iter().cloned());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_wildcard_subsumes_explicit() {
        let mut a = Permissions {
            apps: set(&["chat"]),
            ..Default::default()
        };
        let b = Permissions {
            apps: set(&["*"]),
            ..Default::default()
        };
        a.merge(&b);
        assert_eq!(a.apps, set(&["*"]));
        assert!(a.allows_app("anything"));
    }

    #[test]
    fn test_union_of_explicit_lists() {
        let mut a = Permissions {
            apps: set(&["chat"]),
            ..Default::default()
        };
        let b = Permissions {
            apps: set(&["translate"]),
            admin_access: true,
            ..Default::default()
        };
        a.merge(&b);
        assert!(a.allows_app("chat"));
        assert!(a.allows_app("translate"));
        assert!(!a.allows_app("other"));
        assert!(a.admin_access);
    }
}
