//! Group-based authorization: mapping, inheritance, filtering.

pub mod permissions;
pub mod resolver;

pub use permissions::Permissions;
pub use resolver::{
    auth_status, authorize_admin, map_external_groups, permissions_for, persist_first_login,
    AuthStatus, GroupResolver, ANONYMOUS_GROUP,
};
