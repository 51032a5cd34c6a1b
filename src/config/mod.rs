//! Configuration layer: on-disk store, typed entities, snapshot cache.

pub mod cache;
pub mod etag;
pub mod store;
pub mod types;

pub use cache::{ConfigCache, FilteredView, Resource, Snapshot};
pub use etag::{compose_view_etag, etag_for, if_none_match};
pub use store::{ConfigError, ContentStore};
