//! External content sources: handlers, caching, prompt/tool exposure.

pub mod cache;
pub mod filesystem;
pub mod handler;
pub mod ifinder;
pub mod manager;
pub mod page;
pub mod url;

pub use handler::{SourceContent, SourceContext, SourceError, SourceHandler};
pub use manager::{substitute_sources, SourceManager, SourceToolExecutor};
