//! Source handler contract.

use crate::config::types::{SourceConfig, User};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("invalid source config: {0}")]
    InvalidConfig(String),

    #[error("source '{0}' not found")]
    NotFound(String),

    #[error("source requires an authenticated user")]
    AuthRequired,

    #[error("source load failed: {0}")]
    Load(String),

    #[error("source load timed out")]
    Timeout,
}

/// Loaded source payload plus handler metadata.
#[derive(Debug, Clone)]
pub struct SourceContent {
    pub content: String,
    pub meta: Value,
}

/// Request-scoped context for source loads.
#[derive(Debug, Clone)]
pub struct SourceContext {
    pub user: User,
    pub language: String,
    /// Optional scoped query when the source is exposed as a tool.
    pub query: Option<String>,
}

impl SourceContext {
    pub fn for_user(user: User, language: impl Into<String>) -> Self {
        Self {
            user,
            language: language.into(),
            query: None,
        }
    }
}

/// Uniform handler interface: validate the type-specific config up front,
/// then load content on demand.
#[async_trait::async_trait]
pub trait SourceHandler: Send + Sync {
    /// Default cache TTL in seconds for this handler type.
    fn default_ttl(&self) -> u64;

    fn validate(&self, config: &SourceConfig) -> Result<(), SourceError>;

    async fn load(
        &self,
        config: &SourceConfig,
        ctx: &SourceContext,
    ) -> Result<SourceContent, SourceError>;
}
