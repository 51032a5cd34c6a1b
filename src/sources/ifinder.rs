//! iFinder integration source handler.
//!
//! Searches an iFinder index on behalf of the calling user. Unlike the
//! plain URL handler this one needs an authenticated user context; the
//! query is forwarded as the search term.

use crate::config::types::SourceConfig;
use crate::sources::handler::{SourceContent, SourceContext, SourceError, SourceHandler};
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub struct IFinderHandler {
    client: reqwest::Client,
}

impl IFinderHandler {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(config: &SourceConfig) -> Result<&str, SourceError> {
        config
            .config
            .get("endpoint")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                SourceError::InvalidConfig("ifinder source needs an 'endpoint'".into())
            })
    }
}

impl Default for IFinderHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SourceHandler for IFinderHandler {
    fn default_ttl(&self) -> u64 {
        120
    }

    fn validate(&self, config: &SourceConfig) -> Result<(), SourceError> {
        Self::endpoint(config).map(|_| ())
    }

    async fn load(
        &self,
        config: &SourceConfig,
        ctx: &SourceContext,
    ) -> Result<SourceContent, SourceError> {
        if !ctx.user.authenticated {
            return Err(SourceError::AuthRequired);
        }

        let endpoint = Self::endpoint(config)?;
        let search_profile = config
            .config
            .get("searchProfile")
            .and_then(Value::as_str)
            .unwrap_or("default");
        let query = ctx.query.clone().unwrap_or_default();

        let api_key = std::env::var("IFINDER_API_KEY")
            .map_err(|_| SourceError::Load("IFINDER_API_KEY is not set".into()))?;

        let response = self
            .client
            .post(endpoint)
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&json!({
                "query": query,
                "profile": search_profile,
                "user": ctx.user.id,
            }))
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    SourceError::Timeout
                } else {
                    SourceError::Load(err.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(SourceError::Load(format!("HTTP {}", response.status())));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| SourceError::Load(err.to_string()))?;

        // Concatenate hit teasers into prompt-ready text.
        let content = body
            .get("results")
            .and_then(Value::as_array)
            .map(|hits| {
                hits.iter()
                    .filter_map(|hit| hit.get("teaser").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n\n")
            })
            .unwrap_or_default();

        Ok(SourceContent {
            content,
            meta: json!({ "profile": search_profile, "query": query }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::User;

    #[tokio::test]
    async fn test_anonymous_user_rejected() {
        let handler = IFinderHandler::new();
        let config: SourceConfig = serde_json::from_value(json!({
            "id": "kb", "type": "ifinder", "config": {"endpoint": "https://find.example/api"}
        }))
        .unwrap();
        let ctx = SourceContext::for_user(User::anonymous(), "en");
        assert!(matches!(
            handler.load(&config, &ctx).await,
            Err(SourceError::AuthRequired)
        ));
    }

    #[test]
    fn test_validate_requires_endpoint() {
        let handler = IFinderHandler::new();
        let config: SourceConfig = serde_json::from_value(json!({
            "id": "kb", "type": "ifinder", "config": {}
        }))
        .unwrap();
        assert!(handler.validate(&config).is_err());
    }
}
