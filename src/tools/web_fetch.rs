//! Built-in URL fetch tool.
//!
//! Gives models a bounded way to pull a page: http(s) only, capped
//! response size, fixed timeout. The result carries status, content type
//! and the (possibly truncated) body text.

use crate::tools::registry::{ToolContext, ToolError, ToolExecutor};
use serde_json::{json, Value};
use std::time::Duration;

pub const WEB_FETCH_TOOL_ID: &str = "webFetch";

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_BODY_BYTES: usize = 512 * 1024;

pub struct WebFetchTool {
    client: reqwest::Client,
}

impl WebFetchTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn parameters() -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "The http(s) URL to fetch"}
            },
            "required": ["url"]
        })
    }

    pub fn description() -> &'static str {
        "Fetch a web page and return its textual content."
    }
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ToolExecutor for WebFetchTool {
    async fn invoke(
        &self,
        _function: &str,
        args: Value,
        ctx: &ToolContext,
    ) -> Result<Value, ToolError> {
        let url = args
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments {
                tool: WEB_FETCH_TOOL_ID.to_string(),
                reason: "url is required".to_string(),
            })?;

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ToolError::InvalidArguments {
                tool: WEB_FETCH_TOOL_ID.to_string(),
                reason: "only http(s) URLs are allowed".to_string(),
            });
        }

        if let Some(actions) = &ctx.actions {
            actions.emit(WEB_FETCH_TOOL_ID, "fetching", Some(json!({"url": url})));
        }

        let response = self
            .client
            .get(url)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|err| ToolError::Execution(format!("fetch failed: {}", err)))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let body = response
            .text()
            .await
            .map_err(|err| ToolError::Execution(format!("body read failed: {}", err)))?;

        let mut truncated = false;
        let mut body = body;
        if body.len() > MAX_BODY_BYTES {
            let mut cut = MAX_BODY_BYTES;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
            truncated = true;
        }

        Ok(json!({
            "status": status,
            "contentType": content_type,
            "truncated": truncated,
            "body": body,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::User;

    fn ctx() -> ToolContext {
        ToolContext::new(User::anonymous(), "c", "en")
    }

    #[tokio::test]
    async fn test_rejects_non_http_schemes() {
        let tool = WebFetchTool::new();
        let err = tool
            .invoke("webFetch", json!({"url": "file:///etc/passwd"}), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn test_rejects_missing_url() {
        let tool = WebFetchTool::new();
        let err = tool.invoke("webFetch", json!({}), &ctx()).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }
}
