//! URL source handler.
//!
//! Fetches a page with configurable headers and timeout and extracts the
//! primary text content (script/style stripped, tags removed) when the
//! response is HTML.

use crate::config::types::SourceConfig;
use crate::sources::handler::{SourceContent, SourceContext, SourceError, SourceHandler};
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_BODY_BYTES: usize = 1024 * 1024;

pub struct UrlHandler {
    client: reqwest::Client,
}

impl UrlHandler {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn url_of(config: &SourceConfig) -> Result<&str, SourceError> {
        let url = config
            .config
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| SourceError::InvalidConfig("url source needs a 'url'".into()))?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(SourceError::InvalidConfig(
                "only http(s) URLs are allowed".into(),
            ));
        }
        Ok(url)
    }

    /// Strip tags and collapse whitespace; drops script/style bodies.
    pub(crate) fn extract_text(html: &str) -> String {
        let mut out = String::with_capacity(html.len() / 4);
        let mut rest = html;

        while let Some(start) = rest.find('<') {
            out.push_str(&rest[..start]);
            rest = &rest[start..];

            let lower = rest.to_ascii_lowercase();
            let skip_to = if lower.starts_with("<script") {
                lower.find("</script>").map(|i| i + "</script>".len())
            } else if lower.starts_with("<style") {
                lower.find("</style>").map(|i| i + "</style>".len())
            } else {
                rest.find('>').map(|i| i + 1)
            };

            match skip_to {
                Some(end) => rest = &rest[end..],
                None => {
                    rest = "";
                }
            }
            out.push(' ');
        }
        out.push_str(rest);

        out.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

impl Default for UrlHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SourceHandler for UrlHandler {
    fn default_ttl(&self) -> u64 {
        300
    }

    fn validate(&self, config: &SourceConfig) -> Result<(), SourceError> {
        Self::url_of(config).map(|_| ())
    }

    async fn load(
        &self,
        config: &SourceConfig,
        _ctx: &SourceContext,
    ) -> Result<SourceContent, SourceError> {
        let url = Self::url_of(config)?;
        let timeout = config
            .config
            .get("timeoutSeconds")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let mut request = self.client.get(url).timeout(Duration::from_secs(timeout));
        if let Some(headers) = config.config.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name.as_str(), value);
                }
            }
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                SourceError::Timeout
            } else {
                SourceError::Load(err.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(SourceError::Load(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let mut body = response
            .text()
            .await
            .map_err(|err| SourceError::Load(err.to_string()))?;
        if body.len() > MAX_BODY_BYTES {
            let mut cut = MAX_BODY_BYTES;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }

        let content = if content_type.contains("html") {
            Self::extract_text(&body)
        } else {
            body
        };

        Ok(SourceContent {
            content,
            meta: json!({ "url": url, "contentType": content_type }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_extraction_strips_tags_and_scripts() {
        let html = r#"<html><head><style>body{color:red}</style></head>
            <body><h1>Title</h1><script>alert("x")</script><p>Hello <b>world</b></p></body></html>"#;
        let text = UrlHandler::extract_text(html);
        assert!(text.contains("Title"));
        assert!(text.contains("Hello world"));
        assert!(!text.contains("alert"));
        assert!(!text.contains("color:red"));
    }

    #[test]
    fn test_validate_rejects_non_http() {
        let handler = UrlHandler::new();
        let config: SourceConfig = serde_json::from_value(json!({
            "id": "s", "type": "url", "config": {"url": "ftp://example.com"}
        }))
        .unwrap();
        assert!(handler.validate(&config).is_err());
    }

    #[test]
    fn test_validate_requires_url() {
        let handler = UrlHandler::new();
        let config: SourceConfig = serde_json::from_value(json!({
            "id": "s", "type": "url", "config": {}
        }))
        .unwrap();
        assert!(handler.validate(&config).is_err());
    }
}
