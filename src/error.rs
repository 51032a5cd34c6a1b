//! Gateway-level error envelope
//!
//! Errors that cross the library boundary toward the HTTP router carry a
//! stable machine-readable code and the status the router should answer
//! with. Internal errors get a correlation id; their details go to the log
//! only.

use serde::Serialize;
use uuid::Uuid;

/// Error kinds surfaced to API callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Missing or expired credentials
    Auth { token_expired: bool },
    /// Authenticated but not permitted
    Forbidden,
    /// The feature is switched off in platform config
    FeatureDisabled,
    /// Payload failed schema validation; `pointer` names the offending field
    Validation,
    /// Unknown resource id
    NotFound,
    /// Rate limit exceeded
    RateLimit,
    /// Upstream LLM failure, provider message preserved
    Provider,
    /// Tool execution failed fatally
    Tool,
    /// The request was cancelled
    Cancelled,
    /// Anything else; details are logged under the correlation id
    Internal,
}

#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub code: &'static str,
    pub message: String,
    /// JSON pointer to the offending field for validation errors
    pub pointer: Option<String>,
    /// Set for internal errors; the same id is written to the log
    pub correlation_id: Option<String>,
}

impl ApiError {
    pub fn auth(message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Auth {
                token_expired: false,
            },
            code: "AUTH_REQUIRED",
            message: message.into(),
            pointer: None,
            correlation_id: None,
        }
    }

    pub fn token_expired(message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Auth {
                token_expired: true,
            },
            code: "TOKEN_EXPIRED",
            message: message.into(),
            pointer: None,
            correlation_id: None,
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Forbidden,
            code: "FORBIDDEN",
            message: message.into(),
            pointer: None,
            correlation_id: None,
        }
    }

    pub fn feature_disabled(feature: &str) -> Self {
        Self {
            kind: ApiErrorKind::FeatureDisabled,
            code: "FEATURE_DISABLED",
            message: format!("Feature '{}' is disabled", feature),
            pointer: None,
            correlation_id: None,
        }
    }

    pub fn validation(pointer: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Validation,
            code: "VALIDATION_FAILED",
            message: message.into(),
            pointer: Some(pointer.into()),
            correlation_id: None,
        }
    }

    pub fn not_found(resource: &str, id: &str) -> Self {
        Self {
            kind: ApiErrorKind::NotFound,
            code: "NOT_FOUND",
            message: format!("{} '{}' not found", resource, id),
            pointer: None,
            correlation_id: None,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::RateLimit,
            code: "RATE_LIMITED",
            message: message.into(),
            pointer: None,
            correlation_id: None,
        }
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Provider,
            code: "PROVIDER_ERROR",
            message: message.into(),
            pointer: None,
            correlation_id: None,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: ApiErrorKind::Cancelled,
            code: "CANCELLED",
            message: "Request cancelled".to_string(),
            pointer: None,
            correlation_id: None,
        }
    }

    /// Wrap an internal failure. The detailed cause is logged under a fresh
    /// correlation id; the caller only ever sees the id.
    pub fn internal(detail: impl std::fmt::Display) -> Self {
        let correlation_id = Uuid::new_v4().to_string();
        log::error!("internal error [{}]: {}", correlation_id, detail);
        Self {
            kind: ApiErrorKind::Internal,
            code: "INTERNAL_ERROR",
            message: "Internal server error".to_string(),
            pointer: None,
            correlation_id: Some(correlation_id),
        }
    }

    /// HTTP status the router should answer with.
    pub fn status(&self) -> u16 {
        match self.kind {
            ApiErrorKind::Auth { .. } => 401,
            ApiErrorKind::Forbidden | ApiErrorKind::FeatureDisabled => 403,
            ApiErrorKind::Validation => 400,
            ApiErrorKind::NotFound => 404,
            ApiErrorKind::RateLimit => 429,
            ApiErrorKind::Provider => 502,
            ApiErrorKind::Tool => 500,
            ApiErrorKind::Cancelled => 499,
            ApiErrorKind::Internal => 500,
        }
    }

    /// Serializable body for the router.
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code,
            message: self.message.clone(),
            pointer: self.pointer.clone(),
            correlation_id: self.correlation_id.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pointer: Option<String>,
    #[serde(rename = "correlationId", skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}
