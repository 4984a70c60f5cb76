use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Every error the gateway can surface, from a malformed client request down
/// to an upstream network fault. Maps 1:1 onto the error taxonomy: each
/// variant knows its own HTTP status and OpenAI `type` string.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("Model '{0}' not found")]
    ModelNotFound(String),

    #[error("Model '{0}' not available on this endpoint")]
    ModelNotAvailable(String),

    #[error("upstream authentication failed: {0}")]
    UpstreamAuth(String),

    #[error("upstream rate limited: {0}")]
    RateLimited(String),

    #[error("upstream timed out")]
    Timeout,

    #[error("upstream error: {0}")]
    UpstreamError(String),

    #[error("{0}")]
    Internal(String),

    #[error("config error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Upstream(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::ModelNotFound(_) => StatusCode::NOT_FOUND,
            AppError::ModelNotAvailable(_) => StatusCode::FORBIDDEN,
            AppError::UpstreamAuth(_) => StatusCode::UNAUTHORIZED,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::UpstreamError(_) => StatusCode::BAD_GATEWAY,
            AppError::ConfigError(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_)
            | AppError::Database(_)
            | AppError::Migrate(_)
            | AppError::Io(_)
            | AppError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Upstream(e) => {
                if e.is_timeout() {
                    StatusCode::GATEWAY_TIMEOUT
                } else {
                    StatusCode::BAD_GATEWAY
                }
            }
        }
    }

    /// The OpenAI `error.type` string for this kind of failure. `type` stays
    /// `invalid_request_error` even for the unknown-model case — the
    /// distinguishing detail lives in `code` (`model_not_found`) instead, per
    /// the literal response body in the unknown-model end-to-end scenario.
    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::InvalidRequest(_) => "invalid_request_error",
            AppError::ModelNotFound(_) => "invalid_request_error",
            AppError::ModelNotAvailable(_) => "permission_denied",
            AppError::UpstreamAuth(_) => "authentication_error",
            AppError::RateLimited(_) => "rate_limit_error",
            AppError::Timeout => "timeout",
            AppError::UpstreamError(_) | AppError::Upstream(_) => "upstream_error",
            AppError::ConfigError(_) => "invalid_request_error",
            AppError::Internal(_)
            | AppError::Database(_)
            | AppError::Migrate(_)
            | AppError::Io(_)
            | AppError::Json(_) => "internal_error",
        }
    }

    /// `param` field for errors tied to a specific request field, matching
    /// the literal scenarios in the spec (e.g. unknown model names `model`).
    pub fn param(&self) -> Option<&'static str> {
        match self {
            AppError::ModelNotFound(_) | AppError::ModelNotAvailable(_) => Some("model"),
            _ => None,
        }
    }

    /// Machine-readable `code`, used by the unknown-model scenario.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            AppError::ModelNotFound(_) => Some("model_not_found"),
            _ => None,
        }
    }

    /// The usage-record status this error maps to, per §4.2 step 7 and §8.
    pub fn usage_status(&self) -> &'static str {
        match self {
            AppError::Timeout => "timeout",
            AppError::UpstreamError(_) | AppError::Upstream(_) | AppError::UpstreamAuth(_) | AppError::RateLimited(_) => {
                "upstream_error"
            }
            _ => "client_error",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    message: String,
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    param: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Upstream response bodies are never forwarded verbatim; only the
        // message text (already produced by our own Display impl) escapes.
        let message = self.to_string();
        tracing::error!(kind = self.error_type(), %message, "request failed");
        let body = ErrorBody {
            error: ErrorDetail {
                message,
                kind: self.error_type(),
                param: self.param(),
                code: self.code(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_not_found_maps_to_404() {
        let err = AppError::ModelNotFound("gpt-4".to_string());
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.error_type(), "invalid_request_error");
        assert_eq!(err.code(), Some("model_not_found"));
        assert_eq!(err.param(), Some("model"));
    }

    #[test]
    fn not_available_maps_to_403() {
        let err = AppError::ModelNotAvailable("secret-4".to_string());
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(err.error_type(), "permission_denied");
        assert_eq!(err.usage_status(), "client_error");
    }

    #[test]
    fn timeout_maps_to_504() {
        let err = AppError::Timeout;
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(err.usage_status(), "timeout");
    }
}
