use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Gateway error taxonomy.
///
/// Connection-scoped variants are reported to the client as `error` frames
/// carrying [`GatewayError::error_code`]; HTTP-surface variants map through
/// [`IntoResponse`].
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("authentication timed out")]
    AuthTimeout,

    #[error("invalid message: {0}")]
    Validation(String),

    #[error("message rate limit exceeded")]
    RateLimited,

    #[error("session {session_id} already has {limit} connections")]
    Capacity { session_id: String, limit: usize },

    #[error("upstream unavailable: {0}")]
    Upstream(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable machine-readable code carried in `error` frames.
    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::Config(_) => "configuration_error",
            GatewayError::Auth(_) => "authentication_failed",
            GatewayError::AuthTimeout => "authentication_timeout",
            GatewayError::Validation(_) => "validation_error",
            GatewayError::RateLimited => "rate_limited",
            GatewayError::Capacity { .. } => "capacity_exceeded",
            GatewayError::Upstream(_) => "upstream_unavailable",
            GatewayError::Serialization(_) => "serialization_error",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Auth(_) | GatewayError::AuthTimeout => StatusCode::UNAUTHORIZED,
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Capacity { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Config(_)
            | GatewayError::Serialization(_)
            | GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": {
                "code": self.error_code(),
                "message": self.to_string(),
            }
        }));
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(
            GatewayError::Auth("bad key".into()).error_code(),
            "authentication_failed"
        );
        assert_eq!(GatewayError::RateLimited.error_code(), "rate_limited");
        assert_eq!(
            GatewayError::Capacity {
                session_id: "s1".into(),
                limit: 5
            }
            .error_code(),
            "capacity_exceeded"
        );
    }

    #[test]
    fn capacity_message_names_session_and_limit() {
        let err = GatewayError::Capacity {
            session_id: "s1".into(),
            limit: 2,
        };
        assert_eq!(err.to_string(), "session s1 already has 2 connections");
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(
            GatewayError::RateLimited.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            GatewayError::AuthTimeout.status_code(),
            StatusCode::UNAUTHORIZED
        );
    }
}
