//! Error taxonomy for the auth core.
//!
//! Credential, session, token, MFA and crypto failures all collapse into a
//! payload-free `Unauthorized` so callers cannot distinguish "wrong password"
//! from "unknown user" or "undecryptable secret". Internal detail is logged
//! server-side and never serialized into the response body.

use serde::Serialize;
use thiserror::Error;

use crate::policy::PolicyViolation;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{0}")]
    Policy(PolicyViolation),

    #[error("Invalid credentials")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(&'static str),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Too many requests")]
    RateLimited { retry_after_ms: u64 },

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    /// HTTP-equivalent status code for the request-handling layer.
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::Validation(_) | AuthError::Policy(_) => 400,
            AuthError::Unauthorized | AuthError::TokenExpired => 401,
            AuthError::Forbidden(_) => 403,
            AuthError::NotFound(_) => 404,
            AuthError::RateLimited { .. } => 429,
            AuthError::Internal(_) => 500,
        }
    }

    /// Stable key for the localization layer.
    pub fn message_key(&self) -> &'static str {
        match self {
            AuthError::Validation(_) => "error.validation",
            AuthError::Policy(violation) => violation.message_key(),
            AuthError::Unauthorized => "error.invalid_credentials",
            AuthError::Forbidden(_) => "error.forbidden",
            AuthError::NotFound(_) => "error.not_found",
            AuthError::TokenExpired => "error.token_expired",
            AuthError::RateLimited { .. } => "error.rate_limited",
            AuthError::Internal(_) => "error.internal",
        }
    }

    /// Serializable body for the caller. Internal detail is logged here and
    /// replaced with a generic message.
    pub fn to_body(&self) -> ErrorBody {
        let (error, retry_after_ms) = match self {
            AuthError::Validation(msg) => (msg.clone(), None),
            AuthError::Policy(violation) => (violation.to_string(), None),
            AuthError::Unauthorized => ("Invalid credentials".to_string(), None),
            AuthError::Forbidden(msg) => ((*msg).to_string(), None),
            AuthError::NotFound(msg) => (msg.clone(), None),
            AuthError::TokenExpired => ("Token expired".to_string(), None),
            AuthError::RateLimited { retry_after_ms } => (
                "Too many requests. Please try again later.".to_string(),
                Some(*retry_after_ms),
            ),
            AuthError::Internal(e) => {
                tracing::error!(error = %e, "internal error surfaced to caller");
                ("Internal server error".to_string(), None)
            }
        };

        ErrorBody {
            error,
            message_key: self.message_key(),
            retry_after_ms,
        }
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        AuthError::Internal(anyhow::Error::new(err))
    }
}

impl From<validator::ValidationErrors> for AuthError {
    fn from(err: validator::ValidationErrors) -> Self {
        AuthError::Validation(err.to_string())
    }
}

/// Structured error body handed to the request layer.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message_key: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AuthError::Unauthorized.status_code(), 401);
        assert_eq!(AuthError::TokenExpired.status_code(), 401);
        assert_eq!(AuthError::Forbidden("nope").status_code(), 403);
        assert_eq!(
            AuthError::RateLimited { retry_after_ms: 10 }.status_code(),
            429
        );
    }

    #[test]
    fn test_unauthorized_body_is_generic() {
        let body = AuthError::Unauthorized.to_body();
        assert_eq!(body.error, "Invalid credentials");
        assert_eq!(body.message_key, "error.invalid_credentials");
    }

    #[test]
    fn test_internal_body_hides_detail() {
        let err = AuthError::Internal(anyhow::anyhow!("connection refused to db-7"));
        let body = err.to_body();
        assert!(!body.error.contains("db-7"));
    }

    #[test]
    fn test_rate_limited_carries_retry_hint() {
        let body = AuthError::RateLimited {
            retry_after_ms: 3_600_000,
        }
        .to_body();
        assert_eq!(body.retry_after_ms, Some(3_600_000));
    }

    #[test]
    fn test_body_wire_shape() {
        let rate_limited = serde_json::to_value(
            AuthError::RateLimited {
                retry_after_ms: 1500,
            }
            .to_body(),
        )
        .unwrap();
        assert_eq!(rate_limited["retry_after_ms"], 1500);
        assert_eq!(rate_limited["message_key"], "error.rate_limited");

        // The retry hint is omitted entirely on other errors.
        let unauthorized = serde_json::to_value(AuthError::Unauthorized.to_body()).unwrap();
        assert!(unauthorized.get("retry_after_ms").is_none());
    }
}
