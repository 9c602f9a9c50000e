use std::sync::Arc;

use async_graphql::{Error, ErrorExtensions};
use serde::Serialize;
use thiserror::Error;

/// Shared result type for the calling layers.
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error, Clone)]
pub enum ApiError {
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad request: {0}")]
    InvalidInput(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("internal server error")]
    Internal(Arc<anyhow::Error>),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::InvalidInput(_) => "INVALID_INPUT",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::Internal(_) => "INTERNAL",
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        tracing::error!(error = %err, "internal error");
        Self::Internal(Arc::new(err))
    }

    /// Conflicts are the only errors a caller should retry, from a fresh read.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Conflict(_))
    }

    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload {
            code: self.code(),
            message: self.to_string(),
            retryable: self.is_retryable(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        Self::internal(value)
    }
}

impl ErrorExtensions for ApiError {
    fn extend(&self) -> Error {
        let mut err = Error::new(self.to_string());
        err = err.extend_with(|_err, e| {
            e.set("code", self.code());
        });
        if let ApiError::InvalidInput(_) = self {
            err = err.extend_with(|_err, e| {
                e.set("type", "BAD_REQUEST");
            });
        }
        if self.is_retryable() {
            err = err.extend_with(|_err, e| {
                e.set("retryable", true);
            });
        }
        err
    }
}

/// Structured error body rendered by non-GraphQL callers.
#[derive(Clone, Debug, Serialize)]
pub struct ErrorPayload {
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
}

/// Convert any error into a GraphQL error payload while hiding internals.
pub fn internal_error(err: impl Into<anyhow::Error>) -> Error {
    ApiError::internal(err.into()).extend()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_graphql::Value;

    #[test]
    fn internal_errors_are_masked() {
        let err = internal_error(anyhow::anyhow!("boom"));
        assert_eq!(err.message, "internal server error");
        let extra = err.extensions.as_ref().and_then(|map| map.get("code"));
        let code = extra.cloned();
        assert_eq!(code, Some(Value::from("INTERNAL")));
    }

    #[test]
    fn conflicts_are_flagged_retryable() {
        let err = ApiError::Conflict("item moved concurrently".into());
        let extended = err.extend();
        let retryable = extended
            .extensions
            .as_ref()
            .and_then(|map| map.get("retryable"))
            .cloned();
        assert_eq!(retryable, Some(Value::from(true)));

        let body = serde_json::to_value(err.payload()).unwrap();
        assert_eq!(body["code"], "CONFLICT");
        assert_eq!(body["retryable"], true);
    }

    #[test]
    fn not_found_payload_keeps_message() {
        let payload = ApiError::NotFound("deal category 42".into()).payload();
        assert_eq!(payload.code, "NOT_FOUND");
        assert_eq!(payload.message, "not found: deal category 42");
        assert!(!payload.retryable);
    }
}
