use std::sync::Arc;

use async_graphql::{Error, ErrorExtensions};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Shared result type for resolvers and handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error, Clone)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("{0}")]
    NotFound(String),
    #[error("bad request: {0}")]
    InvalidInput(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("internal server error")]
    Internal {
        summary: &'static str,
        cause: Arc<anyhow::Error>,
    },
}

/// JSON body returned by the REST handlers.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "UNAUTHENTICATED",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::InvalidInput(_) => "VALIDATION",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            ApiError::Internal { .. } => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self::internal_with("internal server error", err)
    }

    /// Internal error with a client-safe summary. The source is only logged.
    pub fn internal_with(summary: &'static str, err: anyhow::Error) -> Self {
        Self::Internal {
            summary,
            cause: Arc::new(err),
        }
    }

    pub fn body(&self) -> ErrorBody {
        match self {
            ApiError::InvalidInput(msg) => ErrorBody {
                error: "Invalid request".into(),
                details: Some(msg.clone()),
            },
            ApiError::Internal { summary, .. } => ErrorBody {
                error: (*summary).to_string(),
                details: Some("internal server error".into()),
            },
            other => ErrorBody {
                error: other.to_string(),
                details: None,
            },
        }
    }

    fn log(&self) {
        if let ApiError::Internal { summary, cause } = self {
            error!(error = ?cause, summary, "request failed");
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
        self.log();
        let code = self.code();
        Error::new(self.to_string()).extend_with(|_err, e| {
            e.set("code", code);
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log();
        (self.status(), Json(self.body())).into_response()
    }
}

/// Convert any error into a GraphQL error payload while hiding internals.
pub fn internal_error(err: impl Into<anyhow::Error>) -> Error {
    ApiError::internal(err.into()).extend()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_graphql::Value;
    use http_body_util::BodyExt;

    #[test]
    fn internal_errors_are_masked() {
        let err = internal_error(anyhow::anyhow!("relation \"deals\" does not exist"));
        assert_eq!(err.message, "internal server error");
        let code = err
            .extensions
            .as_ref()
            .and_then(|map| map.get("code"))
            .cloned();
        assert_eq!(code, Some(Value::from("INTERNAL")));
    }

    #[test]
    fn validation_errors_carry_code() {
        let err = ApiError::invalid("minPrice must be a number").extend();
        assert_eq!(err.message, "bad request: minPrice must be a number");
        let code = err
            .extensions
            .as_ref()
            .and_then(|map| map.get("code"))
            .cloned();
        assert_eq!(code, Some(Value::from("VALIDATION")));
    }

    #[tokio::test]
    async fn http_body_hides_source_error() {
        let response = ApiError::internal_with(
            "Failed to fetch listings",
            anyhow::anyhow!("Access Denied: Table project:dataset.view"),
        )
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "Failed to fetch listings");
        assert_eq!(body["details"], "internal server error");
    }

    #[tokio::test]
    async fn not_found_body_has_no_details() {
        let response = ApiError::not_found("Listing not found").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, serde_json::json!({ "error": "Listing not found" }));
    }
}
