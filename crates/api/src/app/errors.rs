//! Response envelope and error mapping.
//!
//! Success: `{"success": true, "data": …, "message"?: …}`.
//! Failure: `{"success": false, "error": "<code>", "message": "…"}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use tracing::error;

use hireflow_core::DomainError;
use hireflow_infra::{ProcessorError, StoreError, WebhookError};
use hireflow_mail::InboundError;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    #[serde(skip)]
    status: StatusCode,
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: StatusCode::OK,
            success: true,
            data,
            message: None,
        }
    }

    pub fn created(data: T) -> Self {
        Self {
            status: StatusCode::CREATED,
            ..Self::ok(data)
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

pub type ApiResult<T> = Result<ApiResponse<T>, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    UnknownRecipient(String),
    #[error("{0}")]
    ForeignRecipient(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        ApiError::NotFound(format!("{what} {id} not found"))
    }

    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::UnknownRecipient(_) => (StatusCode::NOT_FOUND, "unknown_recipient"),
            ApiError::ForeignRecipient(_) => (StatusCode::BAD_REQUEST, "foreign_recipient"),
            ApiError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        if status.is_server_error() {
            error!(code, error = %self, "request failed");
        }
        (
            status,
            Json(json!({
                "success": false,
                "error": code,
                "message": self.to_string(),
            })),
        )
            .into_response()
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::NotFound => ApiError::NotFound(err.to_string()),
            DomainError::Conflict(msg) => ApiError::Conflict(msg),
            other => ApiError::Validation(other.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => ApiError::NotFound(msg),
            StoreError::Conflict(msg) | StoreError::ClaimLost(msg) => ApiError::Conflict(msg),
            StoreError::Invalid(msg) => ApiError::Validation(msg),
            StoreError::Storage(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<ProcessorError> for ApiError {
    fn from(err: ProcessorError) -> Self {
        match err {
            ProcessorError::Store(e) => e.into(),
            ProcessorError::Stopped => ApiError::Unavailable(err.to_string()),
        }
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        if err.is_unauthorized() {
            return ApiError::Unauthorized(err.to_string());
        }
        match err {
            WebhookError::Payload(InboundError::ForeignRecipients { .. }) => {
                ApiError::ForeignRecipient(err.to_string())
            }
            WebhookError::Payload(e) => ApiError::Validation(e.to_string()),
            WebhookError::UnknownRecipient(_) => ApiError::UnknownRecipient(err.to_string()),
            WebhookError::Store(e) => e.into(),
            other => ApiError::Unauthorized(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let cases = [
            (ApiError::from(DomainError::validation("x")), StatusCode::BAD_REQUEST),
            (ApiError::from(StoreError::Conflict("dup".into())), StatusCode::CONFLICT),
            (ApiError::from(StoreError::Storage("db".into())), StatusCode::INTERNAL_SERVER_ERROR),
            (ApiError::from(WebhookError::BadSignature), StatusCode::UNAUTHORIZED),
            (
                ApiError::from(WebhookError::UnknownRecipient("a@b.c".into())),
                StatusCode::NOT_FOUND,
            ),
            (ApiError::from(ProcessorError::Stopped), StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn foreign_recipients_have_their_own_code() {
        let err = ApiError::from(WebhookError::Payload(InboundError::ForeignRecipients {
            domain: "mail.test".into(),
            recipients: "x@other.test".into(),
        }));
        assert_eq!(err.parts(), (StatusCode::BAD_REQUEST, "foreign_recipient"));
    }
}
