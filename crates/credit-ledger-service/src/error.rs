//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use credit_ledger_core::BillingError;
use credit_ledger_store::StoreError;

use crate::billing::processor::ProcessError;
use crate::stripe::StripeError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - the account stayed locked through every retry.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Webhook signature missing, malformed, stale, or wrong.
    #[error("invalid webhook signature: {0}")]
    SignatureInvalid(String),

    /// A required integration is not configured.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// External service error.
    #[error("external service error: {0}")]
    ExternalService(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone(), None),
            Self::SignatureInvalid(reason) => (
                StatusCode::BAD_REQUEST,
                "signature_invalid",
                "Invalid webhook signature".to_string(),
                Some(serde_json::json!({ "reason": reason })),
            ),
            Self::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                msg.clone(),
                None,
            ),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            Self::ExternalService(msg) => (
                StatusCode::BAD_GATEWAY,
                "external_service_error",
                msg.clone(),
                None,
            ),
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound(format!("{entity} not found: {id}")),
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::DuplicateKey { .. }
            | StoreError::Database(_)
            | StoreError::Serialization(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::AccountNotFound { account_id } => {
                Self::NotFound(format!("Account not found: {account_id}"))
            }
            BillingError::InvalidAmount(msg) | BillingError::InvalidIdempotencyKey(msg) => {
                Self::BadRequest(msg)
            }
            BillingError::InvalidId(e) => Self::BadRequest(e.to_string()),
            BillingError::Conflict { account_id } => {
                Self::Conflict(format!("Account {account_id} is busy, retry the request"))
            }
            BillingError::Configuration(msg) | BillingError::Storage(msg) => Self::Internal(msg),
        }
    }
}

impl From<StripeError> for ApiError {
    fn from(err: StripeError) -> Self {
        tracing::warn!(error = %err, "Stripe request failed");
        Self::ExternalService(err.to_string())
    }
}

impl From<ProcessError> for ApiError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::SignatureInvalid(e) => Self::SignatureInvalid(e.to_string()),
            ProcessError::NotConfigured => {
                Self::ServiceUnavailable("Stripe webhook secret not configured".into())
            }
            ProcessError::MalformedPayload(msg) => Self::BadRequest(msg),
            ProcessError::Billing(e) => Self::BadRequest(e.to_string()),
        }
    }
}
