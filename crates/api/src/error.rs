//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use fulfillment::FulfillmentError;
use order_store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Webhook authentication failed.
    Unauthorized(String),
    /// Fulfillment error.
    Fulfillment(FulfillmentError),
    /// Store error raised outside the coordinator.
    Store(StoreError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, extra) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg, None),
            ApiError::Fulfillment(err) => fulfillment_error_to_response(err),
            ApiError::Store(err) => {
                let (status, message) = store_error_to_response(err);
                (status, message, None)
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg, None)
            }
        };

        let mut body = serde_json::json!({ "error": message });
        if let Some(serde_json::Value::Object(fields)) = extra
            && let Some(map) = body.as_object_mut()
        {
            map.extend(fields);
        }
        (status, axum::Json(body)).into_response()
    }
}

fn fulfillment_error_to_response(
    err: FulfillmentError,
) -> (StatusCode, String, Option<serde_json::Value>) {
    match err {
        FulfillmentError::Validation(_) => (StatusCode::BAD_REQUEST, err.to_string(), None),
        FulfillmentError::OrderNotFound(_) | FulfillmentError::UnknownOrderNo(_) => {
            (StatusCode::NOT_FOUND, err.to_string(), None)
        }
        FulfillmentError::InvalidState { .. } => (StatusCode::CONFLICT, err.to_string(), None),
        FulfillmentError::ProviderUnavailable { order_id, .. } => {
            tracing::warn!(error = %err, "provider unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                err.to_string(),
                Some(serde_json::json!({
                    "order_id": order_id.to_string(),
                    "retryable": true,
                })),
            )
        }
        FulfillmentError::ProvisioningFailed { order_id, .. } => (
            StatusCode::BAD_GATEWAY,
            err.to_string(),
            Some(serde_json::json!({ "order_id": order_id.to_string() })),
        ),
        FulfillmentError::Store(store_err) => {
            let (status, message) = store_error_to_response(store_err);
            (status, message, None)
        }
        FulfillmentError::Domain(domain_err) => {
            let (status, message) = domain_error_to_response(domain_err);
            (status, message, None)
        }
        FulfillmentError::Serialization(_) => {
            tracing::error!(error = %err, "serialization failure");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string(), None)
        }
    }
}

fn store_error_to_response(err: StoreError) -> (StatusCode, String) {
    match err {
        StoreError::OrderNotFound(_) | StoreError::ProfileNotFound(_) => {
            (StatusCode::NOT_FOUND, err.to_string())
        }
        StoreError::InsufficientCredit { .. } | StoreError::Conflict(_) => {
            (StatusCode::CONFLICT, err.to_string())
        }
        StoreError::Domain(domain_err) => domain_error_to_response(domain_err),
        StoreError::OutOfRange { .. }
        | StoreError::Database(_)
        | StoreError::Migration(_)
        | StoreError::Serialization(_) => {
            tracing::error!(error = %err, "store failure");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

fn domain_error_to_response(err: DomainError) -> (StatusCode, String) {
    match &err {
        DomainError::InvalidTransition { .. } => (StatusCode::CONFLICT, err.to_string()),
        DomainError::UnknownValue { .. } => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        DomainError::NoItems
        | DomainError::InvalidQuantity { .. }
        | DomainError::InvalidPrice { .. }
        | DomainError::MissingPackageCode
        | DomainError::InvalidCurrency(_)
        | DomainError::InvalidCredit(_)
        | DomainError::AmountOverflow
        | DomainError::InvalidThreshold(_) => (StatusCode::BAD_REQUEST, err.to_string()),
    }
}

impl From<FulfillmentError> for ApiError {
    fn from(err: FulfillmentError) -> Self {
        ApiError::Fulfillment(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Fulfillment(FulfillmentError::Domain(err))
    }
}
