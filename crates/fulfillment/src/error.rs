//! Fulfillment error types.

use common::OrderId;
use domain::{DomainError, OrderStatus};
use order_store::StoreError;
use provider::ProviderError;
use thiserror::Error;

/// Errors that can occur while fulfilling orders or handling webhooks.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    /// The request payload is malformed or incomplete.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Order not found.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// No order carries this provider order number yet.
    #[error("No order with provider order number {0}")]
    UnknownOrderNo(String),

    /// The order is not in a status that allows the requested action.
    #[error("Cannot {action} order {order_id} in status {status}")]
    InvalidState {
        order_id: OrderId,
        status: OrderStatus,
        action: &'static str,
    },

    /// The provider could not be reached or refused the call. The order was
    /// left in its last good status and the call can be retried.
    #[error("Provider unavailable for order {order_id}: {source}")]
    ProviderUnavailable {
        order_id: OrderId,
        #[source]
        source: ProviderError,
    },

    /// The provider rejected the order for good; the order is now `FAILED`.
    #[error("Provisioning failed for order {order_id}: {reason}")]
    ProvisioningFailed { order_id: OrderId, reason: String },

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Domain error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FulfillmentError {
    /// Returns true if the caller should retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FulfillmentError::ProviderUnavailable { .. })
    }
}

/// Convenience type alias for fulfillment results.
pub type Result<T> = std::result::Result<T, FulfillmentError>;
