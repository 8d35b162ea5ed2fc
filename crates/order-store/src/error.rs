use common::{OrderId, UserId};
use domain::{DomainError, Money};
use thiserror::Error;

/// Errors that can occur when interacting with the order store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No order with this id.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// No profile with this transaction number or id.
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    /// The user's credit balance does not cover the requested debit.
    #[error("Insufficient credit for user {user_id}: balance {balance}, required {required}")]
    InsufficientCredit {
        user_id: UserId,
        balance: Money,
        required: Money,
    },

    /// A uniqueness rule was violated (second pending referral, profile owned
    /// by another order...).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A value could not be represented in the database column type.
    #[error("Value out of range for {field}: {value}")]
    OutOfRange { field: &'static str, value: String },

    /// A domain rule was violated or a stored value could not be decoded.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for order store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
