//! Domain error types.

use thiserror::Error;

use crate::order::OrderStatus;

/// Errors raised while building or mutating domain values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    /// An order must contain at least one line item.
    #[error("Order has no line items")]
    NoItems,

    /// A line item quantity of zero.
    #[error("Invalid quantity for package {package_code}: {quantity} (must be greater than 0)")]
    InvalidQuantity { package_code: String, quantity: u32 },

    /// A negative unit price.
    #[error("Invalid price for package {package_code}: {price} (must not be negative)")]
    InvalidPrice { package_code: String, price: i64 },

    /// A blank package code.
    #[error("Package code is required")]
    MissingPackageCode,

    /// Currency must be a three-letter ISO code.
    #[error("Invalid currency: {0}")]
    InvalidCurrency(String),

    /// A line total or the order amount does not fit in 64 bits.
    #[error("Order amount overflows")]
    AmountOverflow,

    /// Applied credits must be between zero and the order amount.
    #[error("Invalid credit amount: {0}")]
    InvalidCredit(i64),

    /// Alert thresholds are whole percentages from 1 to 100.
    #[error("Invalid alert threshold: {0} (must be between 1 and 100)")]
    InvalidThreshold(u8),

    /// The requested status transition is not part of the order lifecycle.
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// A stored enum value could not be recognised.
    #[error("Unknown {kind} value: {value}")]
    UnknownValue { kind: &'static str, value: String },
}
