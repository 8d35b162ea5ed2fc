//! Order status state machine.

use serde::{Deserialize, Serialize};

use crate::DomainError;

/// The status of an order in its fulfillment lifecycle.
///
/// State transitions:
/// ```text
/// PendingPayment ──► Paid ──► Processing ──► Completed
///       │             │  │         │
///       └──► Cancelled◄─┘  └───────┴──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order created, waiting for the payment processor or credit coverage.
    #[default]
    PendingPayment,

    /// Payment confirmed, provider order not yet placed.
    Paid,

    /// Provider order placed, waiting for profiles.
    Processing,

    /// Profiles delivered and persisted (terminal state).
    Completed,

    /// Order abandoned before provisioning (terminal state).
    Cancelled,

    /// Provider rejected the order (terminal state).
    Failed,
}

impl OrderStatus {
    /// Returns true if the order can move from this status to `next`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (PendingPayment, Paid)
                | (Paid, Processing)
                | (Processing, Completed)
                | (PendingPayment | Paid, Cancelled)
                | (Paid | Processing, Failed)
        )
    }

    /// Checks a transition, returning an error for illegal moves.
    pub fn ensure_transition(&self, next: OrderStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(DomainError::InvalidTransition {
                from: *self,
                to: next,
            })
        }
    }

    /// Returns true if the order can be cancelled in this status.
    pub fn can_cancel(&self) -> bool {
        self.can_transition_to(OrderStatus::Cancelled)
    }

    /// Returns true if this is a terminal status (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::Failed
        )
    }

    /// Returns the status name as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::PendingPayment => "PENDING_PAYMENT",
            OrderStatus::Paid => "PAID",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING_PAYMENT" => Ok(OrderStatus::PendingPayment),
            "PAID" => Ok(OrderStatus::Paid),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "COMPLETED" => Ok(OrderStatus::Completed),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            "FAILED" => Ok(OrderStatus::Failed),
            other => Err(DomainError::UnknownValue {
                kind: "order status",
                value: other.to_string(),
            }),
        }
    }
}
