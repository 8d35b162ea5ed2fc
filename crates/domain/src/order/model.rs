//! Order and line item records.

use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::OrderStatus;
use crate::{DataVolume, DomainError, Money};

/// Unit of a package's validity period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DurationUnit {
    Day,
    Month,
}

impl DurationUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            DurationUnit::Day => "DAY",
            DurationUnit::Month => "MONTH",
        }
    }
}

impl std::str::FromStr for DurationUnit {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DAY" => Ok(DurationUnit::Day),
            "MONTH" => Ok(DurationUnit::Month),
            other => Err(DomainError::UnknownValue {
                kind: "duration unit",
                value: other.to_string(),
            }),
        }
    }
}

/// A purchased package line. Immutable once the order exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Provider package code, e.g. `JP-5GB-30D`.
    pub package_code: String,

    /// Human-readable package name.
    pub name: String,

    /// Price per unit.
    pub unit_price: Money,

    /// Number of profiles to provision for this package.
    pub quantity: u32,

    /// Data allowance per profile.
    pub volume: DataVolume,

    /// Validity length, in `duration_unit`s.
    pub duration: u32,

    pub duration_unit: DurationUnit,

    /// Coverage location code (ISO country or region code).
    pub location_code: String,
}

impl LineItem {
    /// Returns the total price for this line (quantity * unit_price).
    pub fn total_price(&self) -> Result<Money, DomainError> {
        self.unit_price
            .checked_multiply(self.quantity)
            .ok_or(DomainError::AmountOverflow)
    }

    fn validate(&self) -> Result<(), DomainError> {
        if self.package_code.trim().is_empty() {
            return Err(DomainError::MissingPackageCode);
        }
        if self.quantity == 0 {
            return Err(DomainError::InvalidQuantity {
                package_code: self.package_code.clone(),
                quantity: self.quantity,
            });
        }
        if self.unit_price.is_negative() {
            return Err(DomainError::InvalidPrice {
                package_code: self.package_code.clone(),
                price: self.unit_price.cents(),
            });
        }
        self.total_price()?;
        Ok(())
    }
}

/// A validated order ready to be persisted in `PENDING_PAYMENT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub id: OrderId,
    pub transaction_id: String,
    pub user_id: UserId,
    pub amount: Money,
    pub currency: String,
    pub items: Vec<LineItem>,

    /// Account credit to reserve when the order is stored.
    pub credits: Money,
}

impl NewOrder {
    /// Validates the line items and computes the order amount.
    ///
    /// A fresh external transaction id is generated; it is the idempotency
    /// key for the provider order.
    pub fn new(
        user_id: UserId,
        currency: impl Into<String>,
        items: Vec<LineItem>,
    ) -> Result<Self, DomainError> {
        if items.is_empty() {
            return Err(DomainError::NoItems);
        }
        let mut amount = Money::zero();
        for item in &items {
            item.validate()?;
            amount = amount
                .checked_add(item.total_price()?)
                .ok_or(DomainError::AmountOverflow)?;
        }

        let currency = currency.into().to_ascii_uppercase();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DomainError::InvalidCurrency(currency));
        }

        Ok(Self {
            id: OrderId::new(),
            transaction_id: format!("TXN{}", Uuid::new_v4().simple()),
            user_id,
            amount,
            currency,
            items,
            credits: Money::zero(),
        })
    }

    /// Applies account credit to the order, capped at its amount.
    pub fn with_credits(mut self, credits: Money) -> Result<Self, DomainError> {
        if credits.is_negative() {
            return Err(DomainError::InvalidCredit(credits.cents()));
        }
        self.credits = credits.min(self.amount);
        Ok(self)
    }

    /// What the payment processor has to collect.
    pub fn amount_due(&self) -> Money {
        self.amount.saturating_less(self.credits)
    }

    /// Returns the total number of profiles this order provisions.
    pub fn profile_count(&self) -> u64 {
        self.items.iter().map(|item| u64::from(item.quantity)).sum()
    }
}

/// A persisted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,

    /// External transaction id sent to the provider.
    pub transaction_id: String,

    /// Provider-assigned order number, set once when provisioning starts.
    pub order_no: Option<String>,

    pub user_id: UserId,

    /// Order total. Immutable once set.
    pub amount: Money,

    pub currency: String,

    /// Account credit debited at checkout. Returned to the account if the
    /// order is cancelled or fails.
    pub credits_used: Money,

    pub status: OrderStatus,

    pub items: Vec<LineItem>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Materialises a new order as it looks right after insertion.
    pub fn from_new(new: NewOrder, now: DateTime<Utc>) -> Self {
        Self {
            id: new.id,
            transaction_id: new.transaction_id,
            order_no: None,
            user_id: new.user_id,
            amount: new.amount,
            currency: new.currency,
            credits_used: new.credits,
            status: OrderStatus::PendingPayment,
            items: new.items,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the amount still owed after reserved credit.
    pub fn amount_due(&self) -> Money {
        self.amount.saturating_less(self.credits_used)
    }

    /// Returns true if the order is in a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
