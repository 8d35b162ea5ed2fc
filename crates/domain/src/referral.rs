//! Referral rewards.

use chrono::{DateTime, Utc};
use common::{OrderId, RewardId, UserId};
use serde::{Deserialize, Serialize};

use crate::{DomainError, Money};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RewardStatus {
    Pending,
    Credited,
}

impl RewardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewardStatus::Pending => "PENDING",
            RewardStatus::Credited => "CREDITED",
        }
    }
}

impl std::str::FromStr for RewardStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(RewardStatus::Pending),
            "CREDITED" => Ok(RewardStatus::Credited),
            other => Err(DomainError::UnknownValue {
                kind: "reward status",
                value: other.to_string(),
            }),
        }
    }
}

/// A referral waiting on the referred user's first completed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralReward {
    pub id: RewardId,
    pub referrer_id: UserId,
    pub referred_id: UserId,

    /// Credit granted to the referrer.
    pub amount: Money,
    pub status: RewardStatus,

    /// The completed order that earned the reward.
    pub order_id: Option<OrderId>,
    pub created_at: DateTime<Utc>,
    pub credited_at: Option<DateTime<Utc>>,
}

impl ReferralReward {
    pub fn pending(
        referrer_id: UserId,
        referred_id: UserId,
        amount: Money,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RewardId::new(),
            referrer_id,
            referred_id,
            amount,
            status: RewardStatus::Pending,
            order_id: None,
            created_at: now,
            credited_at: None,
        }
    }

    /// Flips the reward to credited for the given order.
    pub fn credit(&mut self, order_id: OrderId, now: DateTime<Utc>) {
        self.status = RewardStatus::Credited;
        self.order_id = Some(order_id);
        self.credited_at = Some(now);
    }
}

/// Amounts applied when a referred user's first order completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferralTerms {
    /// Credit granted to the referred user on their first completed order.
    pub welcome_bonus: Money,
}

impl Default for ReferralTerms {
    fn default() -> Self {
        Self {
            welcome_bonus: Money::from_cents(300),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credit_links_order() {
        let mut reward = ReferralReward::pending(
            UserId::new(),
            UserId::new(),
            Money::from_cents(500),
            Utc::now(),
        );
        let order_id = OrderId::new();
        reward.credit(order_id, Utc::now());

        assert_eq!(reward.status, RewardStatus::Credited);
        assert_eq!(reward.order_id, Some(order_id));
        assert!(reward.credited_at.is_some());
    }
}
