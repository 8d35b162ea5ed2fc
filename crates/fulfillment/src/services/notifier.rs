//! Outbound notification hooks.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::{AlertId, OrderId, RewardId};
use domain::{Order, ProvisionedProfile, ReferralReward, TriggeredAlert};

/// Delivers user-facing notifications for committed state changes.
///
/// Calls are fire-and-forget: implementations log their own failures and
/// never report them back into the state machine.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// An order reached `COMPLETED` with these profiles.
    async fn order_completed(&self, order: &Order, profiles: &[ProvisionedProfile]);

    /// A usage alert fired.
    async fn usage_alert(&self, triggered: &TriggeredAlert);

    /// A referral reward was credited to its referrer.
    async fn referral_credited(&self, reward: &ReferralReward);

    /// The provider reported a low reseller balance.
    async fn balance_alert(&self, _payload: &serde_json::Value) {}
}

/// Notifier that only writes structured log lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn order_completed(&self, order: &Order, profiles: &[ProvisionedProfile]) {
        tracing::info!(
            order_id = %order.id,
            user_id = %order.user_id,
            profiles = profiles.len(),
            "order ready notification"
        );
    }

    async fn usage_alert(&self, triggered: &TriggeredAlert) {
        tracing::info!(
            alert_id = %triggered.alert.id,
            esim_tran_no = %triggered.profile.esim_tran_no,
            threshold = triggered.alert.threshold,
            percent_used = triggered.percent_used,
            email = triggered.alert.channels.email,
            push = triggered.alert.channels.push,
            "usage alert notification"
        );
    }

    async fn referral_credited(&self, reward: &ReferralReward) {
        tracing::info!(
            reward_id = %reward.id,
            referrer_id = %reward.referrer_id,
            amount = reward.amount.cents(),
            "referral credited notification"
        );
    }

    async fn balance_alert(&self, payload: &serde_json::Value) {
        tracing::warn!(%payload, "provider balance alert");
    }
}

/// A notification captured by [`InMemoryNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    OrderCompleted { order_id: OrderId, profiles: usize },
    UsageAlert { alert_id: AlertId, percent_used: u8 },
    ReferralCredited { reward_id: RewardId },
    BalanceAlert,
}

/// Notifier that records every call, for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    sent: Arc<RwLock<Vec<Notification>>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns everything sent so far, in order.
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.read().unwrap().clone()
    }

    /// Returns how many completion notifications were sent for an order.
    pub fn completions_for(&self, order_id: OrderId) -> usize {
        self.sent
            .read()
            .unwrap()
            .iter()
            .filter(|n| matches!(n, Notification::OrderCompleted { order_id: id, .. } if *id == order_id))
            .count()
    }

    /// Returns how many times an alert notified.
    pub fn alerts_for(&self, alert_id: AlertId) -> usize {
        self.sent
            .read()
            .unwrap()
            .iter()
            .filter(|n| matches!(n, Notification::UsageAlert { alert_id: id, .. } if *id == alert_id))
            .count()
    }

    fn push(&self, notification: Notification) {
        self.sent.write().unwrap().push(notification);
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn order_completed(&self, order: &Order, profiles: &[ProvisionedProfile]) {
        self.push(Notification::OrderCompleted {
            order_id: order.id,
            profiles: profiles.len(),
        });
    }

    async fn usage_alert(&self, triggered: &TriggeredAlert) {
        self.push(Notification::UsageAlert {
            alert_id: triggered.alert.id,
            percent_used: triggered.percent_used,
        });
    }

    async fn referral_credited(&self, reward: &ReferralReward) {
        self.push(Notification::ReferralCredited {
            reward_id: reward.id,
        });
    }

    async fn balance_alert(&self, _payload: &serde_json::Value) {
        self.push(Notification::BalanceAlert);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::UserId;
    use domain::Money;

    #[tokio::test]
    async fn test_in_memory_notifier_records_in_order() {
        let notifier = InMemoryNotifier::new();
        let reward = ReferralReward::pending(
            UserId::new(),
            UserId::new(),
            Money::from_cents(500),
            Utc::now(),
        );

        notifier.referral_credited(&reward).await;
        notifier.balance_alert(&serde_json::json!({"balance": 10})).await;

        assert_eq!(
            notifier.sent(),
            vec![
                Notification::ReferralCredited {
                    reward_id: reward.id
                },
                Notification::BalanceAlert,
            ]
        );
    }
}
